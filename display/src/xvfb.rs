//! Virtual display server provisioning.
//!
//! A server is started on the first display number in the reserved range that
//! has no lock marker. The returned [`VirtualDisplay`] owns the server process
//! and shuts it down when released or dropped.

use crate::{DisplayBinding, DisplayError, DisplayResult};
use std::ops::Range;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Placeholder replaced by the display number in server arguments
pub const DISPLAY_PLACEHOLDER: &str = "{display}";

/// Configuration for virtual display provisioning
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Virtual display server binary
    pub server_binary: String,
    /// Server arguments; `{display}` is replaced by the display number
    pub server_args: Vec<String>,
    /// Reserved display numbers, end exclusive
    pub display_range: Range<u32>,
    /// Directory holding `.X{n}-lock` markers
    pub lock_dir: PathBuf,
    /// How long the server must survive after spawn to count as started
    pub startup_probe: Duration,
    /// Time allowed for graceful shutdown before a forced kill
    pub shutdown_grace: Duration,
    /// Display-wrapping launcher argv, program first
    pub wrapper: Vec<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            server_binary: "Xvfb".to_string(),
            server_args: vec![
                ":{display}".to_string(),
                "-screen".to_string(),
                "0".to_string(),
                "1024x768x24".to_string(),
            ],
            display_range: 99..200,
            lock_dir: PathBuf::from("/tmp"),
            startup_probe: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
            wrapper: vec![
                "xvfb-run".to_string(),
                "--auto-servernum".to_string(),
                "--server-args=-screen 0 1024x768x24".to_string(),
            ],
        }
    }
}

impl DisplayConfig {
    pub fn with_server_binary(mut self, binary: impl Into<String>) -> Self {
        self.server_binary = binary.into();
        self
    }

    pub fn with_server_args(mut self, args: Vec<String>) -> Self {
        self.server_args = args;
        self
    }

    pub fn with_display_range(mut self, range: Range<u32>) -> Self {
        self.display_range = range;
        self
    }

    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = lock_dir.into();
        self
    }

    pub fn with_startup_probe(mut self, probe: Duration) -> Self {
        self.startup_probe = probe;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Program name of the wrapping launcher
    pub fn wrapper_program(&self) -> &str {
        self.wrapper.first().map(String::as_str).unwrap_or("")
    }

    /// Lock marker path for a display number
    pub fn lock_file(&self, display: u32) -> PathBuf {
        self.lock_dir.join(format!(".X{}-lock", display))
    }

    /// Server arguments with the display number substituted
    pub fn render_server_args(&self, display: u32) -> Vec<String> {
        self.server_args
            .iter()
            .map(|arg| arg.replace(DISPLAY_PLACEHOLDER, &display.to_string()))
            .collect()
    }

    pub fn validate(&self) -> DisplayResult<()> {
        if self.server_binary.trim().is_empty() {
            return Err(DisplayError::InvalidConfig(
                "Server binary cannot be empty".to_string(),
            ));
        }

        if self.display_range.is_empty() {
            return Err(DisplayError::InvalidConfig(format!(
                "Display range {}..{} is empty",
                self.display_range.start, self.display_range.end
            )));
        }

        if self.shutdown_grace.is_zero() {
            return Err(DisplayError::InvalidConfig(
                "Shutdown grace must be greater than 0".to_string(),
            ));
        }

        if self.wrapper_program().trim().is_empty() {
            return Err(DisplayError::InvalidConfig(
                "Wrapper launcher cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// First display number in the reserved range without a lock marker
pub fn find_free_display(config: &DisplayConfig) -> Option<u32> {
    config
        .display_range
        .clone()
        .find(|&display| !config.lock_file(display).exists())
}

/// Start a virtual display server on a free display number.
///
/// Fails with [`DisplayError::NoFreeDisplay`] when the range is exhausted and
/// with [`DisplayError::ServerStartFailed`] when the server cannot be spawned
/// or exits within the startup probe window.
pub async fn provision(config: &DisplayConfig) -> DisplayResult<VirtualDisplay> {
    config.validate()?;

    let number = find_free_display(config).ok_or(DisplayError::NoFreeDisplay {
        start: config.display_range.start,
        end: config.display_range.end,
    })?;
    let args = config.render_server_args(number);

    let mut cmd = Command::new(&config.server_binary);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Detach from our process group so terminal signals don't reach the
    // server before we tear it down ourselves.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("Launching {} {:?}", config.server_binary, args);
    let child = cmd.spawn().map_err(|e| DisplayError::ServerStartFailed {
        display: number,
        reason: e.to_string(),
    })?;

    // From here on the handle owns the server; any early return or a
    // cancelled future tears it down.
    let mut server = VirtualDisplay {
        number,
        server: Some(child),
        shutdown_grace: config.shutdown_grace,
    };

    sleep(config.startup_probe).await;

    if let Some(status) = server.exit_status()? {
        return Err(DisplayError::ServerStartFailed {
            display: number,
            reason: format!("server exited during startup with {}", status),
        });
    }

    info!("Started {} on display :{}", config.server_binary, number);
    Ok(server)
}

/// Handle for a running virtual display server
#[derive(Debug)]
pub struct VirtualDisplay {
    number: u32,
    server: Option<Child>,
    shutdown_grace: Duration,
}

impl VirtualDisplay {
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Display identifier in `:N` form
    pub fn name(&self) -> String {
        format!(":{}", self.number)
    }

    pub fn binding(&self) -> DisplayBinding {
        DisplayBinding::Explicit(self.name())
    }

    /// Process id of the server while it is owned by this handle
    pub fn server_pid(&self) -> Option<u32> {
        self.server.as_ref().map(Child::id)
    }

    /// Stop the server: graceful signal, bounded wait, then a forced kill.
    ///
    /// The wait runs on the blocking pool and completes even if this future
    /// is dropped.
    pub async fn release(self) -> DisplayResult<()> {
        let mut server = self;
        tokio::task::spawn_blocking(move || server.shutdown())
            .await
            .map_err(|e| DisplayError::Io(std::io::Error::other(e)))?
    }

    fn exit_status(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        match self.server.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    fn shutdown(&mut self) -> DisplayResult<()> {
        let Some(mut child) = self.server.take() else {
            return Ok(());
        };

        if child.try_wait()?.is_some() {
            debug!("Display server :{} already exited", self.number);
            return Ok(());
        }

        terminate_group(&child);

        let deadline = Instant::now() + self.shutdown_grace;
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                info!("Display server :{} stopped", self.number);
                return Ok(());
            }
            std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }

        warn!(
            "Display server :{} ignored termination for {:?}, killing",
            self.number, self.shutdown_grace
        );
        kill_group(&child);
        if let Err(e) = child.kill() {
            // InvalidInput means the process already exited
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(e.into());
            }
        }
        child.wait()?;
        Ok(())
    }
}

impl Drop for VirtualDisplay {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to stop display server :{}: {}", self.number, e);
        }
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The negative pid
    // addresses the process group the server leads since spawn.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

#[cfg(unix)]
fn terminate_group(child: &Child) {
    signal_group(child, libc::SIGTERM);
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    signal_group(child, libc::SIGKILL);
}

#[cfg(not(unix))]
fn terminate_group(_child: &Child) {}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn sh_server(script: &str, lock_dir: &TempDir) -> DisplayConfig {
        DisplayConfig::default()
            .with_server_binary("sh")
            .with_server_args(vec![
                "-c".to_string(),
                script.to_string(),
                "xvfb-:{display}".to_string(),
            ])
            .with_display_range(99..102)
            .with_lock_dir(lock_dir.path())
            .with_startup_probe(Duration::from_millis(200))
            .with_shutdown_grace(Duration::from_secs(2))
    }

    #[test]
    fn test_display_config_default() {
        let config = DisplayConfig::default();
        assert_eq!(config.server_binary, "Xvfb");
        assert_eq!(config.display_range, 99..200);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.wrapper_program(), "xvfb-run");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_render_server_args() {
        let config = DisplayConfig::default();
        assert_eq!(
            config.render_server_args(123),
            vec![":123", "-screen", "0", "1024x768x24"]
        );
        assert_eq!(config.lock_file(7), PathBuf::from("/tmp/.X7-lock"));
    }

    #[test]
    fn test_validate_rejects_empty_range() {
        let config = DisplayConfig::default().with_display_range(10..10);
        assert!(matches!(
            config.validate(),
            Err(DisplayError::InvalidConfig(_))
        ));

        let config = DisplayConfig::default().with_shutdown_grace(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_find_free_display_skips_locked() {
        let dir = TempDir::new().unwrap();
        let config = sh_server("sleep 30", &dir);
        assert_eq!(find_free_display(&config), Some(99));

        File::create(config.lock_file(99)).unwrap();
        assert_eq!(find_free_display(&config), Some(100));

        File::create(config.lock_file(100)).unwrap();
        File::create(config.lock_file(101)).unwrap();
        assert_eq!(find_free_display(&config), None);
    }

    #[tokio::test]
    async fn test_provision_fully_locked_range() {
        let dir = TempDir::new().unwrap();
        let config = sh_server("sleep 30", &dir);
        for display in config.display_range.clone() {
            File::create(config.lock_file(display)).unwrap();
        }

        let result = provision(&config).await;
        assert!(matches!(
            result,
            Err(DisplayError::NoFreeDisplay {
                start: 99,
                end: 102
            })
        ));
    }

    #[tokio::test]
    async fn test_provision_missing_binary() {
        let dir = TempDir::new().unwrap();
        let config = sh_server("sleep 30", &dir).with_server_binary("/nonexistent/Xvfb");
        let result = provision(&config).await;
        assert!(matches!(
            result,
            Err(DisplayError::ServerStartFailed { display: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_provision_server_exits_during_startup() {
        let dir = TempDir::new().unwrap();
        let config = sh_server("exit 3", &dir);
        let result = provision(&config).await;
        assert!(matches!(
            result,
            Err(DisplayError::ServerStartFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_provision_and_release() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join(".X99-lock")).unwrap();
        let config = sh_server("sleep 30", &dir);

        let display = provision(&config).await.unwrap();
        assert_eq!(display.number(), 100);
        assert_eq!(display.name(), ":100");
        assert_eq!(display.binding(), DisplayBinding::Explicit(":100".to_string()));
        assert!(display.server_pid().is_some());

        let started = Instant::now();
        display.release().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_force_kills_stubborn_server() {
        let dir = TempDir::new().unwrap();
        let config = sh_server("trap '' TERM; while true; do sleep 1; done", &dir)
            .with_shutdown_grace(Duration::from_millis(300));

        let display = provision(&config).await.unwrap();
        let started = Instant::now();
        display.release().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drop_stops_server() {
        let dir = TempDir::new().unwrap();
        let config = sh_server("sleep 30", &dir);

        let display = provision(&config).await.unwrap();
        let pid = display.server_pid().unwrap() as libc::pid_t;
        drop(display);

        // The child was reaped by the handle, so the pid no longer exists.
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_startup_stops_server() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("server.pid");
        let script = format!("echo $$ > {}; sleep 30", pid_file.display());
        let config = sh_server(&script, &dir).with_startup_probe(Duration::from_secs(2));

        let cancelled = tokio::time::timeout(Duration::from_millis(300), provision(&config)).await;
        assert!(cancelled.is_err());

        let pid: libc::pid_t = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive);
    }
}
