//! Subprocess executor.
//!
//! Each fixture runs as a child process in its own process group so that a
//! timeout can take down the engine together with anything it forked. Output
//! streams are drained concurrently while the child runs; only a bounded
//! prefix of each stream is retained.

use crate::config::EngineConfig;
use crate::executor::FixtureExecutor;
use crate::types::{Fixture, RawResult};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Bytes retained per character of output budget; enough for any UTF-8 text
const BYTES_PER_CHAR: usize = 4;

const READ_CHUNK: usize = 8 * 1024;

/// Keep the first `budget` characters of `text`
pub fn truncate_chars(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

/// Bytes captured from one output stream, shared with its reader task
type CaptureBuffer = Arc<Mutex<Vec<u8>>>;

/// Read a stream to the end, retaining at most `cap` bytes in `kept`
async fn read_capped<R>(mut reader: R, cap: usize, buffer: CaptureBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut kept = match buffer.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let room = cap.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Stopped reading engine output: {}", e);
                break;
            }
        }
    }
}

/// A stream being drained in the background
struct Capture {
    buffer: CaptureBuffer,
    task: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(reader: Option<R>, cap: usize) -> Option<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        reader.map(|reader| {
            let buffer = CaptureBuffer::default();
            let task = tokio::spawn(read_capped(reader, cap, Arc::clone(&buffer)));
            Self { buffer, task }
        })
    }

    fn take(&self) -> Vec<u8> {
        match self.buffer.lock() {
            Ok(mut kept) => std::mem::take(&mut *kept),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

/// Exit code, or the negated signal number when killed by a signal
fn return_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    crate::types::NO_EXIT_CODE
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: libc::c_int) {
    let Some(pid) = pid else {
        return;
    };
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The negative pid
    // addresses the process group created for this child at spawn.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

/// Executes fixtures by spawning the engine as a child process
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    config: EngineConfig,
}

impl ProcessExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn build_command(&self, fixture: &Fixture) -> Option<Command> {
        let argv = self.config.command_line(fixture);
        let (program, args) = argv.split_first()?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(self.config.child_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        Some(cmd)
    }

    /// Terminate the child's process tree: graceful signal, bounded wait,
    /// then a forced kill.
    async fn terminate(&self, child: &mut Child) {
        // The id is gone once the child has been reaped
        let pid = child.id();

        #[cfg(unix)]
        signal_group(pid, libc::SIGTERM);
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match timeout(self.config.termination_grace, child.wait()).await {
            Ok(Ok(_)) => {
                // Sweep group members that ignored the termination signal
                #[cfg(unix)]
                signal_group(pid, libc::SIGKILL);
            }
            Ok(Err(e)) => warn!("Failed waiting for terminated engine: {}", e),
            Err(_) => {
                warn!(
                    "Engine ignored termination for {:?}, killing",
                    self.config.termination_grace
                );
                #[cfg(unix)]
                signal_group(pid, libc::SIGKILL);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill engine: {}", e);
                }
            }
        }
    }

    /// Collect a stream's output, waiting at most the grace period for EOF.
    ///
    /// Output read before the deadline is kept even if the stream never
    /// closes.
    async fn collect(&self, capture: Option<Capture>) -> String {
        let Some(mut capture) = capture else {
            return String::new();
        };
        match timeout(self.config.termination_grace, &mut capture.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output reader failed: {}", e),
            Err(_) => {
                // A descendant outside the process group still holds the pipe
                debug!("Output stream still open after {:?}", self.config.termination_grace);
                capture.task.abort();
            }
        }
        let bytes = capture.take();
        truncate_chars(&String::from_utf8_lossy(&bytes), self.config.output_budget)
    }
}

#[async_trait]
impl FixtureExecutor for ProcessExecutor {
    async fn run(&self, fixture: &Fixture, limit: Duration) -> RawResult {
        let started = Instant::now();

        let Some(mut cmd) = self.build_command(fixture) else {
            return RawResult::launch_error("empty engine command line", started.elapsed());
        };

        debug!("Running {:?}", self.config.command_line(fixture));
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RawResult::launch_error(
                    format!("failed to launch '{}': {}", self.config.program, e),
                    started.elapsed(),
                );
            }
        };

        let pid = child.id();
        let cap = self.config.output_budget.saturating_mul(BYTES_PER_CHAR);
        let stdout_task = Capture::spawn(child.stdout.take(), cap);
        let stderr_task = Capture::spawn(child.stderr.take(), cap);

        match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => {
                // Background processes left by the engine die with it
                #[cfg(unix)]
                signal_group(pid, libc::SIGKILL);
                #[cfg(not(unix))]
                let _ = pid;

                let stdout = self.collect(stdout_task).await;
                let stderr = self.collect(stderr_task).await;
                RawResult::exited(return_code(status), stdout, stderr, started.elapsed())
            }
            Ok(Err(e)) => {
                self.terminate(&mut child).await;
                RawResult::launch_error(
                    format!("failed waiting for engine: {}", e),
                    started.elapsed(),
                )
            }
            Err(_) => {
                debug!("{} exceeded {:?}, terminating", fixture.id, limit);
                self.terminate(&mut child).await;
                let duration = started.elapsed();
                let stdout = self.collect(stdout_task).await;
                let stderr = self.collect(stderr_task).await;
                RawResult::timeout(limit, stdout, stderr, duration)
            }
        }
    }

    fn executor_name(&self) -> &'static str {
        "process"
    }
}
