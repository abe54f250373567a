//! Fixture discovery.

use engine::Fixture;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Fixture root '{path}' does not exist")]
    RootNotFound { path: String },

    #[error("Fixture root '{path}' is not a directory")]
    NotADirectory { path: String },
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Find every file under `root` with the given extension.
///
/// The search is recursive and the result is sorted by path, so repeated
/// runs over an unchanged tree produce the same order. `extension` may be
/// given with or without a leading dot.
pub fn discover(root: &Path, extension: &str) -> DiscoveryResult<Vec<Fixture>> {
    if !root.exists() {
        return Err(DiscoveryError::RootNotFound {
            path: root.display().to_string(),
        });
    }
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory {
            path: root.display().to_string(),
        });
    }

    let extension = extension.trim_start_matches('.');

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect();
    paths.sort();

    debug!(
        "Discovered {} .{} files under {}",
        paths.len(),
        extension,
        root.display()
    );

    Ok(paths
        .into_iter()
        .map(|path| Fixture::new(root, path))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, relative: &str) {
        let path = dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_discover_sorted_recursive() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "zeta.ipes");
        touch(&dir, "alpha/b.ipes");
        touch(&dir, "alpha/a.ipes");
        touch(&dir, "alpha/notes.txt");
        touch(&dir, "beta/deep/c.ipes");

        let ids: Vec<String> = discover(dir.path(), "ipes")
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(
            ids,
            vec!["alpha/a.ipes", "alpha/b.ipes", "beta/deep/c.ipes", "zeta.ipes"]
        );
    }

    #[test]
    fn test_discover_excludes_directories_with_extension() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("folder.ipes")).unwrap();
        touch(&dir, "folder.ipes/inner.ipes");

        let fixtures = discover(dir.path(), ".ipes").unwrap();
        assert_eq!(fixtures.len(), 1);
        assert_eq!(fixtures[0].id, "folder.ipes/inner.ipes");
        assert!(fixtures[0].path.starts_with(dir.path()));
    }

    #[test]
    fn test_discover_is_deterministic() {
        let dir = TempDir::new().unwrap();
        for name in ["c.ipes", "a.ipes", "b/x.ipes", "b/a.ipes"] {
            touch(&dir, name);
        }

        let first = discover(dir.path(), "ipes").unwrap();
        let second = discover(dir.path(), "ipes").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_discover_empty_tree() {
        let dir = TempDir::new().unwrap();
        assert!(discover(dir.path(), "ipes").unwrap().is_empty());
    }

    #[test]
    fn test_discover_missing_root() {
        let result = discover(Path::new("/nonexistent/fixture/root"), "ipes");
        assert!(matches!(result, Err(DiscoveryError::RootNotFound { .. })));
    }

    #[test]
    fn test_discover_root_is_file() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "single.ipes");
        let result = discover(&dir.path().join("single.ipes"), "ipes");
        assert!(matches!(result, Err(DiscoveryError::NotADirectory { .. })));
    }
}
