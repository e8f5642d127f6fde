//! Directory manipulation used by the unpacker and the installer.
//!
//! Errors always name the exact path that failed so they can be diagnosed
//! from the log file alone.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use walkdir::WalkDir;

use crate::error::{UpdateError, UpdateErrorKind};

/// Error for a failed directory operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DirError {
    /// A file or directory could not be removed.
    #[error("unable to delete {path:?}")]
    Delete {
        /// Path that could not be removed.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },

    /// A directory could not be listed or walked.
    #[error("unable to read directory {path:?}")]
    Read {
        /// Path that could not be read.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },

    /// A directory could not be created.
    #[error("unable to create directory {path:?}")]
    CreateDir {
        /// Path that could not be created.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },

    /// A file could not be copied.
    #[error("unable to copy {from:?} to {to:?}")]
    Copy {
        /// Source file.
        from: PathBuf,
        /// Destination file.
        to: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },
}

impl DirError {
    /// Returns the path the operation failed on.
    ///
    /// For copies, this is the destination.
    pub fn path(&self) -> &Path {
        match self {
            Self::Delete { path, .. } => path,
            Self::Read { path, .. } => path,
            Self::CreateDir { path, .. } => path,
            Self::Copy { to, .. } => to,
        }
    }

    fn from_walk(error: walkdir::Error, fallback: &Path) -> Self {
        let path = error
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| fallback.to_path_buf());
        let source = error
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("filesystem loop"));

        Self::Read { path, source }
    }
}

impl From<DirError> for UpdateError {
    fn from(value: DirError) -> Self {
        UpdateError::new(UpdateErrorKind::Io).with_source(value)
    }
}

/// Deletes everything inside `dir` but keeps `dir` itself.
///
/// Each immediate child is walked depth-first so files are removed before
/// the directories containing them. The first failure aborts the operation.
pub fn delete_contents(dir: &Path) -> Result<(), DirError> {
    tracing::debug!(?dir, "delete directory contents");

    let entries = std::fs::read_dir(dir).map_err(|source| DirError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| DirError::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        delete_tree(&entry.path())?;
    }

    Ok(())
}

/// Deletes `path` and, if it is a directory, everything below it.
pub fn delete_tree(path: &Path) -> Result<(), DirError> {
    for item in WalkDir::new(path)
        .follow_root_links(false)
        .contents_first(true)
    {
        let item = item.map_err(|error| DirError::from_walk(error, path))?;
        let item_path = item.path();

        let result = if item.file_type().is_dir() {
            std::fs::remove_dir(item_path)
        } else {
            remove_file_or_link(item_path)
        };

        result.map_err(|source| DirError::Delete {
            path: item_path.to_path_buf(),
            source,
        })?;
    }

    Ok(())
}

#[cfg(windows)]
fn remove_file_or_link(path: &Path) -> std::io::Result<()> {
    // Directory symlinks and junctions are removed like directories.
    match std::fs::remove_file(path) {
        Err(error) if path.is_dir() => std::fs::remove_dir(path).map_err(|_| error),
        result => result,
    }
}

#[cfg(not(windows))]
fn remove_file_or_link(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)
}

/// How often and how fast a failing operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Attempts used when replacing an installation.
    pub const INSTALL_ATTEMPTS: u32 = 10;
    /// Pause used when replacing an installation.
    pub const INSTALL_INTERVAL: Duration = Duration::from_millis(500);

    /// Creates a new policy.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Runs `operation` until it succeeds or the attempts are used up.
    ///
    /// The closure receives the zero-based attempt number. The error of the
    /// last attempt is returned when every attempt fails.
    pub fn run<T, E, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    let tries_left = attempts - attempt;

                    tracing::warn!(%error, tries_left, "attempt failed");

                    if tries_left == 0 {
                        return Err(error);
                    }

                    std::thread::sleep(self.interval);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::INSTALL_ATTEMPTS, Self::INSTALL_INTERVAL)
    }
}

/// Copies everything inside `source` into `destination`.
///
/// `destination` must exist. Existing files are overwritten. File
/// permissions are copied along with the contents.
pub fn copy_contents(source: &Path, destination: &Path) -> Result<(), DirError> {
    tracing::debug!(?source, ?destination, "copy directory contents");

    for item in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let item = item.map_err(|error| DirError::from_walk(error, source))?;
        let Ok(relative) = item.path().strip_prefix(source) else {
            continue;
        };
        let target = destination.join(relative);
        let file_type = item.file_type();

        if file_type.is_dir() {
            match std::fs::create_dir(&target) {
                Err(error) if error.kind() != std::io::ErrorKind::AlreadyExists => {
                    return Err(DirError::CreateDir {
                        path: target,
                        source: error,
                    });
                }
                _ => {}
            }
        } else if file_type.is_symlink() {
            copy_symlink(item.path(), &target)?;
        } else {
            std::fs::copy(item.path(), &target).map_err(|error| DirError::Copy {
                from: item.path().to_path_buf(),
                to: target.clone(),
                source: error,
            })?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), DirError> {
    let map_error = |source| DirError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    let link = std::fs::read_link(from).map_err(map_error)?;
    std::os::unix::fs::symlink(link, to).map_err(map_error)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), DirError> {
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|source| DirError::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn make_tree(root: &Path) {
        std::fs::create_dir_all(root.join("a/b/c")).unwrap();
        std::fs::write(root.join("top.txt"), "top").unwrap();
        std::fs::write(root.join("a/one.txt"), "one").unwrap();
        std::fs::write(root.join("a/b/c/deep.txt"), "deep").unwrap();
    }

    #[test]
    fn test_delete_contents_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        make_tree(dir.path());

        delete_contents(dir.path()).unwrap();

        assert!(dir.path().is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_delete_contents_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();

        let error = delete_contents(&file).unwrap_err();
        assert!(matches!(error, DirError::Read { .. }));
        assert_eq!(error.path(), file);
    }

    #[test]
    fn test_copy_contents() {
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        make_tree(source.path());

        copy_contents(source.path(), destination.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(destination.path().join("a/b/c/deep.txt")).unwrap(),
            "deep"
        );
        assert_eq!(
            std::fs::read_to_string(destination.path().join("top.txt")).unwrap(),
            "top"
        );
    }

    #[test]
    fn test_retry_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(10, Duration::ZERO);

        let result: Result<u32, String> = policy.run(|attempt| {
            calls.set(calls.get() + 1);
            if attempt < 7 {
                Err(format!("locked {attempt}"))
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 8);
    }

    #[test]
    fn test_retry_exhausted() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(10, Duration::ZERO);

        let result: Result<(), String> = policy.run(|attempt| {
            calls.set(calls.get() + 1);
            Err(format!("locked {attempt}"))
        });

        assert_eq!(result, Err("locked 9".to_string()));
        assert_eq!(calls.get(), 10);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 10);
        assert_eq!(policy.interval, Duration::from_millis(500));
    }
}
