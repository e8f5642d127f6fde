//! Runtime image layout.
//!
//! A runtime image is a directory holding the application launcher and
//! everything it needs to run:
//!
//! ```text
//! my-app/
//!   bin/my-app        launcher (my-app.exe on Windows)
//!   bin/...           other executables, such as the installer
//!   conf/
//!   legal/
//!   lib/
//! ```
//!
//! Images are the unit of installation: an update replaces the whole
//! directory.
use std::path::{Path, PathBuf};

use crate::{
    error::{UpdateError, UpdateErrorKind},
    os::Platform,
};

/// Directory holding the launcher and other executables.
pub const LAUNCHER_DIR: &str = "bin";

/// Top-level directories every image must contain.
pub const REQUIRED_DIRS: [&str; 4] = [LAUNCHER_DIR, "conf", "legal", "lib"];

/// Smallest number of top-level entries a valid image has.
pub const MIN_TOP_LEVEL_ENTRIES: usize = 4;

/// Reason a directory is not a valid runtime image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ImageError {
    /// The root is missing or not a directory.
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),

    /// Too few top-level entries.
    #[error(
        "{path:?} has {count} entries, expected at least {min}",
        min = MIN_TOP_LEVEL_ENTRIES
    )]
    TooFewEntries {
        /// Image root.
        path: PathBuf,
        /// Number of entries found.
        count: usize,
    },

    /// A required top-level directory is missing.
    #[error("{path:?} is missing the {name:?} directory")]
    MissingDir {
        /// Image root.
        path: PathBuf,
        /// Name of the missing directory.
        name: &'static str,
    },

    /// The launcher file is missing.
    #[error("launcher {0:?} not found")]
    MissingLauncher(PathBuf),
}

impl From<ImageError> for UpdateError {
    fn from(value: ImageError) -> Self {
        UpdateError::new(UpdateErrorKind::InvalidInput).with_source(value)
    }
}

/// A runtime image directory of a named application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeImage {
    root: PathBuf,
    app_name: String,
    platform: Platform,
}

impl RuntimeImage {
    /// Creates a handle to the image at `root` without checking it.
    pub fn new<P: Into<PathBuf>>(root: P, app_name: &str, platform: Platform) -> Self {
        Self {
            root: root.into(),
            app_name: app_name.to_string(),
            platform,
        }
    }

    /// Returns the image root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the application name.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Returns the directory holding executables.
    pub fn launcher_dir(&self) -> PathBuf {
        self.root.join(LAUNCHER_DIR)
    }

    /// Returns the path of the application launcher.
    pub fn launcher(&self) -> PathBuf {
        self.launcher_dir()
            .join(self.platform.exe_name(&self.app_name))
    }

    /// Returns the path of an executable in the launcher directory.
    pub fn executable(&self, stem: &str) -> PathBuf {
        self.launcher_dir().join(self.platform.exe_name(stem))
    }

    /// Checks that the directory looks like a runtime image.
    pub fn validate(&self) -> Result<(), ImageError> {
        if !self.root.is_dir() {
            return Err(ImageError::NotADirectory(self.root.clone()));
        }

        let names = std::fs::read_dir(&self.root)
            .map_err(|_| ImageError::NotADirectory(self.root.clone()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name())
            .collect::<Vec<_>>();

        if names.len() < MIN_TOP_LEVEL_ENTRIES {
            return Err(ImageError::TooFewEntries {
                path: self.root.clone(),
                count: names.len(),
            });
        }

        for required in REQUIRED_DIRS {
            if !names.iter().any(|name| name == required) || !self.root.join(required).is_dir() {
                return Err(ImageError::MissingDir {
                    path: self.root.clone(),
                    name: required,
                });
            }
        }

        let launcher = self.launcher();

        if !launcher.is_file() {
            return Err(ImageError::MissingLauncher(launcher));
        }

        Ok(())
    }

    /// Marks the launcher and every other file in the launcher directory as
    /// executable.
    ///
    /// Does nothing on platforms that don't use executable permissions.
    pub fn set_permissions(&self) -> std::io::Result<()> {
        if !self.platform.needs_permission_fixup() {
            return Ok(());
        }

        self.platform.set_executable(&self.launcher())?;

        for entry in std::fs::read_dir(self.launcher_dir())? {
            let entry = entry?;

            if entry.file_type()?.is_file() {
                self.platform.set_executable(&entry.path())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_image(root: &Path, app_name: &str) {
        for name in REQUIRED_DIRS {
            std::fs::create_dir_all(root.join(name)).unwrap();
        }
        std::fs::write(
            root.join(LAUNCHER_DIR)
                .join(Platform::current().unwrap().exe_name(app_name)),
            "#!/bin/sh\n",
        )
        .unwrap();
    }

    #[test]
    fn test_valid_image() {
        let dir = tempfile::tempdir().unwrap();
        make_image(dir.path(), "app");

        let image = RuntimeImage::new(dir.path(), "app", Platform::current().unwrap());
        image.validate().unwrap();
    }

    #[test]
    fn test_missing_launcher() {
        let dir = tempfile::tempdir().unwrap();
        make_image(dir.path(), "other");

        let image = RuntimeImage::new(dir.path(), "app", Platform::current().unwrap());
        assert!(matches!(
            image.validate(),
            Err(ImageError::MissingLauncher(_))
        ));
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        make_image(dir.path(), "app");
        std::fs::remove_dir(dir.path().join("legal")).unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();

        let image = RuntimeImage::new(dir.path(), "app", Platform::current().unwrap());
        assert_eq!(
            image.validate(),
            Err(ImageError::MissingDir {
                path: dir.path().to_path_buf(),
                name: "legal"
            })
        );
    }

    #[test]
    fn test_too_few_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();

        let image = RuntimeImage::new(dir.path(), "app", Platform::current().unwrap());
        assert!(matches!(
            image.validate(),
            Err(ImageError::TooFewEntries { count: 1, .. })
        ));
    }

    #[test]
    fn test_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let image = RuntimeImage::new(dir.path().join("x"), "app", Platform::Posix);
        assert_eq!(
            image.validate(),
            Err(ImageError::NotADirectory(dir.path().join("x")))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_set_permissions() {
        let dir = tempfile::tempdir().unwrap();
        make_image(dir.path(), "app");
        std::fs::write(dir.path().join("bin/helper"), "#!/bin/sh\n").unwrap();
        std::fs::write(dir.path().join("lib/data.txt"), "data").unwrap();

        let image = RuntimeImage::new(dir.path(), "app", Platform::Posix);
        image.set_permissions().unwrap();

        assert!(Platform::Posix.is_executable(&image.launcher()));
        assert!(Platform::Posix.is_executable(&image.executable("helper")));
        assert!(!Platform::Posix.is_executable(&dir.path().join("lib/data.txt")));
    }
}
