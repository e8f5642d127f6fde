//! Updater configuration.
use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AddContext, UpdateError, UpdateErrorKind},
    image::RuntimeImage,
    log::UpdateLog,
    os::Platform,
};

/// Name of the staging directory inside the application home.
pub const DEFAULT_STAGING_DIR_NAME: &str = "handover-update";

/// Name of the log file inside the application home.
pub const DEFAULT_LOG_FILE_NAME: &str = "handover.log";

/// Name of the installer executable inside an image's launcher directory.
pub const DEFAULT_INSTALLER_NAME: &str = "handover-installer";

/// Log file written by the installer next to the staging directory.
pub const INSTALLER_LOG_FILE_NAME: &str = "handover-installer.log";

/// How long the installer is waited for before giving up.
pub const DEFAULT_INSTALLER_WAIT: Duration = Duration::from_secs(2);

/// Parameters that control where and how updates are applied.
///
/// Paths left empty are filled in by [`Self::resolve()`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct UpdaterConfig {
    /// Application name.
    ///
    /// Matches the launcher file name in the image's `bin` directory.
    pub app_name: String,

    /// Directory for private application data, such as the staging
    /// directory and the log file.
    ///
    /// This is NOT the installation directory.
    pub app_home: PathBuf,

    /// Root of the runtime image that is currently running.
    pub current_image: PathBuf,

    /// Name of the directory inside `app_home` where updates are unpacked.
    pub staging_dir_name: String,

    /// Log file. If empty, `app_home/handover.log` is used.
    pub log_file: PathBuf,

    /// File stem of the installer executable in the new image's `bin`
    /// directory.
    pub installer_name: String,

    /// How long [`crate::inst::UpdateInstaller::launch_without_exiting()`]
    /// waits for the installer process.
    pub installer_wait: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            app_home: PathBuf::new(),
            current_image: PathBuf::new(),
            staging_dir_name: DEFAULT_STAGING_DIR_NAME.to_string(),
            log_file: PathBuf::new(),
            installer_name: DEFAULT_INSTALLER_NAME.to_string(),
            installer_wait: DEFAULT_INSTALLER_WAIT,
        }
    }
}

impl UpdaterConfig {
    /// Creates a config for the named application with default locations.
    pub fn new<S: Into<String>>(app_name: S) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Sets the `app_home` field.
    pub fn with_app_home<P: Into<PathBuf>>(mut self, value: P) -> Self {
        self.app_home = value.into();
        self
    }

    /// Sets the `current_image` field.
    pub fn with_current_image<P: Into<PathBuf>>(mut self, value: P) -> Self {
        self.current_image = value.into();
        self
    }

    /// Sets the `staging_dir_name` field.
    pub fn with_staging_dir_name<S: Into<String>>(mut self, value: S) -> Self {
        self.staging_dir_name = value.into();
        self
    }

    /// Sets the `log_file` field.
    pub fn with_log_file<P: Into<PathBuf>>(mut self, value: P) -> Self {
        self.log_file = value.into();
        self
    }

    /// Sets the `installer_name` field.
    pub fn with_installer_name<S: Into<String>>(mut self, value: S) -> Self {
        self.installer_name = value.into();
        self
    }

    /// Sets the `installer_wait` field.
    pub fn with_installer_wait(mut self, value: Duration) -> Self {
        self.installer_wait = value;
        self
    }

    /// Checks the values and fills in default locations.
    ///
    /// * `app_home` defaults to [`crate::os::default_app_home()`].
    /// * `current_image` defaults to [`crate::os::current_image_root()`].
    /// * `log_file` defaults to `app_home/handover.log`.
    pub fn resolve(mut self) -> Result<Self, UpdateError> {
        if self.app_name.is_empty() || self.app_name.contains(['/', '\\']) {
            return Err(UpdateError::new(UpdateErrorKind::InvalidInput)
                .with_context(format!("invalid application name {:?}", self.app_name)));
        }

        if self.staging_dir_name.is_empty() || self.staging_dir_name.contains(['/', '\\']) {
            return Err(UpdateError::new(UpdateErrorKind::InvalidInput)
                .with_context(format!(
                    "invalid staging directory name {:?}",
                    self.staging_dir_name
                )));
        }

        if self.app_home.as_os_str().is_empty() {
            self.app_home = crate::os::default_app_home(&self.app_name)?;
        }

        if self.current_image.as_os_str().is_empty() {
            self.current_image = crate::os::current_image_root()?;
        }

        if self.log_file.as_os_str().is_empty() {
            self.log_file = self.app_home.join(DEFAULT_LOG_FILE_NAME);
        }

        tracing::debug!(config = ?self, "resolved config");

        Ok(self)
    }

    /// Returns the staging directory where updates are unpacked.
    pub fn staging_dir(&self) -> PathBuf {
        self.app_home.join(&self.staging_dir_name)
    }

    /// Returns the log for this config.
    pub fn log(&self) -> UpdateLog {
        if self.log_file.as_os_str().is_empty() {
            UpdateLog::disabled()
        } else {
            UpdateLog::new(&self.log_file)
        }
    }

    /// Returns the currently running image.
    pub fn current_image(&self, platform: Platform) -> RuntimeImage {
        RuntimeImage::new(&self.current_image, &self.app_name, platform)
    }

    /// Returns the staged new image.
    pub fn staged_image(&self, platform: Platform) -> RuntimeImage {
        RuntimeImage::new(self.staging_dir(), &self.app_name, platform)
    }

    /// Deserialize from the RON file at the given path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, UpdateError> {
        let path = path.as_ref();
        let buf = std::fs::read_to_string(path)
            .with_contextc(|_error| format!("could not open file {path:?}"))?;

        ron::from_str::<Self>(&buf).map_err(|error| {
            UpdateError::new(UpdateErrorKind::InvalidInput)
                .with_context(format!("malformed config file {path:?}"))
                .with_source(error)
        })
    }

    /// Serialize to a RON file at the given path.
    ///
    /// The file is replaced atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), UpdateError> {
        let path = path.as_ref();
        let text = ron::ser::to_string_pretty(self, PrettyConfig::default())
            .map_err(|error| UpdateError::new(UpdateErrorKind::Other).with_source(error))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
        temp_file.write_all(text.as_bytes())?;
        temp_file.flush()?;
        temp_file
            .persist(path)
            .map_err(|error| UpdateError::from(error.error))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_fills_defaults() {
        let config = UpdaterConfig::new("app")
            .with_app_home("/data/app")
            .with_current_image("/opt/app")
            .resolve()
            .unwrap();

        assert_eq!(config.log_file, PathBuf::from("/data/app/handover.log"));
        assert_eq!(config.staging_dir(), PathBuf::from("/data/app/handover-update"));
        assert_eq!(config.installer_wait, Duration::from_secs(2));
    }

    #[test]
    fn test_resolve_rejects_bad_names() {
        let error = UpdaterConfig::new("")
            .with_app_home("/a")
            .with_current_image("/b")
            .resolve()
            .unwrap_err();
        assert_eq!(error.kind(), &UpdateErrorKind::InvalidInput);

        let error = UpdaterConfig::new("app")
            .with_app_home("/a")
            .with_current_image("/b")
            .with_staging_dir_name("../x")
            .resolve()
            .unwrap_err();
        assert_eq!(error.kind(), &UpdateErrorKind::InvalidInput);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updater.ron");
        let config = UpdaterConfig::new("app")
            .with_app_home(dir.path())
            .with_installer_wait(Duration::from_millis(250));

        config.save(&path).unwrap();
        let loaded = UpdaterConfig::load(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updater.ron");
        std::fs::write(&path, r#"(app_name: "demo")"#).unwrap();

        let loaded = UpdaterConfig::load(&path).unwrap();

        assert_eq!(loaded.app_name, "demo");
        assert_eq!(loaded.staging_dir_name, DEFAULT_STAGING_DIR_NAME);
    }

    #[test]
    fn test_load_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updater.ron");
        std::fs::write(&path, "not ron at all (").unwrap();

        let error = UpdaterConfig::load(&path).unwrap_err();
        assert_eq!(error.kind(), &UpdateErrorKind::InvalidInput);
    }
}
