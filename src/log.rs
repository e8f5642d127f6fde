//! Diagnostic log file.
//!
//! The installer runs with its standard streams discarded and the
//! application may exit right after an update, so every step of a cycle is
//! also appended to a plain text file. Each line has the form
//! `<epoch-millis> - <message>`.
//!
//! Messages are forwarded to [`tracing`] as well.
use std::{
    fmt::Display,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Appends timestamped lines to a log file.
#[derive(Debug, Clone)]
pub struct UpdateLog {
    path: Option<PathBuf>,
}

impl UpdateLog {
    /// Creates a log writing to the given file.
    ///
    /// The file and its parent directory are created on the first write.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Creates a log that only forwards to [`tracing`].
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Returns the log file path.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Logs an informational message.
    pub fn info<M: Display>(&self, message: M) {
        tracing::info!("{message}");
        self.append(&message.to_string());
    }

    /// Logs a warning.
    pub fn warn<M: Display>(&self, message: M) {
        tracing::warn!("{message}");
        self.append(&format!("WARN: {message}"));
    }

    /// Logs an error.
    pub fn error<M: Display>(&self, message: M) {
        tracing::error!("{message}");
        self.append(&format!("ERROR: {message}"));
    }

    fn append(&self, message: &str) {
        let Some(path) = &self.path else {
            return;
        };

        if let Err(error) = write_line(path, message) {
            tracing::warn!(?path, %error, "could not write to log file");
        }
    }
}

fn write_line(path: &Path, message: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::options().create(true).append(true).open(path)?;
    file.write_all(format_line(epoch_millis(), message).as_bytes())?;
    file.flush()?;

    Ok(())
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default()
}

fn format_line(millis: u128, message: &str) -> String {
    format!("{millis} - {message}\n")
}
