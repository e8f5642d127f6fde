//! Source of new application versions.
//!
//! A distributor knows where releases are published. The updater only asks
//! it two things: what the latest version is, and to fetch the archive of
//! that version to a local file.
use std::path::PathBuf;

use crate::error::BoxError;

/// Identifier of an application release.
pub trait AppVersion {
    /// Returns the human readable version name, such as `1.2.0`.
    fn name(&self) -> &str;
}

/// Ready-made release identifier.
///
/// The payload is free for the distributor to use, for example to hold a
/// download URL or a checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    name: String,
    payload: Option<String>,
}

impl Version {
    /// Creates a version without a payload.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    /// Sets the payload.
    pub fn with_payload<S: Into<String>>(mut self, payload: S) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Returns the payload.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

impl AppVersion for Version {
    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Finds and downloads new versions of the application.
///
/// Methods are called from the executor's thread and may block.
pub trait Distributor: Send + Sync + 'static {
    /// Version type produced by this distributor.
    type Version: AppVersion + Send + 'static;

    /// Returns the latest version newer than the running one, or `None` when
    /// the application is up to date.
    fn find_latest_version(&self) -> Result<Option<Self::Version>, BoxError>;

    /// Downloads the archive of `version` and returns its local path.
    ///
    /// The archive is owned by the updater afterwards and deleted once it
    /// has been unpacked.
    fn download(&self, version: &Self::Version) -> Result<PathBuf, BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = Version::new("1.2.0").with_payload("https://example.com/app-1.2.0.zip");

        assert_eq!(version.name(), "1.2.0");
        assert_eq!(version.payload(), Some("https://example.com/app-1.2.0.zip"));
        assert_eq!(version.to_string(), "1.2.0");
        assert_eq!(Version::new("2").payload(), None);
    }
}
