//! Self-update for applications shipped as runtime images.
//!
//! A runtime image is a self-contained directory with the application
//! launcher and everything it needs (see [`image`]). This crate checks for
//! new versions, downloads and stages them, and hands over to a small
//! installer program that replaces the running installation.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use handover::distributor::{Distributor, Version};
//! use handover::error::BoxError;
//! use handover::{Updater, UpdaterConfig};
//!
//! struct Releases;
//!
//! impl Distributor for Releases {
//!     type Version = Version;
//!
//!     fn find_latest_version(&self) -> Result<Option<Version>, BoxError> {
//!         Ok(Some(Version::new("2.0.0")))
//!     }
//!
//!     fn download(&self, version: &Version) -> Result<PathBuf, BoxError> {
//!         Ok(PathBuf::from(format!("/tmp/my-app-{version}.zip")))
//!     }
//! }
//!
//! let updater = Updater::builder(UpdaterConfig::new("my-app"), Releases)
//!     .with_done_callback(|installer| {
//!         if let Some(installer) = installer {
//!             installer.install_on_exit()?;
//!         }
//!         Ok(())
//!     })
//!     .build()?;
//!
//! updater.check_for_update();
//! # Ok::<(), handover::error::UpdateError>(())
//! ```
//!
//! ## Update cycle
//!
//! [`Updater::check_for_update()`] starts a cycle on the executor:
//!
//! 1. On the first cycle of an updater, a staging directory left over from
//!    a previous update is deleted and the cycle ends as "no update".
//! 2. The running installation is checked to be a runtime image.
//! 3. The [`distributor::Distributor`] is asked for the latest version and
//!    downloads its archive.
//! 4. The acceptance callback decides whether to install it. It may ask the
//!    user and decide later through the [`callback::Acceptance`] handle.
//! 5. The archive is unpacked into the staging directory, validated, and
//!    its executables are marked as executable.
//! 6. The done callback receives an [`inst::UpdateInstaller`].
//!
//! Every failure is passed to the error callback with a
//! [`error::UpdateErrorKind`] naming the step. The done callback is always
//! called last, after the updater is ready to start another cycle.
//!
//! ## Installing
//!
//! The installer program `handover-installer` must be shipped in the `bin`
//! directory of every image. It runs from the *new* image, waits for the
//! old installation's files to become deletable, replaces them and
//! optionally starts the new launcher. Use one of
//! [`inst::UpdateInstaller::quit_and_launch()`],
//! [`inst::UpdateInstaller::launch_without_exiting()`] or
//! [`inst::UpdateInstaller::install_on_exit()`].
//!
//! ## Limitations
//!
//! Archives are not authenticated. Check signatures in the acceptance
//! callback if needed. There is no rollback: if the installer fails
//! halfway, the installation is left incomplete and the log file is the
//! place to look.
pub use config::UpdaterConfig;
pub use updater::{Updater, UpdaterBuilder};

pub mod archive;
pub mod callback;
pub mod config;
pub mod dir;
pub mod distributor;
pub mod error;
pub mod exec;
pub mod image;
pub mod inst;
pub mod log;
mod machine;
pub mod os;
mod updater;
