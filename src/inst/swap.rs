//! Replacement of the current installation by the installer program.
use std::path::{Path, PathBuf};

use crate::{
    config::INSTALLER_LOG_FILE_NAME,
    dir::{DirError, RetryPolicy},
    error::format_error,
    image::RuntimeImage,
    log::UpdateLog,
    os::Platform,
};

use super::InstallerArgs;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for invalid arguments.
pub const EXIT_INVALID_ARGS: i32 = 54;
/// Exit code for a failed copy or permission change.
pub const EXIT_COPY_FAILED: i32 = 55;
/// Exit code for a current installation that could not be deleted.
pub const EXIT_DELETE_FAILED: i32 = 56;
/// Exit code for a launcher that is not executable or could not be started.
pub const EXIT_LAUNCHER_FAILED: i32 = 57;

/// Failure while replacing the installation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SwapError {
    /// The current installation could not be emptied.
    #[error("could not delete the current installation")]
    Delete(#[source] DirError),

    /// The new image could not be copied.
    #[error("could not copy the new image")]
    Copy(#[source] DirError),

    /// Executable permissions could not be set.
    #[error("could not set executable permissions")]
    Permissions(#[source] std::io::Error),

    /// The installed launcher cannot be executed.
    #[error("launcher {0:?} is not executable")]
    LauncherNotExecutable(PathBuf),

    /// The installed launcher could not be started.
    #[error("could not start launcher {path:?}")]
    Relaunch {
        /// Launcher path.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },
}

impl SwapError {
    /// Returns the installer exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Delete(_) => EXIT_DELETE_FAILED,
            Self::Copy(_) | Self::Permissions(_) => EXIT_COPY_FAILED,
            Self::LauncherNotExecutable(_) | Self::Relaunch { .. } => EXIT_LAUNCHER_FAILED,
        }
    }
}

/// Replaces the current installation with the new image.
///
/// The relaunched launcher is not waited for.
pub fn run(
    args: &InstallerArgs,
    policy: &RetryPolicy,
    platform: Platform,
    log: &UpdateLog,
) -> Result<(), SwapError> {
    let current = args.current_image();
    let new = args.new_image();

    log.info(format!("Installing {new:?} into {current:?}"));

    policy
        .run(|attempt| {
            crate::dir::delete_contents(current).inspect_err(|error| {
                log.warn(format!(
                    "Failed to delete old installation (attempt {}): {error}",
                    attempt + 1
                ));
            })
        })
        .map_err(SwapError::Delete)?;
    log.info("Deleted old installation");

    crate::dir::copy_contents(new, current).map_err(SwapError::Copy)?;
    log.info("Copied new installation");

    let image = RuntimeImage::new(current, args.app_name(), platform);
    image.set_permissions().map_err(SwapError::Permissions)?;

    if args.relaunch() {
        relaunch(&image, platform, log)?;
    }

    Ok(())
}

fn relaunch(image: &RuntimeImage, platform: Platform, log: &UpdateLog) -> Result<(), SwapError> {
    let launcher = image.launcher();

    if !platform.is_executable(&launcher) {
        return Err(SwapError::LauncherNotExecutable(launcher));
    }

    platform
        .spawn_detached(&launcher, std::iter::empty::<&str>())
        .map_err(|source| SwapError::Relaunch {
            path: launcher.clone(),
            source,
        })?;
    log.info(format!("Started {launcher:?}"));

    Ok(())
}

/// Returns the installer log written next to the new image.
pub fn installer_log(new_image: &Path) -> UpdateLog {
    match new_image.parent() {
        Some(parent) => UpdateLog::new(parent.join(INSTALLER_LOG_FILE_NAME)),
        None => UpdateLog::disabled(),
    }
}

/// Entry point of the installer program.
///
/// Takes the command line arguments without the program name and returns
/// the process exit code.
pub fn installer_main<I, S>(args: I) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString>,
{
    let args = match InstallerArgs::parse(args) {
        Ok(args) => args,
        Err(error) => {
            tracing::error!(%error, "invalid arguments");
            return EXIT_INVALID_ARGS;
        }
    };

    let log = installer_log(args.new_image());

    let platform = match Platform::current() {
        Ok(platform) => platform,
        Err(error) => {
            log.error(format_error(&error));
            return EXIT_COPY_FAILED;
        }
    };

    log.info("Installer running");

    match run(&args, &RetryPolicy::default(), platform, &log) {
        Ok(()) => {
            log.info("Installer successful");
            EXIT_SUCCESS
        }
        Err(error) => {
            log.error(format_error(&error));
            error.exit_code()
        }
    }
}
