//! OS specific functionalities.
//!
//! Platform differences (launcher file names, executable permissions,
//! detached process creation) are collected behind [`Platform`], which is
//! selected once with [`Platform::current()`] and passed to the code that
//! needs it.

pub use std::env::current_exe;
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

use crate::error::{UpdateError, UpdateErrorKind};

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(windows)]
pub(crate) mod windows;

/// OS specific error wrapper.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OsError {
    /// Standard IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other error.
    #[error("{0}")]
    Other(&'static str),
}

impl From<OsError> for UpdateError {
    fn from(value: OsError) -> Self {
        UpdateError::new(UpdateErrorKind::Io).with_source(value)
    }
}

/// Operating system family the updater runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Unix-like systems with POSIX file permissions.
    Posix,
    /// Microsoft Windows.
    Windows,
}

impl Platform {
    /// Returns the platform of the running process.
    pub fn current() -> Result<Self, UpdateError> {
        match std::env::consts::FAMILY {
            "unix" => Ok(Self::Posix),
            "windows" => Ok(Self::Windows),
            _ => Err(UpdateErrorKind::UnsupportedOsFamily.into()),
        }
    }

    /// Suffix appended to executable file names.
    pub fn exe_suffix(self) -> &'static str {
        match self {
            Self::Posix => "",
            Self::Windows => ".exe",
        }
    }

    /// Returns the file name of an executable with the given stem.
    pub fn exe_name(self, stem: &str) -> String {
        format!("{stem}{}", self.exe_suffix())
    }

    /// Whether executable permissions have to be set explicitly after files
    /// are copied or extracted.
    pub fn needs_permission_fixup(self) -> bool {
        matches!(self, Self::Posix)
    }

    /// Marks the file as executable.
    ///
    /// Does nothing on platforms without executable permission bits.
    pub fn set_executable(self, path: &Path) -> std::io::Result<()> {
        match self {
            Self::Posix => {
                #[cfg(unix)]
                {
                    let mode = unix::get_effective_posix_permission(true);
                    tracing::debug!(?path, mode, "set POSIX permissions");
                    unix::set_posix_permission(path, mode)?;
                }
                Ok(())
            }
            Self::Windows => Ok(()),
        }
    }

    /// Returns whether the file can be executed by the current user.
    pub fn is_executable(self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }

        match self {
            Self::Posix => {
                #[cfg(unix)]
                {
                    unix::is_executable(path)
                }
                #[cfg(not(unix))]
                {
                    true
                }
            }
            Self::Windows => true,
        }
    }

    /// Spawns a program detached from the current process with all standard
    /// streams discarded.
    pub fn spawn_detached<I, S>(self, program: &Path, args: I) -> std::io::Result<Child>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        tracing::debug!(?program, "spawn detached");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(dir) = program.parent() {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        unix::detach(&mut command);
        #[cfg(windows)]
        windows::detach(&mut command);

        command.spawn()
    }
}

/// Returns the directory portion of the current executable's path.
///
/// See also [`std::env::current_exe()`].
pub fn current_exe_dir() -> std::io::Result<PathBuf> {
    tracing::trace!("current_exe_dir");
    let mut path = std::env::current_exe()?;
    path.pop();

    Ok(path)
}

/// Returns the root of the runtime image the current executable belongs to.
///
/// The launcher lives one directory below the image root, so this is the
/// parent of [`current_exe_dir()`].
pub fn current_image_root() -> std::io::Result<PathBuf> {
    let dir = current_exe_dir()?;
    dir.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| std::io::Error::other("executable is not inside an image directory"))
}

/// Returns the default directory for private application data.
///
/// This is `$HOME/.[app-name]` on Unix and `%LocalAppData%\[app-name]` on
/// Windows.
pub fn default_app_home(app_name: &str) -> Result<PathBuf, UpdateError> {
    match std::env::consts::FAMILY {
        "unix" => Ok(PathBuf::from(env_var("HOME")?).join(format!(".{app_name}"))),
        "windows" => Ok(PathBuf::from(env_var("LocalAppData")?).join(app_name)),
        _ => Err(UpdateErrorKind::UnsupportedOsFamily.into()),
    }
}

/// Registers a function to run when the process exits normally.
///
/// The function runs when `main` returns or [`std::process::exit()`] is
/// called, but not when the process is killed or aborts.
pub(crate) fn register_exit_hook(hook: extern "C" fn()) -> std::io::Result<()> {
    let result = unsafe {
        // SAFETY: the hook is a plain function with static lifetime.
        libc::atexit(hook)
    };

    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::other("could not register exit hook"))
    }
}

pub(crate) fn env_var<A: AsRef<OsStr>>(key: A) -> Result<OsString, UpdateError> {
    tracing::trace!(key = ?key.as_ref(), "env_var");
    std::env::var_os(key.as_ref())
        .ok_or_else(|| UpdateErrorKind::InvalidEnvironmentVariable.into())
}
