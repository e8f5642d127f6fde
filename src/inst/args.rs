use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Flag requesting the launcher to be started after installing.
pub const RELAUNCH_FLAG: &str = "relaunch";

/// Flag requesting no relaunch.
pub const NO_RELAUNCH_FLAG: &str = "norelaunch";

/// Invalid installer command line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ArgsError {
    /// Fewer than four arguments.
    #[error(
        "expected at least 4 arguments: current image, new image, app name, relaunch|norelaunch (got {0})"
    )]
    TooFew(usize),

    /// The application name is not valid Unicode.
    #[error("application name is not valid Unicode")]
    InvalidAppName,

    /// The last argument is neither flag.
    #[error("invalid argument {0:?}, expected relaunch|norelaunch")]
    InvalidFlag(String),
}

/// Instructions for the installer program.
///
/// The value is passed to the installer as four positional arguments:
///
/// ```text
/// handover-installer <current image> <new image> <app name> relaunch|norelaunch
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerArgs {
    current_image: PathBuf,
    new_image: PathBuf,
    app_name: String,
    relaunch: bool,
}

impl InstallerArgs {
    /// Creates the arguments.
    pub fn new<C, N>(current_image: C, new_image: N, app_name: &str, relaunch: bool) -> Self
    where
        C: Into<PathBuf>,
        N: Into<PathBuf>,
    {
        Self {
            current_image: current_image.into(),
            new_image: new_image.into(),
            app_name: app_name.to_string(),
            relaunch,
        }
    }

    /// Parses the installer's command line arguments, excluding the program
    /// name.
    ///
    /// Arguments after the fourth are ignored.
    pub fn parse<I, S>(args: I) -> Result<Self, ArgsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args = args.into_iter().map(Into::into).collect::<Vec<OsString>>();

        let [current, new, app_name, flag, ..] = args.as_slice() else {
            return Err(ArgsError::TooFew(args.len()));
        };

        let app_name = app_name.to_str().ok_or(ArgsError::InvalidAppName)?;
        let relaunch = match flag.to_str() {
            Some(RELAUNCH_FLAG) => true,
            Some(NO_RELAUNCH_FLAG) => false,
            _ => return Err(ArgsError::InvalidFlag(flag.to_string_lossy().into_owned())),
        };

        Ok(Self::new(current, new, app_name, relaunch))
    }

    /// Directory of the installation being replaced.
    pub fn current_image(&self) -> &Path {
        &self.current_image
    }

    /// Directory of the unpacked update.
    pub fn new_image(&self) -> &Path {
        &self.new_image
    }

    /// Application name.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Whether the launcher is started after installing.
    pub fn relaunch(&self) -> bool {
        self.relaunch
    }

    /// Returns a copy with absolute paths.
    pub fn to_absolute(&self) -> std::io::Result<Self> {
        Ok(Self {
            current_image: std::path::absolute(&self.current_image)?,
            new_image: std::path::absolute(&self.new_image)?,
            app_name: self.app_name.clone(),
            relaunch: self.relaunch,
        })
    }

    /// Returns the command line for the installer with the given relaunch
    /// flag.
    pub fn to_args(&self, relaunch: bool) -> Vec<OsString> {
        vec![
            self.current_image.clone().into_os_string(),
            self.new_image.clone().into_os_string(),
            OsString::from(&self.app_name),
            OsString::from(if relaunch {
                RELAUNCH_FLAG
            } else {
                NO_RELAUNCH_FLAG
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let args = InstallerArgs::parse(["/opt/app", "/home/u/.app/update", "app", "relaunch"])
            .unwrap();

        assert_eq!(args.current_image(), Path::new("/opt/app"));
        assert_eq!(args.new_image(), Path::new("/home/u/.app/update"));
        assert_eq!(args.app_name(), "app");
        assert!(args.relaunch());

        let args =
            InstallerArgs::parse(["a", "b", "c", "norelaunch", "extra"]).unwrap();
        assert!(!args.relaunch());
    }

    #[test]
    fn test_parse_too_few() {
        assert_eq!(
            InstallerArgs::parse(["a", "b", "c"]),
            Err(ArgsError::TooFew(3))
        );
        assert_eq!(
            InstallerArgs::parse(Vec::<String>::new()),
            Err(ArgsError::TooFew(0))
        );
    }

    #[test]
    fn test_parse_bad_flag() {
        assert_eq!(
            InstallerArgs::parse(["a", "b", "c", "yes"]),
            Err(ArgsError::InvalidFlag("yes".to_string()))
        );
    }

    #[test]
    fn test_to_args_overrides_relaunch() {
        let args = InstallerArgs::new("/opt/app", "/tmp/new", "app", false);

        assert_eq!(
            args.to_args(true),
            vec![
                OsString::from("/opt/app"),
                OsString::from("/tmp/new"),
                OsString::from("app"),
                OsString::from("relaunch"),
            ]
        );
        assert_eq!(
            InstallerArgs::parse(args.to_args(false)).unwrap(),
            args
        );
    }

    #[test]
    fn test_to_absolute() {
        let args = InstallerArgs::new("relative/app", "other", "app", false)
            .to_absolute()
            .unwrap();

        assert!(args.current_image().is_absolute());
        assert!(args.current_image().ends_with("relative/app"));
        assert!(args.new_image().is_absolute());
    }
}
