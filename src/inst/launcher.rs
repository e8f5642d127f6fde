use std::{
    convert::Infallible,
    path::{Path, PathBuf},
    process::Child,
    sync::{Mutex, Once},
    time::{Duration, Instant},
};

use crate::{
    config::UpdaterConfig,
    error::{UpdateError, UpdateErrorKind},
    log::UpdateLog,
    os::Platform,
};

use super::InstallerArgs;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallerState {
    Unused,
    Used,
}

/// Handle for installing an unpacked update.
///
/// Passed to the done callback when a cycle succeeds. Only one of the
/// install actions may be used. Further calls fail with
/// [`UpdateErrorKind::AlreadyPerformed`].
#[derive(Debug)]
pub struct UpdateInstaller {
    args: InstallerArgs,
    program: PathBuf,
    platform: Platform,
    wait: Duration,
    log: UpdateLog,
    state: Mutex<InstallerState>,
}

impl UpdateInstaller {
    /// Creates a handle that runs `program` with `args`.
    pub fn new<P: Into<PathBuf>>(args: InstallerArgs, program: P, platform: Platform) -> Self {
        Self {
            args,
            program: program.into(),
            platform,
            wait: crate::config::DEFAULT_INSTALLER_WAIT,
            log: UpdateLog::disabled(),
            state: Mutex::new(InstallerState::Unused),
        }
    }

    /// Creates the handle for installing the staged image described by the
    /// config.
    ///
    /// Fails if the staged image does not contain the installer program.
    ///
    /// Paths are made absolute so the installer does not depend on the
    /// working directory.
    pub fn from_config(config: &UpdaterConfig, platform: Platform) -> Result<Self, UpdateError> {
        let args = InstallerArgs::new(
            &config.current_image,
            config.staging_dir(),
            &config.app_name,
            false,
        )
        .to_absolute()?;
        let program = config
            .staged_image(platform)
            .executable(&config.installer_name);
        let program = std::path::absolute(program)?;

        if !program.is_file() {
            return Err(UpdateError::new(UpdateErrorKind::CreateInstallDescriptor)
                .with_context(format!("installer program {program:?} not found")));
        }

        Ok(Self::new(args, program, platform)
            .with_wait(config.installer_wait)
            .with_log(config.log()))
    }

    /// Sets how long [`Self::launch_without_exiting()`] waits for the
    /// installer.
    pub fn with_wait(mut self, value: Duration) -> Self {
        self.wait = value;
        self
    }

    /// Sets the log.
    pub fn with_log(mut self, value: UpdateLog) -> Self {
        self.log = value;
        self
    }

    /// Returns the installer arguments.
    pub fn args(&self) -> &InstallerArgs {
        &self.args
    }

    /// Returns the installer program path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns whether an install action was already used.
    pub fn is_used(&self) -> bool {
        self.state
            .lock()
            .map(|state| *state == InstallerState::Used)
            .unwrap_or(true)
    }

    /// Starts the installer, which replaces the current installation and
    /// then starts the new version.
    ///
    /// The installer is waited for a short time only. Some platforms do not
    /// allow replacing files of a running program, so the installer usually
    /// finishes after this process exits. Timeouts and installer failures
    /// are written to the log.
    ///
    /// The current process keeps running; the application should exit soon
    /// to avoid two versions running at the same time.
    pub fn launch_without_exiting(&self) -> Result<(), UpdateError> {
        self.mark_used()?;
        self.log.info("Invoking installer");
        self.run_installer(true)
    }

    /// Starts the installer like [`Self::launch_without_exiting()`] and then
    /// exits the process with code 0.
    ///
    /// Returns only when the action was already performed or the installer
    /// could not be started.
    pub fn quit_and_launch(&self) -> Result<Infallible, UpdateError> {
        self.launch_without_exiting()?;
        self.log.info("Exiting process");
        std::process::exit(0)
    }

    /// Runs the installer, without relaunching, once this process exits
    /// normally.
    ///
    /// The installer does not run if the process is killed or aborts.
    pub fn install_on_exit(&self) -> Result<(), UpdateError> {
        self.mark_used()?;
        self.log.info("Will run installer on exit");

        let pending = PendingInstall {
            args: self.args.clone(),
            program: self.program.clone(),
            platform: self.platform,
            wait: self.wait,
            log: self.log.clone(),
        };

        match PENDING_INSTALLS.lock() {
            Ok(mut installs) => installs.push(pending),
            Err(_) => {
                return Err(UpdateError::new(UpdateErrorKind::Other)
                    .with_context("pending install list poisoned"))
            }
        }

        let mut result = Ok(());
        REGISTER_HOOK.call_once(|| {
            result = crate::os::register_exit_hook(run_pending_installs);
        });
        result?;

        Ok(())
    }

    fn mark_used(&self) -> Result<(), UpdateError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| UpdateError::new(UpdateErrorKind::AlreadyPerformed))?;

        match *state {
            InstallerState::Unused => {
                *state = InstallerState::Used;
                Ok(())
            }
            InstallerState::Used => Err(UpdateErrorKind::AlreadyPerformed.into()),
        }
    }

    fn run_installer(&self, relaunch: bool) -> Result<(), UpdateError> {
        run_installer(
            &self.args,
            &self.program,
            self.platform,
            self.wait,
            &self.log,
            relaunch,
        )
    }
}

struct PendingInstall {
    args: InstallerArgs,
    program: PathBuf,
    platform: Platform,
    wait: Duration,
    log: UpdateLog,
}

static PENDING_INSTALLS: Mutex<Vec<PendingInstall>> = Mutex::new(Vec::new());
static REGISTER_HOOK: Once = Once::new();

extern "C" fn run_pending_installs() {
    let installs = match PENDING_INSTALLS.lock() {
        Ok(mut installs) => std::mem::take(&mut *installs),
        Err(_) => return,
    };

    for install in installs {
        let _ = run_installer(
            &install.args,
            &install.program,
            install.platform,
            install.wait,
            &install.log,
            false,
        );
    }
}

fn run_installer(
    args: &InstallerArgs,
    program: &Path,
    platform: Platform,
    wait: Duration,
    log: &UpdateLog,
    relaunch: bool,
) -> Result<(), UpdateError> {
    tracing::debug!(?program, ?args, relaunch, "run installer");

    let child = platform
        .spawn_detached(program, args.to_args(relaunch))
        .map_err(|error| {
            log.error(format!("Could not start installer {program:?}: {error}"));
            UpdateError::from(error).with_context(format!("could not start installer {program:?}"))
        })?;

    wait_for_installer(child, wait, log);

    Ok(())
}

fn wait_for_installer(mut child: Child, wait: Duration, log: &UpdateLog) {
    let deadline = Instant::now() + wait;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    log.error(format!("Installer exited with {status}"));
                }
                return;
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    log.warn("Installer did not end in time");
                    return;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(error) => {
                log.error(format!("Could not wait for installer: {error}"));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installer(dir: &Path) -> UpdateInstaller {
        let args = InstallerArgs::new(dir.join("current"), dir.join("new"), "app", false);
        UpdateInstaller::new(args, dir.join("missing-installer"), Platform::current().unwrap())
            .with_wait(Duration::from_millis(100))
            .with_log(UpdateLog::new(dir.join("test.log")))
    }

    #[test]
    fn test_second_action_fails() {
        let dir = tempfile::tempdir().unwrap();
        let installer = installer(dir.path());

        assert!(!installer.is_used());
        assert!(installer.launch_without_exiting().is_err());
        assert!(installer.is_used());

        let error = installer.launch_without_exiting().unwrap_err();
        assert_eq!(error.kind(), &UpdateErrorKind::AlreadyPerformed);

        let error = installer.install_on_exit().unwrap_err();
        assert_eq!(error.kind(), &UpdateErrorKind::AlreadyPerformed);

        let error = installer.quit_and_launch().unwrap_err();
        assert_eq!(error.kind(), &UpdateErrorKind::AlreadyPerformed);
    }

    #[test]
    fn test_missing_program_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let installer = installer(dir.path());

        let error = installer.launch_without_exiting().unwrap_err();
        assert!(error.is_io());

        let log = std::fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert!(log.contains("Could not start installer"));
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_logs_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("installer.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 56\n").unwrap();
        Platform::Posix.set_executable(&script).unwrap();

        let args = InstallerArgs::new(dir.path().join("a"), dir.path().join("b"), "app", false);
        let installer = UpdateInstaller::new(args, &script, Platform::Posix)
            .with_wait(Duration::from_secs(10))
            .with_log(UpdateLog::new(dir.path().join("test.log")));

        installer.launch_without_exiting().unwrap();

        let log = std::fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert!(log.contains("ERROR: Installer exited with"), "{log}");
        assert!(log.contains("56"), "{log}");
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("installer.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        Platform::Posix.set_executable(&script).unwrap();

        let args = InstallerArgs::new(dir.path().join("a"), dir.path().join("b"), "app", false);
        let installer = UpdateInstaller::new(args, &script, Platform::Posix)
            .with_wait(Duration::from_millis(200))
            .with_log(UpdateLog::new(dir.path().join("test.log")));

        let start = Instant::now();
        installer.launch_without_exiting().unwrap();
        assert!(start.elapsed() < Duration::from_secs(4));

        let log = std::fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert!(log.contains("WARN: Installer did not end in time"), "{log}");
    }
}
