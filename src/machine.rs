//! Update cycle state machine.
//!
//! A cycle is a chain of [`Step`]s. Each step runs as one job on the
//! executor and returns a [`Transition`]: the next step is submitted as a
//! new job, the cycle suspends while the acceptance callback decides, or the
//! cycle ends with an [`Outcome`]. Steps never run concurrently because a
//! step is only submitted once the previous one has returned.
//!
//! Every step failure, including panics, ends the cycle through
//! [`finish()`], which reports the error, releases the running guard and
//! calls the done callback, in that order.
use std::{
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    callback::{Acceptance, Callbacks, Decision},
    config::UpdaterConfig,
    distributor::{AppVersion, Distributor},
    error::{format_error, BoxError, PanicError, UpdateError, UpdateErrorKind},
    exec::{Executor, RejectedJob},
    inst::UpdateInstaller,
    log::UpdateLog,
    os::Platform,
};

/// State shared by the updater and the jobs of its cycles.
pub(crate) struct Shared<D: Distributor> {
    pub(crate) config: UpdaterConfig,
    pub(crate) platform: Platform,
    pub(crate) distributor: D,
    pub(crate) callbacks: Callbacks,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) log: UpdateLog,
    pub(crate) running: AtomicBool,
    pub(crate) first_run: AtomicBool,
}

enum Step<V> {
    Start,
    ValidateCurrentImage,
    CheckVersion,
    Download(V),
    Verify { version: String, archive: PathBuf },
    Unpack { archive: PathBuf },
    ValidateNewImage { archive: PathBuf },
    SetPermissions { archive: PathBuf },
    CreateInstaller { archive: PathBuf },
}

impl<V> Step<V> {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ValidateCurrentImage => "validate current image",
            Self::CheckVersion => "check version",
            Self::Download(_) => "download",
            Self::Verify { .. } => "verify",
            Self::Unpack { .. } => "unpack",
            Self::ValidateNewImage { .. } => "validate new image",
            Self::SetPermissions { .. } => "set permissions",
            Self::CreateInstaller { .. } => "create installer",
        }
    }

    /// Kind reported when the step fails without a more specific kind.
    fn failure_kind(&self) -> UpdateErrorKind {
        match self {
            Self::Start | Self::ValidateCurrentImage => UpdateErrorKind::CurrentImageInvalid,
            Self::CheckVersion => UpdateErrorKind::LatestVersionCheck,
            Self::Download(_) => UpdateErrorKind::Download,
            Self::Verify { .. } => UpdateErrorKind::VerifyUpdate,
            Self::Unpack { .. } | Self::SetPermissions { .. } => UpdateErrorKind::Unpack,
            Self::ValidateNewImage { .. } => UpdateErrorKind::UpgradeImageInvalid,
            Self::CreateInstaller { .. } => UpdateErrorKind::CreateInstallDescriptor,
        }
    }
}

enum Transition<V> {
    Next(Step<V>),
    Suspend,
    End(Outcome),
}

/// How a cycle ended.
pub(crate) enum Outcome {
    NoUpdate,
    Rejected,
    Failed(UpdateError),
    Installed {
        installer: UpdateInstaller,
        warning: Option<UpdateError>,
    },
}

/// Starts a cycle. The caller must have set the running guard.
pub(crate) fn start<D: Distributor>(shared: &Arc<Shared<D>>) {
    submit(shared, Step::Start);
}

fn submit<D: Distributor>(shared: &Arc<Shared<D>>, step: Step<D::Version>) {
    let name = step.name();
    let job_shared = shared.clone();
    let result = shared
        .executor
        .submit(Box::new(move || run_step(&job_shared, step)));

    if let Err(error) = result {
        rejected(shared, name, error);
    }
}

fn submit_transition<D: Distributor>(shared: &Arc<Shared<D>>, transition: Transition<D::Version>) {
    let job_shared = shared.clone();
    let result = shared
        .executor
        .submit(Box::new(move || apply(&job_shared, transition)));

    if let Err(error) = result {
        rejected(shared, "decision", error);
    }
}

/// Ends the cycle on the calling thread when the executor refuses a job.
fn rejected<D: Distributor>(shared: &Shared<D>, name: &str, error: RejectedJob) {
    let error = UpdateError::new(UpdateErrorKind::Other)
        .with_context(format!("could not schedule step {name}"))
        .with_source(error);

    finish(shared, Outcome::Failed(error));
}

fn run_step<D: Distributor>(shared: &Arc<Shared<D>>, step: Step<D::Version>) {
    let name = step.name();
    let kind = step.failure_kind();

    tracing::debug!(step = name, "run step");

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| execute(shared, step)));

    let transition = match result {
        Ok(Ok(transition)) => transition,
        Ok(Err(error)) => Transition::End(Outcome::Failed(error.reclassify(kind))),
        Err(payload) => Transition::End(Outcome::Failed(
            UpdateError::new(kind)
                .with_context(format!("step {name}"))
                .with_source(PanicError::from_payload(payload)),
        )),
    };

    apply(shared, transition);
}

fn apply<D: Distributor>(shared: &Arc<Shared<D>>, transition: Transition<D::Version>) {
    match transition {
        Transition::Next(step) => submit(shared, step),
        Transition::Suspend => {}
        Transition::End(outcome) => finish(shared, outcome),
    }
}

fn execute<D: Distributor>(
    shared: &Arc<Shared<D>>,
    step: Step<D::Version>,
) -> Result<Transition<D::Version>, UpdateError> {
    match step {
        Step::Start => start_cycle(shared),
        Step::ValidateCurrentImage => validate_current_image(shared),
        Step::CheckVersion => check_version(shared),
        Step::Download(version) => download(shared, version),
        Step::Verify { version, archive } => verify(shared, &version, archive),
        Step::Unpack { archive } => unpack(shared, archive),
        Step::ValidateNewImage { archive } => validate_new_image(shared, archive),
        Step::SetPermissions { archive } => set_permissions(shared, archive),
        Step::CreateInstaller { archive } => create_installer(shared, archive),
    }
}

fn start_cycle<D: Distributor>(
    shared: &Shared<D>,
) -> Result<Transition<D::Version>, UpdateError> {
    if shared.first_run.swap(false, Ordering::AcqRel) {
        shared.log.info("First run");

        let staging_dir = shared.config.staging_dir();

        if staging_dir.is_dir() {
            // Left over from an update that was installed before this run.
            shared.log.info("Cleaning up previous update");

            if let Err(error) = crate::dir::delete_tree(&staging_dir) {
                shared.log.error(format_error(&error));
            }

            return Ok(Transition::End(Outcome::NoUpdate));
        }
    }

    Ok(Transition::Next(Step::ValidateCurrentImage))
}

fn validate_current_image<D: Distributor>(
    shared: &Shared<D>,
) -> Result<Transition<D::Version>, UpdateError> {
    let image = shared.config.current_image(shared.platform);

    image.validate().map_err(|error| {
        UpdateError::new(UpdateErrorKind::CurrentImageInvalid)
            .with_context(format!("home: {:?}", image.root()))
            .with_source(error)
    })?;

    Ok(Transition::Next(Step::CheckVersion))
}

fn check_version<D: Distributor>(
    shared: &Shared<D>,
) -> Result<Transition<D::Version>, UpdateError> {
    shared.log.info("Checking for update");

    let version = shared
        .distributor
        .find_latest_version()
        .map_err(|error| {
            UpdateError::new(UpdateErrorKind::LatestVersionCheck).with_boxed_source(error)
        })?;

    match version {
        Some(version) => {
            shared.log.info(format!("Found version {}", version.name()));
            Ok(Transition::Next(Step::Download(version)))
        }
        None => Ok(Transition::End(Outcome::NoUpdate)),
    }
}

fn download<D: Distributor>(
    shared: &Shared<D>,
    version: D::Version,
) -> Result<Transition<D::Version>, UpdateError> {
    shared
        .log
        .info(format!("Downloading version {}", version.name()));

    let archive = shared.distributor.download(&version).map_err(|error| {
        UpdateError::new(UpdateErrorKind::Download)
            .with_context(format!("version {}", version.name()))
            .with_boxed_source(error)
    })?;

    tracing::debug!(?archive, "downloaded");

    Ok(Transition::Next(Step::Verify {
        version: version.name().to_string(),
        archive,
    }))
}

fn verify<D: Distributor>(
    shared: &Arc<Shared<D>>,
    version: &str,
    archive: PathBuf,
) -> Result<Transition<D::Version>, UpdateError> {
    shared.log.info("Verifying update");

    let decision_shared = shared.clone();
    let decision_archive = archive.clone();

    let (acceptance, guard) = Acceptance::pending(move |decision| {
        let transition = match decision {
            Decision::Accept => Transition::Next(Step::Unpack {
                archive: decision_archive,
            }),
            Decision::Reject => {
                decision_shared.log.info("Update rejected");
                Transition::End(Outcome::Rejected)
            }
            Decision::Fail(error) => Transition::End(Outcome::Failed(
                UpdateError::new(UpdateErrorKind::VerifyUpdate).with_boxed_source(error),
            )),
            Decision::Abandoned => Transition::End(Outcome::Failed(
                UpdateError::new(UpdateErrorKind::VerifyUpdate)
                    .with_context("update was neither accepted nor rejected"),
            )),
        };

        submit_transition(&decision_shared, transition);
    });

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        (shared.callbacks.on_update)(version, &archive, acceptance)
    }))
    .unwrap_or_else(|payload| Err(Box::new(PanicError::from_payload(payload)) as BoxError));

    guard.finish(result);

    Ok(Transition::Suspend)
}

fn unpack<D: Distributor>(
    shared: &Shared<D>,
    archive: PathBuf,
) -> Result<Transition<D::Version>, UpdateError> {
    shared.log.info("Unpacking update");

    let staging_dir = shared.config.staging_dir();
    let summary = crate::archive::unpack(&archive, &staging_dir).map_err(|error| {
        UpdateError::new(UpdateErrorKind::Unpack)
            .with_context(format!("archive {archive:?}"))
            .with_source(error)
    })?;

    tracing::debug!(?summary, ?staging_dir, "unpacked");

    Ok(Transition::Next(Step::ValidateNewImage { archive }))
}

fn validate_new_image<D: Distributor>(
    shared: &Shared<D>,
    archive: PathBuf,
) -> Result<Transition<D::Version>, UpdateError> {
    let image = shared.config.staged_image(shared.platform);

    image.validate().map_err(|error| {
        UpdateError::new(UpdateErrorKind::UpgradeImageInvalid)
            .with_context(format!("upgrade location: {:?}", image.root()))
            .with_source(error)
    })?;

    Ok(Transition::Next(Step::SetPermissions { archive }))
}

fn set_permissions<D: Distributor>(
    shared: &Shared<D>,
    archive: PathBuf,
) -> Result<Transition<D::Version>, UpdateError> {
    let image = shared.config.staged_image(shared.platform);

    image.set_permissions().map_err(|error| {
        UpdateError::new(UpdateErrorKind::Unpack)
            .with_context("could not set executable permissions")
            .with_source(error)
    })?;

    Ok(Transition::Next(Step::CreateInstaller { archive }))
}

fn create_installer<D: Distributor>(
    shared: &Shared<D>,
    archive: PathBuf,
) -> Result<Transition<D::Version>, UpdateError> {
    shared.log.info("Creating installer");

    let installer = UpdateInstaller::from_config(&shared.config, shared.platform)
        .map_err(|error| error.reclassify(UpdateErrorKind::CreateInstallDescriptor))?;

    let warning = match std::fs::remove_file(&archive) {
        Ok(()) => None,
        Err(error) => Some(
            UpdateError::new(UpdateErrorKind::CannotRemoveArchive)
                .with_context(format!("location: {archive:?}"))
                .with_source(error),
        ),
    };

    Ok(Transition::End(Outcome::Installed { installer, warning }))
}

/// Ends the cycle: error callback, guard release, done callback.
fn finish<D: Distributor>(shared: &Shared<D>, outcome: Outcome) {
    let (error, installer) = match outcome {
        Outcome::NoUpdate => {
            shared.log.info("No update available");
            let error = call_callback(|| (shared.callbacks.on_no_update)()).err().map(|error| {
                UpdateError::new(UpdateErrorKind::NoUpdateCallback).with_boxed_source(error)
            });
            (error, None)
        }
        Outcome::Rejected => (None, None),
        Outcome::Failed(error) => (Some(error), None),
        Outcome::Installed { installer, warning } => {
            shared.log.info("Upgrade successful");
            (warning, Some(installer))
        }
    };

    if let Some(error) = error {
        report_error(shared, &error);
    }

    shared.running.store(false, Ordering::Release);

    if let Err(error) = call_callback(|| (shared.callbacks.on_done)(installer)) {
        let error = UpdateError::new(UpdateErrorKind::DoneCallback).with_boxed_source(error);
        report_error(shared, &error);
    }

    shared.log.info("DONE");
}

fn report_error<D: Distributor>(shared: &Shared<D>, error: &UpdateError) {
    shared.log.error(format_error(error));

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| (shared.callbacks.on_error)(error)));

    if let Err(payload) = result {
        let panic = PanicError::from_payload(payload);
        shared
            .log
            .error(format!("error callback panicked: {}", panic.message()));
    }
}

fn call_callback<F>(callback: F) -> Result<(), BoxError>
where
    F: FnOnce() -> Result<(), BoxError>,
{
    std::panic::catch_unwind(AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| Err(Box::new(PanicError::from_payload(payload)) as BoxError))
}
