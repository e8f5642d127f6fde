#![allow(dead_code)]
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use handover::{
    distributor::{Distributor, Version},
    error::{BoxError, UpdateErrorKind},
    image::REQUIRED_DIRS,
    inst::UpdateInstaller,
    os::Platform,
    UpdaterBuilder, UpdaterConfig,
};
use tempfile::TempDir;

pub const APP_NAME: &str = "app";
pub const INSTALLER_NAME: &str = "handover-installer";
pub const TIMEOUT: Duration = Duration::from_secs(20);

pub fn exe_name(stem: &str) -> String {
    Platform::current().unwrap().exe_name(stem)
}

/// Writes a minimal runtime image whose `lib/version.txt` holds `version`.
pub fn write_image(root: &Path, version: &str, launcher_script: &str) {
    for name in REQUIRED_DIRS {
        std::fs::create_dir_all(root.join(name)).unwrap();
    }

    std::fs::write(root.join("bin").join(exe_name(APP_NAME)), launcher_script).unwrap();
    std::fs::write(
        root.join("bin").join(exe_name(INSTALLER_NAME)),
        "#!/bin/sh\n",
    )
    .unwrap();
    std::fs::write(root.join("lib/version.txt"), version).unwrap();
    std::fs::write(root.join("conf/app.conf"), format!("version = {version}\n")).unwrap();
    std::fs::write(root.join("legal/LICENSE"), "license text\n").unwrap();
}

/// Packs an image of `version` into `dir/app-<version>.zip`.
pub fn make_archive(dir: &Path, version: &str, launcher_script: &str) -> PathBuf {
    let build_dir = dir.join(format!("build-{version}"));
    write_image(&build_dir, version, launcher_script);
    make_archive_from(dir, &build_dir, version)
}

pub fn make_archive_from(dir: &Path, build_dir: &Path, version: &str) -> PathBuf {
    let archive = dir.join(format!("{APP_NAME}-{version}.zip"));
    handover::archive::pack_dir(build_dir, APP_NAME, &archive).unwrap();
    archive
}

pub struct Fixture {
    pub dir: TempDir,
    pub config: UpdaterConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("current");
        write_image(&current, "v1", "#!/bin/sh\n");

        let config = UpdaterConfig::new(APP_NAME)
            .with_app_home(dir.path().join("home"))
            .with_current_image(current)
            .with_installer_wait(Duration::from_secs(10));

        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn current(&self) -> PathBuf {
        self.config.current_image.clone()
    }

    pub fn staging(&self) -> PathBuf {
        self.config.staging_dir()
    }
}

/// Returns a fixed version and archive.
pub struct StaticDistributor {
    pub version: Option<Version>,
    pub archive: Option<PathBuf>,
}

impl StaticDistributor {
    pub fn none() -> Self {
        Self {
            version: None,
            archive: None,
        }
    }

    pub fn with_archive(version: &str, archive: PathBuf) -> Self {
        Self {
            version: Some(Version::new(version)),
            archive: Some(archive),
        }
    }
}

impl Distributor for StaticDistributor {
    type Version = Version;

    fn find_latest_version(&self) -> Result<Option<Version>, BoxError> {
        Ok(self.version.clone())
    }

    fn download(&self, _version: &Version) -> Result<PathBuf, BoxError> {
        self.archive.clone().ok_or_else(|| "download refused".into())
    }
}

/// Fails every call.
pub struct FailingDistributor;

impl Distributor for FailingDistributor {
    type Version = Version;

    fn find_latest_version(&self) -> Result<Option<Version>, BoxError> {
        Err("server unreachable".into())
    }

    fn download(&self, _version: &Version) -> Result<PathBuf, BoxError> {
        unreachable!()
    }
}

#[derive(Debug)]
pub enum Event {
    NoUpdate,
    Error(UpdateErrorKind, String),
    Done(Option<UpdateInstaller>),
}

impl Event {
    pub fn error_kind(&self) -> Option<UpdateErrorKind> {
        match self {
            Event::Error(kind, _) => Some(*kind),
            _ => None,
        }
    }
}

/// Installs callbacks that forward every event to the returned channel.
pub fn record<D: Distributor>(builder: UpdaterBuilder<D>) -> (UpdaterBuilder<D>, Receiver<Event>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let no_update_sender = sender.clone();
    let error_sender = sender.clone();

    let builder = builder
        .with_no_update_callback(move || {
            let _ = no_update_sender.send(Event::NoUpdate);
            Ok(())
        })
        .with_error_callback(move |error| {
            let _ = error_sender.send(Event::Error(
                *error.kind(),
                handover::error::format_error(error),
            ));
        })
        .with_done_callback(move |installer| {
            send_done(&sender, installer);
            Ok(())
        });

    (builder, receiver)
}

fn send_done(sender: &Sender<Event>, installer: Option<UpdateInstaller>) {
    let _ = sender.send(Event::Done(installer));
}

/// Receives the events of one cycle, up to and including the done event.
pub fn collect_cycle(receiver: &Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();

    loop {
        let event = receiver
            .recv_timeout(TIMEOUT)
            .expect("cycle did not finish in time");
        let done = matches!(event, Event::Done(_));
        events.push(event);

        if done {
            return events;
        }
    }
}

pub fn error_kinds(events: &[Event]) -> Vec<UpdateErrorKind> {
    events.iter().filter_map(Event::error_kind).collect()
}

pub fn done_count(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, Event::Done(_)))
        .count()
}
