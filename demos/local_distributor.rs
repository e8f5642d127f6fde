//! Example application that updates itself from a local release directory.
//!
//! Package it as a runtime image with `cargo xtask pack-demo` and run
//! `bin/handover-demo check <release dir>` from the unpacked image.
use std::{
    fs::File,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use handover::{
    distributor::{AppVersion, Distributor, Version},
    error::BoxError,
    Updater, UpdaterConfig,
};
use regex_lite::Regex;
use tracing::level_filters::LevelFilter;

const APP_NAME: &str = "handover-demo";

/// Entry point
pub fn main() -> anyhow::Result<()> {
    init_logging()?;

    let result = main2();

    if let Err(error) = &result {
        tracing::error!(?error, "main error");
    }

    result
}

fn main2() -> anyhow::Result<()> {
    let args = Args::parse();

    // The installer relaunches the application without arguments.
    match args.command.unwrap_or(Command::Version) {
        Command::Version => {
            println!("{}", installed_version());
        }
        Command::Check { releases, yes } => check(releases, yes)?,
    }

    Ok(())
}

fn check(releases: PathBuf, yes: bool) -> anyhow::Result<()> {
    let distributor = DirectoryDistributor::new(releases, installed_version())?;
    let (done_sender, done_receiver) = crossbeam_channel::bounded(1);

    let updater = Updater::builder(UpdaterConfig::new(APP_NAME), distributor)
        .with_acceptance(move |version, archive, acceptance| {
            if yes || confirm(version, archive)? {
                acceptance.accept();
            } else {
                acceptance.reject();
            }
            Ok(())
        })
        .with_no_update_callback(|| {
            println!("Already up to date.");
            Ok(())
        })
        .with_error_callback(|error| {
            eprintln!("Update failed: {}", handover::error::format_error(error));
        })
        .with_done_callback(move |installer| {
            let _ = done_sender.send(installer);
            Ok(())
        })
        .build()?;

    updater.check_for_update();

    if let Some(installer) = done_receiver.recv()? {
        println!("Installing. The new version will start shortly.");
        installer.quit_and_launch()?;
    }

    Ok(())
}

fn confirm(version: &str, archive: &Path) -> Result<bool, BoxError> {
    print!("Install version {version} from {archive:?}? [y/N] ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;

    Ok(line.trim().eq_ignore_ascii_case("y"))
}

/// Reads the version the image was packed with.
fn installed_version() -> String {
    handover::os::current_image_root()
        .and_then(|root| std::fs::read_to_string(root.join("lib/version.txt")))
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|_| "0.0.0".to_string())
}

/// Offers archives named `handover-demo-<version>.zip` from a directory.
struct DirectoryDistributor {
    dir: PathBuf,
    installed: Vec<u64>,
    pattern: Regex,
}

impl DirectoryDistributor {
    fn new(dir: PathBuf, installed: String) -> anyhow::Result<Self> {
        let pattern = Regex::new(&format!(
            r"^{}-(\d+(?:\.\d+)*)\.zip$",
            regex_lite::escape(APP_NAME)
        ))?;

        Ok(Self {
            dir,
            installed: parse_version(&installed),
            pattern,
        })
    }

    fn archive_path(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{APP_NAME}-{version}.zip"))
    }
}

impl Distributor for DirectoryDistributor {
    type Version = Version;

    fn find_latest_version(&self) -> Result<Option<Version>, BoxError> {
        let mut latest: Option<(Vec<u64>, String)> = None;

        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();

            if let Some(captures) = self.pattern.captures(&name) {
                let text = captures[1].to_string();
                let parsed = parse_version(&text);

                let newer = match &latest {
                    Some((best, _)) => parsed > *best,
                    None => true,
                };

                if newer {
                    latest = Some((parsed, text));
                }
            }
        }

        Ok(latest
            .filter(|(parsed, _)| *parsed > self.installed)
            .map(|(_, text)| Version::new(text)))
    }

    fn download(&self, version: &Version) -> Result<PathBuf, BoxError> {
        // Copied so the update deleting the archive leaves the release intact.
        let download = tempfile::env::temp_dir().join(format!("{APP_NAME}-{version}.zip"));
        std::fs::copy(self.archive_path(version.name()), &download)?;

        Ok(download)
    }
}

fn parse_version(text: &str) -> Vec<u64> {
    text.split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}

/// Initialize logging for debugging
fn init_logging() -> anyhow::Result<()> {
    let log_filename = format!("{APP_NAME}_{}.log", whoami::username());
    let log_file = File::options()
        .create(true)
        .append(true)
        .open(tempfile::env::temp_dir().join(log_filename))?;

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(LevelFilter::TRACE)
        .with_writer(log_file)
        .init();

    Ok(())
}

// Clap arguments:
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints the installed version (default)
    Version,
    /// Checks a release directory for a newer version and installs it
    Check {
        /// Directory with `handover-demo-<version>.zip` archives
        releases: PathBuf,
        /// Install without asking
        #[arg(long)]
        yes: bool,
    },
}
