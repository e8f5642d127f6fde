use core::str;
use std::{
    io::Write,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use handover::{image::REQUIRED_DIRS, os::Platform, UpdaterConfig};
use serde_json::Value;

const DEMO_APP_NAME: &str = "handover-demo";
const DEMO_TARGET: &str = "local_distributor";
const INSTALLER_TARGET: &str = "handover-installer";

#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Builds the demo application and packs it as a runtime image archive
    PackDemo {
        /// Version written into the image
        #[arg(long, default_value = "1.0.0")]
        version: String,
        /// Directory receiving `handover-demo-<version>.zip`
        #[arg(long, default_value = "target/demo-releases")]
        output: PathBuf,
        /// Also unpack the archive into this directory as an installation
        #[arg(long)]
        install: Option<PathBuf>,
        #[arg(long, short, default_value = "")]
        cargo_args: String,
    },
    /// Packs an existing directory as a runtime image archive
    PackImage {
        source: PathBuf,
        output: PathBuf,
        #[arg(long)]
        root_name: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::PackDemo {
            version,
            output,
            install,
            cargo_args,
        } => pack_demo(&version, &output, install.as_deref(), &cargo_args),
        Command::PackImage {
            source,
            output,
            root_name,
        } => {
            handover::archive::pack_dir(&source, &root_name, &output)?;
            Ok(())
        }
    }
}

fn pack_demo(
    version: &str,
    output: &Path,
    install: Option<&Path>,
    cargo_args: &str,
) -> anyhow::Result<()> {
    let platform = Platform::current()?;
    let demo = build_artifact(&["--example", DEMO_TARGET], DEMO_TARGET, cargo_args)?;
    let installer = build_artifact(&["--bin", INSTALLER_TARGET], INSTALLER_TARGET, cargo_args)?;

    let staging = tempfile::tempdir()?;
    let image = staging.path().join(DEMO_APP_NAME);

    for name in REQUIRED_DIRS {
        std::fs::create_dir_all(image.join(name))?;
    }

    std::fs::copy(&demo, image.join("bin").join(platform.exe_name(DEMO_APP_NAME)))?;
    std::fs::copy(
        &installer,
        image.join("bin").join(platform.exe_name(INSTALLER_TARGET)),
    )?;
    std::fs::write(image.join("lib/version.txt"), version)?;
    std::fs::write(
        image.join("legal/NOTICE.txt"),
        "Demo application for the handover crate.\n",
    )?;
    UpdaterConfig::new(DEMO_APP_NAME).save(image.join("conf").join(format!("{DEMO_APP_NAME}.ron")))?;

    std::fs::create_dir_all(output)?;
    let archive = output.join(format!("{DEMO_APP_NAME}-{version}.zip"));
    handover::archive::pack_dir(&image, DEMO_APP_NAME, &archive)?;
    println!("Packed {archive:?}");

    if let Some(install) = install {
        let summary = handover::archive::unpack(&archive, install)?;
        println!("Installed into {install:?} ({} files)", summary.files);
    }

    Ok(())
}

/// Builds a target and returns the path of its executable.
fn build_artifact(target_args: &[&str], name: &str, cargo_args: &str) -> anyhow::Result<PathBuf> {
    let cargo = std::env::var("CARGO")?;

    let mut args = vec!["build", "--message-format=json"];
    args.extend(target_args);
    args.extend(cargo_args.split_whitespace());
    let output = std::process::Command::new(&cargo).args(args).output()?;
    let stdout = str::from_utf8(&output.stdout)?;

    if !output.status.success() {
        std::io::stdout().write_all(&output.stdout)?;
        std::io::stderr().write_all(&output.stderr)?;
        anyhow::bail!("build of {name} failed");
    }

    let mut executable_path = None;

    for line in stdout.lines() {
        let value = serde_json::from_str::<Value>(line)?;
        let reason = value.get("reason").and_then(Value::as_str);
        let target_name = value
            .get("target")
            .and_then(|target| target.get("name"))
            .and_then(Value::as_str);
        let executable = value.get("executable").and_then(Value::as_str);

        if reason == Some("compiler-artifact") && target_name == Some(name) {
            if let Some(executable) = executable {
                executable_path = Some(PathBuf::from(executable));
            }
        }
    }

    match executable_path {
        Some(path) if path.is_file() => Ok(path),
        _ => anyhow::bail!("no executable built for {name}"),
    }
}
