//! Installer program shipped inside every runtime image.
//!
//! See [`handover::inst`] for the command line and exit codes.

fn main() {
    let code = handover::inst::swap::installer_main(std::env::args_os().skip(1));
    std::process::exit(code);
}
