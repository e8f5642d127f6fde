//! Installer functionality.
//!
//! A running executable generally cannot replace itself, so installing an
//! update is left to a separate short-lived program, `handover-installer`,
//! which ships inside every runtime image. The updater starts the copy that
//! lives in the *new* image. It then:
//!
//! 1. deletes the contents of the current installation, retrying while the
//!    old process still holds files open,
//! 2. copies the new image into the current installation directory,
//! 3. marks the executables as executable, and
//! 4. optionally starts the freshly installed launcher.
//!
//! The program's standard streams are discarded. Diagnostics are written to
//! `handover-installer.log` next to the staging directory.
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0    | Success |
//! | 54   | Invalid arguments |
//! | 55   | Copying or setting permissions failed |
//! | 56   | The current installation could not be deleted |
//! | 57   | The launcher is not executable or could not be started |
pub use self::args::*;
pub use self::launcher::*;

mod args;
mod launcher;
pub mod swap;
