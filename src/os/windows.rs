use std::os::windows::process::CommandExt;
use std::process::Command;

// https://learn.microsoft.com/en-us/windows/win32/procthread/process-creation-flags
const DETACHED_PROCESS: u32 = 0x0000_0008;
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Starts the child without a console and outside the parent's process
/// group so closing the parent console does not terminate it.
pub fn detach(command: &mut Command) {
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}
