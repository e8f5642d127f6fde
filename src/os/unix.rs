use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

pub fn get_umask() -> u32 {
    static UMASK: LazyLock<u32> = LazyLock::new(|| {
        let value = unsafe {
            // SAFETY: we're only getting and setting integers.
            let current = libc::umask(0o022);
            libc::umask(current);
            current
        };
        // Cast used because it might be u16 on macOS.
        value as u32
    });

    *UMASK
}

pub fn get_effective_posix_permission(executable: bool) -> u32 {
    let full = if executable { 0o777 } else { 0o666 };
    full & !get_umask()
}

pub fn set_posix_permission(target: &Path, mode: u32) -> std::io::Result<()> {
    let mut perm = target.metadata()?.permissions();
    perm.set_mode(mode);
    std::fs::set_permissions(target, perm)?;
    Ok(())
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };

    if !metadata.is_file() {
        return false;
    }

    let mode = metadata.permissions().mode();
    let uid = unsafe {
        // SAFETY: no arguments, always succeeds.
        libc::geteuid()
    };

    if uid == 0 {
        return mode & 0o111 != 0;
    }

    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };

    unsafe {
        // SAFETY: c_path is a valid NUL terminated string that outlives the call.
        libc::access(c_path.as_ptr(), libc::X_OK) == 0
    }
}

/// Puts the child in its own process group so terminal signals sent to the
/// parent do not reach it.
pub fn detach(command: &mut Command) {
    command.process_group(0);
}
