//! Thin wrappers over the host calls std does not expose.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::common::Errno;

use super::signal::{on_host_signal, Disposition};

/// Forks the host process. Returns 0 in the child and the child's pid in the parent.
pub fn fork() -> Result<i32, Errno> {
    // SAFETY: the emulator is single-threaded, so the child inherits a consistent address space.
    match unsafe { libc::fork() } {
        -1 => Err(Errno::last()),
        pid => Ok(pid),
    }
}

/// Waits for any host child. Returns its pid and raw wait status.
pub fn wait() -> Result<(i32, i32), Errno> {
    let mut status = 0;
    // SAFETY: `status` is a valid out pointer for the duration of the call.
    match unsafe { libc::wait(&mut status) } {
        -1 => Err(Errno::last()),
        pid => Ok((pid, status)),
    }
}

/// Checks the accessibility of a host path with access(2) mode bits.
pub fn access(path: &Path, mode: i32) -> Result<(), Errno> {
    let path = CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno(libc::EINVAL))?;
    // SAFETY: `path` is a valid null-terminated string.
    match unsafe { libc::access(path.as_ptr(), mode) } {
        0 => Ok(()),
        _ => Err(Errno::last()),
    }
}

pub fn getuid() -> u32 {
    // SAFETY: getuid cannot fail.
    unsafe { libc::getuid() }
}
pub fn getgid() -> u32 {
    // SAFETY: getgid cannot fail.
    unsafe { libc::getgid() }
}

/// Sets what the host does with `sig`. Caught signals go to the pending-set handler.
pub fn set_disposition(sig: i32, disposition: Disposition) {
    let handler = match disposition {
        Disposition::Default => libc::SIG_DFL,
        Disposition::Ignore => libc::SIG_IGN,
        Disposition::Catch(_) => on_host_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
    };
    // SAFETY: the handler only performs an atomic store.
    unsafe { libc::signal(sig, handler); }
}
