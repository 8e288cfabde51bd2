//! Fault policy: platform failures and overflows are fatal after
//! logging; caller misuse is reported with the first user-defined
//! signal so the host process gets a chance to react.
use std::ffi::CStr;

use crate::journal::alert;

/// Logs `message` and exits with failure status.
pub(crate) fn die(message: &str) -> ! {
    alert!("{}", message);
    std::process::exit(1);
}

/// Logs a failed platform call with its errno text and exits with
/// failure status.
pub(crate) fn die_errno(what: &str, errno: i32) -> ! {
    let text = unsafe {
        let ptr = libc::strerror(errno);
        if ptr.is_null() {
            None
        } else {
            CStr::from_ptr(ptr).to_str().ok()
        }
    };

    alert!("{}: {}", what, text.unwrap_or("unknown error"));
    std::process::exit(1);
}

/// Reports caller misuse (invalid or double free, invalid realloc) by
/// raising the first user-defined signal at our own process.  The
/// default disposition terminates the process; a host that prefers to
/// survive installs a handler.
pub(crate) fn raise_misuse() {
    unsafe {
        libc::kill(libc::getpid(), libc::SIGUSR1);
    }
}
