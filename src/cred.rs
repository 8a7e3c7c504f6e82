//! Per-request effective-credential switching.
//!
//! Each handler assumes the caller's identity before touching a backing, so
//! the kernel performs the authorization checks on the daemon's behalf. The
//! effective ids are process-wide state, which is why request dispatch is
//! strictly serialized (see [`crate::filesystem`]).
//!
//! The ids are never reset after a request; the next handler overwrites them.
//! Because the previous caller may have left the effective uid non-zero, the
//! switch first returns to euid 0 (the real uid stays 0 for the process
//! lifetime, so this is always permitted), then sets the gid while still
//! privileged, then the uid.
//!
//! Supplementary groups are not switched. Return values are ignored: when a
//! switch cannot take effect (for instance in an unprivileged test mount),
//! the following syscall simply runs with the daemon's own identity and the
//! kernel's verdict stands.

/// Adopts the calling user's effective uid and gid for the current request.
pub fn assume_caller(uid: u32, gid: u32) {
    unsafe {
        if libc::geteuid() != 0 {
            libc::seteuid(0);
        }
        libc::setegid(gid);
        libc::seteuid(uid);
    }
}
