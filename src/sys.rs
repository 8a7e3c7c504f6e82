//! Thin safe wrappers over the host syscalls the dispatcher needs.
//!
//! Two groups, matching the two dispatch styles:
//!
//! * `*_cwd` functions operate on a path relative to the process working
//!   directory, used after [`fchdir`] has parked the process on the routed
//!   backing handle.
//! * fd-relative functions take one or two backing handles and use the `*at`
//!   syscall family, for operations that involve two paths or need flags the
//!   plain form cannot express.
//!
//! Every wrapper converts the C convention (negative return, global errno)
//! into `io::Result` via [`io::Error::last_os_error`].

use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

fn cpath(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn cname(name: &OsStr) -> io::Result<CString> {
    CString::new(name.as_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn check_isize(ret: isize) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Changes the process working directory to the given directory handle.
pub fn fchdir(dir: BorrowedFd<'_>) -> io::Result<()> {
    check(unsafe { libc::fchdir(dir.as_raw_fd()) })
}

/// `open(2)` relative to the cwd with the caller's flags.
pub fn open_cwd(rel: &Path, flags: i32) -> io::Result<File> {
    let p = cpath(rel)?;
    let fd = unsafe { libc::open(p.as_ptr(), flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// `open(2)` with `O_CREAT`, for create-style operations.
pub fn create_cwd(rel: &Path, flags: i32, mode: u32) -> io::Result<File> {
    let p = cpath(rel)?;
    let fd = unsafe { libc::open(p.as_ptr(), flags | libc::O_CREAT, mode as libc::mode_t) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// `lstat(2)`; the runtime resolves symlink traversal itself, so the
/// non-following form is always the right one for attributes.
pub fn lstat_cwd(rel: &Path) -> io::Result<libc::stat> {
    let p = cpath(rel)?;
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    check(unsafe { libc::lstat(p.as_ptr(), st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

/// `fstat(2)` on an open descriptor.
pub fn fstat(file: &File) -> io::Result<libc::stat> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    check(unsafe { libc::fstat(file.as_raw_fd(), st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

/// `mknod(2)` relative to the cwd.
pub fn mknod_cwd(rel: &Path, mode: u32, rdev: u64) -> io::Result<()> {
    let p = cpath(rel)?;
    check(unsafe { libc::mknod(p.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) })
}

/// `chmod(2)` relative to the cwd. Follows symlinks, as the original call
/// does.
pub fn chmod_cwd(rel: &Path, mode: u32) -> io::Result<()> {
    let p = cpath(rel)?;
    check(unsafe { libc::chmod(p.as_ptr(), mode as libc::mode_t) })
}

/// `truncate(2)` relative to the cwd.
pub fn truncate_cwd(rel: &Path, size: i64) -> io::Result<()> {
    let p = cpath(rel)?;
    check(unsafe { libc::truncate(p.as_ptr(), size as libc::off_t) })
}

/// `statvfs(3)` relative to the cwd.
pub fn statvfs_cwd(rel: &Path) -> io::Result<libc::statvfs> {
    let p = cpath(rel)?;
    let mut st = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    check(unsafe { libc::statvfs(p.as_ptr(), st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

/// `readlink(2)` relative to the cwd. Returns the number of bytes written
/// to `buf`; the target is silently truncated at the buffer's capacity.
pub fn readlink_cwd(rel: &Path, buf: &mut [u8]) -> io::Result<usize> {
    let p = cpath(rel)?;
    check_isize(unsafe {
        libc::readlink(p.as_ptr(), buf.as_mut_ptr().cast::<libc::c_char>(), buf.len())
    })
}

/// `renameat(2)` across two backing handles.
pub fn renameat(
    old_dir: BorrowedFd<'_>,
    old: &Path,
    new_dir: BorrowedFd<'_>,
    new: &Path,
) -> io::Result<()> {
    let o = cpath(old)?;
    let n = cpath(new)?;
    check(unsafe {
        libc::renameat(old_dir.as_raw_fd(), o.as_ptr(), new_dir.as_raw_fd(), n.as_ptr())
    })
}

/// `linkat(2)` across two backing handles, following symlinks on the source.
pub fn linkat(
    old_dir: BorrowedFd<'_>,
    old: &Path,
    new_dir: BorrowedFd<'_>,
    new: &Path,
) -> io::Result<()> {
    let o = cpath(old)?;
    let n = cpath(new)?;
    check(unsafe {
        libc::linkat(
            old_dir.as_raw_fd(),
            o.as_ptr(),
            new_dir.as_raw_fd(),
            n.as_ptr(),
            libc::AT_SYMLINK_FOLLOW,
        )
    })
}

/// `unlinkat(2)` relative to a backing handle.
pub fn unlinkat(dir: BorrowedFd<'_>, rel: &Path) -> io::Result<()> {
    let p = cpath(rel)?;
    check(unsafe { libc::unlinkat(dir.as_raw_fd(), p.as_ptr(), 0) })
}

/// `openat(2)` relative to a backing handle.
pub fn openat(dir: BorrowedFd<'_>, rel: &Path, flags: i32, mode: u32) -> io::Result<File> {
    let p = cpath(rel)?;
    let fd = unsafe { libc::openat(dir.as_raw_fd(), p.as_ptr(), flags, mode as libc::mode_t) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// `fstatat(2)` without following a trailing symlink.
pub fn fstatat_nofollow(dir: BorrowedFd<'_>, rel: &Path) -> io::Result<libc::stat> {
    let p = cpath(rel)?;
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    check(unsafe {
        libc::fstatat(
            dir.as_raw_fd(),
            p.as_ptr(),
            st.as_mut_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    })?;
    Ok(unsafe { st.assume_init() })
}

/// `faccessat(2)` with effective-id semantics.
pub fn faccessat(dir: BorrowedFd<'_>, rel: &Path, mask: i32) -> io::Result<()> {
    let p = cpath(rel)?;
    check(unsafe { libc::faccessat(dir.as_raw_fd(), p.as_ptr(), mask, libc::AT_EACCESS) })
}

/// `fchownat(2)` without following a trailing symlink. `None` leaves the
/// corresponding id unchanged.
pub fn fchownat_nofollow(
    dir: BorrowedFd<'_>,
    rel: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
) -> io::Result<()> {
    let p = cpath(rel)?;
    check(unsafe {
        libc::fchownat(
            dir.as_raw_fd(),
            p.as_ptr(),
            uid.map_or(libc::uid_t::MAX, |u| u as libc::uid_t),
            gid.map_or(libc::gid_t::MAX, |g| g as libc::gid_t),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    })
}

/// `utimensat(2)` without following a trailing symlink.
pub fn utimensat_nofollow(
    dir: BorrowedFd<'_>,
    rel: &Path,
    times: &[libc::timespec; 2],
) -> io::Result<()> {
    let p = cpath(rel)?;
    check(unsafe {
        libc::utimensat(
            dir.as_raw_fd(),
            p.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    })
}

/// `lsetxattr(2)` relative to the cwd.
pub fn lsetxattr_cwd(rel: &Path, name: &OsStr, value: &[u8], flags: i32) -> io::Result<()> {
    let p = cpath(rel)?;
    let n = cname(name)?;
    check(unsafe {
        libc::lsetxattr(
            p.as_ptr(),
            n.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            flags,
        )
    })
}

/// `lgetxattr(2)` relative to the cwd; fetches the whole value.
pub fn lgetxattr_cwd(rel: &Path, name: &OsStr) -> io::Result<Vec<u8>> {
    let p = cpath(rel)?;
    let n = cname(name)?;
    // Size probe first, then fetch. The value can grow in between; retry on
    // ERANGE.
    loop {
        let size = check_isize(unsafe {
            libc::lgetxattr(p.as_ptr(), n.as_ptr(), std::ptr::null_mut(), 0)
        })?;
        let mut buf = vec![0u8; size];
        match check_isize(unsafe {
            libc::lgetxattr(p.as_ptr(), n.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        }) {
            Ok(n_read) => {
                buf.truncate(n_read);
                return Ok(buf);
            }
            Err(e) if e.raw_os_error() == Some(libc::ERANGE) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// `llistxattr(2)` relative to the cwd; returns the raw NUL-separated list.
pub fn llistxattr_cwd(rel: &Path) -> io::Result<Vec<u8>> {
    let p = cpath(rel)?;
    loop {
        let size =
            check_isize(unsafe { libc::llistxattr(p.as_ptr(), std::ptr::null_mut(), 0) })?;
        let mut buf = vec![0u8; size];
        match check_isize(unsafe {
            libc::llistxattr(p.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        }) {
            Ok(n_read) => {
                buf.truncate(n_read);
                return Ok(buf);
            }
            Err(e) if e.raw_os_error() == Some(libc::ERANGE) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// `lremovexattr(2)` relative to the cwd.
pub fn lremovexattr_cwd(rel: &Path, name: &OsStr) -> io::Result<()> {
    let p = cpath(rel)?;
    let n = cname(name)?;
    check(unsafe { libc::lremovexattr(p.as_ptr(), n.as_ptr()) })
}
