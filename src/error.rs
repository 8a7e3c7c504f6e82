//! Error handling and errno mapping for the filesystem.
//!
//! Handlers translate every failure into the negated-errno convention the
//! FUSE runtime expects. Host syscall errors carry their own errno; the
//! dispatcher adds a few conditions of its own (stale inodes, stale handles)
//! that map onto the conventional codes.

use std::io;

use thiserror::Error;

/// Failures a dispatcher handler can produce.
#[derive(Debug, Error)]
pub enum FsError {
    /// Host syscall failure; the errno travels inside.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The kernel referenced an inode the table no longer knows.
    #[error("stale inode: {0}")]
    StaleInode(u64),

    /// The kernel referenced a file handle the table no longer knows.
    #[error("stale file handle: {0}")]
    StaleHandle(u64),

    /// A file operation arrived on a directory handle or vice versa.
    #[error("wrong handle type for operation")]
    WrongHandleType,

    /// A name in the request could not be decoded.
    #[error("undecodable name in request")]
    InvalidName,
}

impl FsError {
    /// Converts this error to the libc code returned to the runtime.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::Io(e) => io_error_to_errno(e),
            FsError::StaleInode(_) => libc::ENOENT,
            FsError::StaleHandle(_) => libc::EBADF,
            FsError::WrongHandleType => libc::EBADF,
            FsError::InvalidName => libc::EINVAL,
        }
    }
}

/// Converts an IO error to a libc error code.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

/// Result type for dispatcher operations.
pub type FsResult<T> = Result<T, FsError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}
