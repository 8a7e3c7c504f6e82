//! Long-lived handles to the two backing directories.
//!
//! Both directories are opened before the filesystem is mounted. Once the
//! mount covers the mount point, the base directory can no longer be reached
//! by path traversal from userspace; these pre-acquired handles are the only
//! persistent references to the on-disk trees.

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::router::Backing;

/// The pair of backing directory handles, immutable for the mount lifetime.
#[derive(Debug)]
pub struct Backings {
    base: File,
    alt: File,
}

impl Backings {
    /// Opens both backings with `O_DIRECTORY`. Must run before mounting.
    pub fn open(base: &Path, alt: &Path) -> io::Result<Self> {
        Ok(Backings {
            base: open_dir(base)?,
            alt: open_dir(alt)?,
        })
    }

    /// The handle serving the given routing verdict.
    pub fn fd(&self, which: Backing) -> BorrowedFd<'_> {
        match which {
            Backing::Base => self.base.as_fd(),
            Backing::Alt => self.alt.as_fd(),
        }
    }

    pub fn base(&self) -> BorrowedFd<'_> {
        self.base.as_fd()
    }

    pub fn alt(&self) -> BorrowedFd<'_> {
        self.alt.as_fd()
    }
}

fn open_dir(path: &Path) -> io::Result<File> {
    File::options()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(path)
}
