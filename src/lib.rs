//! Selective-redirect union filesystem.
//!
//! This crate mounts a FUSE filesystem over a directory (the "base") while
//! transparently diverting a configured list of path prefixes to a second
//! directory (the "alt"). Every operation routes to exactly one backing by
//! component-prefix match against the redirect list; directory listings
//! merge both sides, with each name served by whichever side would actually
//! handle it.
//!
//! # Features
//!
//! - Full read/write POSIX surface: files, directories, symlinks, hard
//!   links, device nodes, xattrs, timestamps
//! - Per-request effective-credential switching, so the kernel enforces
//!   permissions on behalf of each caller
//! - Cross-backing rename emulated as copy-then-unlink when the kernel
//!   reports `EXDEV`
//!
//! # Usage
//!
//! ```ignore
//! use shuntfs::{Backings, Router, ShuntFs};
//!
//! let backings = Backings::open(mount_point, alt_dir)?;
//! let router = Router::from_args(prefixes)?;
//! fuser::mount2(ShuntFs::new(backings, router), mount_point, &options)?;
//! ```

pub mod attr;
pub mod backing;
pub mod cred;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod inode;
pub mod router;
pub mod sys;

pub use backing::Backings;
pub use error::{FsError, FsResult, ToErrno};
pub use filesystem::ShuntFs;
pub use handles::{Handle, HandleTable};
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
pub use router::{Backing, PrefixError, RedirectPrefix, RelPath, Router};
