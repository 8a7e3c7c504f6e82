//! The operation dispatcher: one handler per filesystem operation.
//!
//! Every handler follows the same contract: adopt the caller's effective
//! identity, resolve the inode to its request-relative path, route the path
//! to a backing, invoke the host primitive, and translate the result into
//! the runtime's negated-errno convention.
//!
//! Routing uses two dispatch styles. Operations taking a single path park
//! the process working directory on the routed backing ([`ShuntFs::enter`])
//! and issue the plain syscall with a relative path; operations involving
//! two paths, or needing flags only the `*at` family carries, address the
//! backing handle directly ([`ShuntFs::backing_fd`]).
//!
//! Dispatch is strictly serialized by the session loop. That is a
//! correctness requirement, not a tuning choice: both the effective ids and
//! the working directory are process-wide, and interleaving two callers
//! would hand one of them the other's credentials.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::BorrowedFd;
use std::os::unix::fs::{DirBuilderExt, DirEntryExt, FileExt};
use std::path::Path;
use std::time::SystemTime;

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use libc::c_int;
use tracing::{debug, info, trace};

use crate::attr::{self, ATTR_TTL};
use crate::backing::Backings;
use crate::cred;
use crate::error::{FsError, FsResult, ToErrno};
use crate::handles::{Handle, HandleTable};
use crate::inode::{InodeTable, ROOT_INODE};
use crate::router::{Backing, RelPath, Router};
use crate::sys;

/// Chunk size for the cross-backing rename copy.
const COPY_CHUNK: usize = 8192;

/// The selective-redirect union filesystem.
///
/// Holds the two pre-mount backing handles, the redirect router, and the
/// inode and open-handle bookkeeping. All of it is immutable or internally
/// synchronized; handlers never need `&mut` state beyond what the trait
/// prescribes.
pub struct ShuntFs {
    backings: Backings,
    router: Router,
    inodes: InodeTable,
    handles: HandleTable,
}

impl ShuntFs {
    pub fn new(backings: Backings, router: Router) -> Self {
        info!(
            redirects = router.prefixes().len(),
            "filesystem initialized"
        );
        Self {
            backings,
            router,
            inodes: InodeTable::new(),
            handles: HandleTable::new(),
        }
    }

    /// The request path an inode currently names.
    fn path_of(&self, ino: u64) -> FsResult<RelPath> {
        self.inodes.path_of(ino).ok_or(FsError::StaleInode(ino))
    }

    /// The request path of a directory entry named by the kernel.
    fn child_path(&self, parent: u64, name: &OsStr) -> FsResult<RelPath> {
        let name = name.to_str().ok_or(FsError::InvalidName)?;
        Ok(self.path_of(parent)?.join(name))
    }

    /// cwd-style dispatch: parks the process working directory on the
    /// backing that serves `path`. Relative syscalls then hit the right
    /// tree.
    fn enter(&self, path: &RelPath) -> io::Result<()> {
        sys::fchdir(self.backings.fd(self.router.route(path)))
    }

    /// fd-relative dispatch: the backing handle serving `path`, for the
    /// `*at` syscall family.
    fn backing_fd(&self, path: &RelPath) -> BorrowedFd<'_> {
        self.backings.fd(self.router.route(path))
    }

    /// lstat through the routed backing.
    fn stat_path(&self, path: &RelPath) -> io::Result<libc::stat> {
        self.enter(path)?;
        sys::lstat_cwd(path.as_fs_path())
    }

    /// Stats a path and binds it to a synthetic inode, for entry replies.
    fn entry_attr(&self, path: RelPath) -> io::Result<FileAttr> {
        let st = self.stat_path(&path)?;
        let ino = self.inodes.get_or_insert(path);
        Ok(attr::stat_to_attr(&st, ino))
    }

    /// Copy-then-unlink emulation for a rename the kernel refused with
    /// `EXDEV`. Preserves file mode only; ownership, timestamps, and xattrs
    /// are lost, and the sequence is not atomic. See the crate README.
    fn rename_fallback(
        &self,
        old_fd: BorrowedFd<'_>,
        old: &RelPath,
        new_fd: BorrowedFd<'_>,
        new: &RelPath,
    ) -> io::Result<()> {
        debug!(%old, %new, "rename crossed backings, copying");

        let st = sys::fstatat_nofollow(old_fd, old.as_fs_path())?;

        // Clear the target if it exists; a failure here surfaces on the
        // create below.
        let _ = sys::unlinkat(new_fd, new.as_fs_path());

        let mut src = sys::openat(old_fd, old.as_fs_path(), libc::O_RDONLY, 0)?;
        let mut dst = sys::openat(
            new_fd,
            new.as_fs_path(),
            libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC,
            st.st_mode & 0o7777,
        )?;
        copy_contents(&mut src, &mut dst)?;
        drop(src);
        drop(dst);

        sys::unlinkat(old_fd, old.as_fs_path())
    }

    /// Merged directory listing: alt contributes the entries it actually
    /// serves, base contributes the rest, and a name appears exactly once.
    fn merged_entries(&self, ino: u64, path: &RelPath) -> FsResult<Vec<DirEntry>> {
        let mut entries = vec![
            DirEntry {
                ino,
                kind: FileType::Directory,
                name: ".".to_string(),
            },
            DirEntry {
                ino: self
                    .inodes
                    .get_inode(&path.parent())
                    .unwrap_or(ROOT_INODE),
                kind: FileType::Directory,
                name: "..".to_string(),
            },
        ];

        // Reused for building each entry's full request path; sized so the
        // common case never reallocates.
        let mut scratch = String::with_capacity(path.as_str().len() + 1 + 255);

        let mut exists = false;
        for side in [Backing::Alt, Backing::Base] {
            if sys::fchdir(self.backings.fd(side)).is_err() {
                continue;
            }
            let iter = match std::fs::read_dir(path.as_fs_path()) {
                Ok(iter) => iter,
                Err(_) => continue,
            };
            exists = true;
            for entry in iter.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    // The path model is UTF-8; undecodable names are not
                    // representable and stay invisible.
                    continue;
                };

                scratch.clear();
                if !path.is_root() {
                    scratch.push_str(path.as_str());
                    scratch.push('/');
                }
                scratch.push_str(name);

                // Each side only lists the entries the router would send to
                // it, so shared parents never produce duplicates.
                if self.router.route_str(&scratch) != side {
                    continue;
                }

                let kind = entry
                    .file_type()
                    .map(fs_file_type)
                    .unwrap_or(FileType::RegularFile);
                entries.push(DirEntry {
                    ino: entry.ino(),
                    kind,
                    name: name.to_string(),
                });
            }
        }

        if exists {
            Ok(entries)
        } else {
            Err(FsError::Io(io::Error::from_raw_os_error(libc::ENOENT)))
        }
    }
}

/// One row of a merged directory listing. The inode is the backing-side
/// number, for display only; authoritative inodes come from `lookup`.
struct DirEntry {
    ino: u64,
    kind: FileType,
    name: String,
}

/// Streams `src` into `dst` in fixed-size chunks until end of stream.
fn copy_contents(src: &mut File, dst: &mut File) -> io::Result<()> {
    let mut buf = [0u8; COPY_CHUNK];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        dst.write_all(&buf[..n])?;
    }
}

fn fs_file_type(ft: std::fs::FileType) -> FileType {
    use std::os::unix::fs::FileTypeExt;
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

/// Builds the `utimensat` argument for one of the two timestamps.
fn timespec_of(time: Option<TimeOrNow>) -> libc::timespec {
    match time {
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        Some(TimeOrNow::Now) => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        Some(TimeOrNow::SpecificTime(at)) => {
            let since_epoch = at
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default();
            libc::timespec {
                tv_sec: since_epoch.as_secs() as libc::time_t,
                tv_nsec: since_epoch.subsec_nanos() as libc::c_long,
            }
        }
    }
}

impl Filesystem for ShuntFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("mount session started");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("mount session ended");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(parent, ?name, "lookup");

        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self.entry_attr(path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, ?fh, "getattr");

        // With an open handle, stat the descriptor; otherwise stat the path
        // through the routed backing.
        let st = if let Some(fh) = fh {
            match self.handles.get(fh) {
                Some(handle) => sys::fstat(handle.descriptor()),
                None => return reply.error(libc::EBADF),
            }
        } else {
            match self.path_of(ino) {
                Ok(path) => self.stat_path(&path),
                Err(e) => return reply.error(e.to_errno()),
            }
        };

        match st {
            Ok(st) => reply.attr(&ATTR_TTL, &attr::stat_to_attr(&st, ino)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, ?mode, ?uid, ?gid, ?size, "setattr");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };

        if let Some(mode) = mode {
            if let Err(e) = self
                .enter(&path)
                .and_then(|_| sys::chmod_cwd(path.as_fs_path(), mode))
            {
                return reply.error(e.to_errno());
            }
        }

        if uid.is_some() || gid.is_some() {
            let fd = self.backing_fd(&path);
            if let Err(e) = sys::fchownat_nofollow(fd, path.as_fs_path(), uid, gid) {
                return reply.error(e.to_errno());
            }
        }

        if let Some(size) = size {
            let truncated = match fh {
                Some(fh) => match self.handles.file(fh) {
                    Ok(file) => file.set_len(size).map_err(FsError::from),
                    Err(e) => Err(e),
                },
                None => self
                    .enter(&path)
                    .and_then(|_| sys::truncate_cwd(path.as_fs_path(), size as i64))
                    .map_err(FsError::from),
            };
            if let Err(e) = truncated {
                return reply.error(e.to_errno());
            }
        }

        if atime.is_some() || mtime.is_some() {
            let times = [timespec_of(atime), timespec_of(mtime)];
            let fd = self.backing_fd(&path);
            if let Err(e) = sys::utimensat_nofollow(fd, path.as_fs_path(), &times) {
                return reply.error(e.to_errno());
            }
        }

        match self.stat_path(&path) {
            Ok(st) => reply.attr(&ATTR_TTL, &attr::stat_to_attr(&st, ino)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, "readlink");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };

        // The reply is length-delimited, so truncation at the buffer's
        // capacity stays silent, as the syscall contract wants.
        let mut buf = [0u8; libc::PATH_MAX as usize];
        match self
            .enter(&path)
            .and_then(|_| sys::readlink_cwd(path.as_fs_path(), &mut buf))
        {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(parent, ?name, mode, "mknod");

        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        let made = self
            .enter(&path)
            .and_then(|_| sys::mknod_cwd(path.as_fs_path(), mode & !umask, rdev as u64));
        if let Err(e) = made {
            return reply.error(e.to_errno());
        }
        match self.entry_attr(path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(parent, ?name, mode, "mkdir");

        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        let made = self.enter(&path).and_then(|_| {
            std::fs::DirBuilder::new()
                .mode(mode & !umask)
                .create(path.as_fs_path())
        });
        if let Err(e) = made {
            return reply.error(e.to_errno());
        }
        match self.entry_attr(path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(parent, ?name, "unlink");

        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self
            .enter(&path)
            .and_then(|_| std::fs::remove_file(path.as_fs_path()))
        {
            Ok(()) => {
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(parent, ?name, "rmdir");

        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self
            .enter(&path)
            .and_then(|_| std::fs::remove_dir(path.as_fs_path()))
        {
            Ok(()) => {
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(parent, ?link_name, ?target, "symlink");

        let path = match self.child_path(parent, link_name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        let made = self
            .enter(&path)
            .and_then(|_| std::os::unix::fs::symlink(target, path.as_fs_path()));
        if let Err(e) = made {
            return reply.error(e.to_errno());
        }
        match self.entry_attr(path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(parent, ?name, newparent, ?newname, "rename");

        let (old, new) = match (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) {
            (Ok(o), Ok(n)) => (o, n),
            (Err(e), _) | (_, Err(e)) => return reply.error(e.to_errno()),
        };

        // The two paths may route to different backings, so this is always
        // the fd-relative form.
        let old_fd = self.backing_fd(&old);
        let new_fd = self.backing_fd(&new);

        let result = match sys::renameat(old_fd, old.as_fs_path(), new_fd, new.as_fs_path()) {
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                // The backings are distinct filesystems from the kernel's
                // point of view; emulate the move.
                self.rename_fallback(old_fd, &old, new_fd, &new)
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.inodes.rename_tree(&old, &new);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, newparent, ?newname, "link");

        let old = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        let new = match self.child_path(newparent, newname) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };

        let old_fd = self.backing_fd(&old);
        let new_fd = self.backing_fd(&new);
        if let Err(e) = sys::linkat(old_fd, old.as_fs_path(), new_fd, new.as_fs_path()) {
            return reply.error(e.to_errno());
        }
        match self.entry_attr(new) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, flags, "open");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self
            .enter(&path)
            .and_then(|_| sys::open_cwd(path.as_fs_path(), flags))
        {
            Ok(file) => {
                let fh = self.handles.insert(Handle::File(file));
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(parent, ?name, mode, flags, "create");

        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        let file = match self
            .enter(&path)
            .and_then(|_| sys::create_cwd(path.as_fs_path(), flags, mode & !umask))
        {
            Ok(f) => f,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self.entry_attr(path) {
            Ok(attr) => {
                let fh = self.handles.insert(Handle::File(file));
                reply.created(&ATTR_TTL, &attr, 0, fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(fh, offset, size, "read");

        let file = match self.handles.file(fh) {
            Ok(f) => f,
            Err(e) => return reply.error(e.to_errno()),
        };

        let mut buf = vec![0u8; size as usize];
        match file.read_at(&mut buf, offset as u64) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(fh, offset, len = data.len(), "write");

        let file = match self.handles.file(fh) {
            Ok(f) => f,
            Err(e) => return reply.error(e.to_errno()),
        };

        match file.write_at(data, offset as u64) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(fh, "release");

        match self.handles.remove(fh) {
            Some(handle) => {
                drop(handle);
                reply.ok();
            }
            None => reply.error(libc::EBADF),
        }
    }

    fn fsync(&mut self, req: &Request<'_>, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(fh, datasync, "fsync");

        let file = match self.handles.file(fh) {
            Ok(f) => f,
            Err(e) => return reply.error(e.to_errno()),
        };

        let result = if datasync {
            file.sync_data()
        } else {
            file.sync_all()
        };
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, "opendir");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self.enter(&path).and_then(|_| {
            sys::open_cwd(path.as_fs_path(), libc::O_RDONLY | libc::O_DIRECTORY)
        }) {
            Ok(dir) => {
                let fh = self.handles.insert(Handle::Dir(dir));
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, offset, "readdir");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        let entries = match self.merged_entries(ino, &path) {
            Ok(entries) => entries,
            Err(e) => return reply.error(e.to_errno()),
        };

        for (i, entry) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(entry.ino, (i + 1) as i64, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(fh, "releasedir");

        match self.handles.remove(fh) {
            Some(handle) => {
                drop(handle);
                reply.ok();
            }
            None => reply.error(libc::EBADF),
        }
    }

    fn fsyncdir(
        &mut self,
        req: &Request<'_>,
        _ino: u64,
        fh: u64,
        datasync: bool,
        reply: ReplyEmpty,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(fh, datasync, "fsyncdir");

        let dir = match self.handles.dir(fh) {
            Ok(d) => d,
            Err(e) => return reply.error(e.to_errno()),
        };

        let result = if datasync {
            dir.sync_data()
        } else {
            dir.sync_all()
        };
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, "statfs");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self
            .enter(&path)
            .and_then(|_| sys::statvfs_cwd(path.as_fs_path()))
        {
            Ok(st) => reply.statfs(
                st.f_blocks,
                st.f_bfree,
                st.f_bavail,
                st.f_files,
                st.f_ffree,
                st.f_bsize as u32,
                st.f_namemax as u32,
                st.f_frsize as u32,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, ?name, "setxattr");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self
            .enter(&path)
            .and_then(|_| sys::lsetxattr_cwd(path.as_fs_path(), name, value, flags))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, ?name, size, "getxattr");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self
            .enter(&path)
            .and_then(|_| sys::lgetxattr_cwd(path.as_fs_path(), name))
        {
            Ok(value) => {
                if size == 0 {
                    reply.size(value.len() as u32);
                } else if value.len() <= size as usize {
                    reply.data(&value);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, size, "listxattr");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self
            .enter(&path)
            .and_then(|_| sys::llistxattr_cwd(path.as_fs_path()))
        {
            Ok(list) => {
                if size == 0 {
                    reply.size(list.len() as u32);
                } else if list.len() <= size as usize {
                    reply.data(&list);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn removexattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, ?name, "removexattr");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        match self
            .enter(&path)
            .and_then(|_| sys::lremovexattr_cwd(path.as_fs_path(), name))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        cred::assume_caller(req.uid(), req.gid());
        trace!(ino, mask, "access");

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        let fd = self.backing_fd(&path);
        match sys::faccessat(fd, path.as_fs_path(), mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
