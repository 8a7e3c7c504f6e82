//! Per-open descriptor table.
//!
//! `open`/`create`/`opendir` stash the backing-side descriptor here and hand
//! the table id to the runtime as the file handle. Subsequent read, write,
//! sync, and release operations address the stored descriptor directly and
//! never re-route by path.

use std::fs::File;

use dashmap::DashMap;

use crate::error::{FsError, FsResult};

/// A stored open: a backing-side file or directory descriptor.
///
/// The descriptor closes when the handle is removed from the table and
/// dropped, which keeps every successful open paired with exactly one close.
#[derive(Debug)]
pub enum Handle {
    /// An open file, from `open` or `create`.
    File(File),
    /// An open directory, from `opendir`; used by `fsyncdir`.
    Dir(File),
}

impl Handle {
    pub fn is_file(&self) -> bool {
        matches!(self, Handle::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Handle::Dir(_))
    }

    /// The file descriptor, if this is a file handle.
    pub fn as_file(&self) -> Option<&File> {
        match self {
            Handle::File(f) => Some(f),
            Handle::Dir(_) => None,
        }
    }

    /// The directory descriptor, if this is a directory handle.
    pub fn as_dir(&self) -> Option<&File> {
        match self {
            Handle::Dir(f) => Some(f),
            Handle::File(_) => None,
        }
    }

    /// The underlying descriptor, whichever kind of open this is.
    pub fn descriptor(&self) -> &File {
        match self {
            Handle::File(f) | Handle::Dir(f) => f,
        }
    }
}

/// Table mapping 64-bit runtime file handles to stored descriptors.
#[derive(Debug)]
pub struct HandleTable {
    handles: DashMap<u64, Handle>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Inserts a handle and returns its id.
    pub fn insert(&self, handle: Handle) -> u64 {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.handles.insert(id, handle);
        id
    }

    /// Borrows a handle by id.
    pub fn get(&self, id: u64) -> Option<dashmap::mapref::one::Ref<'_, u64, Handle>> {
        self.handles.get(&id)
    }

    /// Borrows the file descriptor behind `id`, or reports the precise
    /// failure (unknown id vs. a directory handle).
    pub fn file(
        &self,
        id: u64,
    ) -> FsResult<dashmap::mapref::one::MappedRef<'_, u64, Handle, File>> {
        let handle = self.get(id).ok_or(FsError::StaleHandle(id))?;
        handle
            .try_map(|h| h.as_file())
            .map_err(|_| FsError::WrongHandleType)
    }

    /// Borrows the directory descriptor behind `id`.
    pub fn dir(
        &self,
        id: u64,
    ) -> FsResult<dashmap::mapref::one::MappedRef<'_, u64, Handle, File>> {
        let handle = self.get(id).ok_or(FsError::StaleHandle(id))?;
        handle
            .try_map(|h| h.as_dir())
            .map_err(|_| FsError::WrongHandleType)
    }

    /// Removes a handle; dropping the returned value closes the descriptor.
    pub fn remove(&self, id: u64) -> Option<Handle> {
        self.handles.remove(&id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
