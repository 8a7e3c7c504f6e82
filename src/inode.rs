//! Inode management for the dispatcher.
//!
//! The FUSE protocol addresses files by inode number while the routing
//! policy is purely path-based, so the dispatcher keeps a bidirectional
//! mapping between synthetic inodes and request-relative paths. Synthetic
//! numbers are required because the two backings are distinct filesystems
//! and their device inode numbers can collide.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::router::RelPath;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// The request path this inode currently names.
    pub path: RelPath,
    /// Lookup count for proper `forget()` handling; the kernel drops its
    /// references asynchronously.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: RelPath) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(1),
        }
    }

    /// Increments the lookup count.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the lookup count by `count`. Returns `None` if the count
    /// would go negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::SeqCst);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::SeqCst);
            None
        } else {
            Some(old - count)
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::SeqCst)
    }
}

/// Table mapping between inode numbers and request paths.
///
/// - `path_to_inode`: RelPath -> inode number
/// - `inode_to_entry`: inode number -> entry
pub struct InodeTable {
    path_to_inode: DashMap<RelPath, u64>,
    inode_to_entry: DashMap<u64, InodeEntry>,
    next_inode: AtomicU64,
}

impl InodeTable {
    /// Creates a table with the mount root pre-allocated.
    pub fn new() -> Self {
        let table = Self {
            path_to_inode: DashMap::new(),
            inode_to_entry: DashMap::new(),
            // Inode 1 is reserved for the root.
            next_inode: AtomicU64::new(2),
        };

        table.path_to_inode.insert(RelPath::root(), ROOT_INODE);
        table
            .inode_to_entry
            .insert(ROOT_INODE, InodeEntry::new(RelPath::root()));

        table
    }

    /// Allocates an inode for the path, or bumps the lookup count of the
    /// existing one.
    pub fn get_or_insert(&self, path: RelPath) -> u64 {
        if let Some(inode) = self.path_to_inode.get(&path) {
            let ino = *inode;
            if let Some(entry) = self.inode_to_entry.get(&ino) {
                entry.inc_nlookup();
            }
            return ino;
        }

        // Entry API avoids a TOCTOU race between the check above and the
        // allocation here.
        let inode = self.path_to_inode.entry(path.clone()).or_insert_with(|| {
            let ino = self.next_inode.fetch_add(1, Ordering::SeqCst);
            self.inode_to_entry.insert(ino, InodeEntry::new(path.clone()));
            ino
        });

        *inode
    }

    /// Looks up an entry by inode number.
    pub fn get(&self, inode: u64) -> Option<dashmap::mapref::one::Ref<'_, u64, InodeEntry>> {
        self.inode_to_entry.get(&inode)
    }

    /// The current path of an inode, if the table knows it.
    pub fn path_of(&self, inode: u64) -> Option<RelPath> {
        self.inode_to_entry.get(&inode).map(|e| e.path.clone())
    }

    /// Looks up an inode by path without touching the lookup count.
    pub fn get_inode(&self, path: &RelPath) -> Option<u64> {
        self.path_to_inode.get(path).map(|r| *r)
    }

    /// Decrements the lookup count; evicts the entry when it reaches zero.
    /// Returns `true` if the inode was evicted.
    pub fn forget(&self, inode: u64, nlookup: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }

        if let Some(entry) = self.inode_to_entry.get(&inode) {
            if let Some(remaining) = entry.dec_nlookup(nlookup) {
                if remaining == 0 {
                    drop(entry);
                    return self.evict(inode);
                }
            }
        }
        false
    }

    fn evict(&self, inode: u64) -> bool {
        if let Some((_, entry)) = self.inode_to_entry.remove(&inode) {
            // Only remove the path mapping if it still points at this inode;
            // a rename may have reassigned the path.
            if let Some(current) = self.path_to_inode.get(&entry.path).map(|r| *r) {
                if current == inode {
                    self.path_to_inode.remove(&entry.path);
                }
            }
            true
        } else {
            false
        }
    }

    /// Drops the path mapping after an unlink/rmdir. The entry survives
    /// until the kernel forgets the inode.
    pub fn invalidate_path(&self, path: &RelPath) {
        self.path_to_inode.remove(path);
    }

    /// Rewrites path mappings after a rename. Everything at or under
    /// `old` moves to the corresponding location under `new`; a mapping
    /// previously claiming `new` (the clobbered target) is dropped.
    pub fn rename_tree(&self, old: &RelPath, new: &RelPath) {
        self.path_to_inode.remove(new);

        let moved: Vec<(RelPath, u64)> = self
            .path_to_inode
            .iter()
            .filter(|r| r.key().starts_with(old))
            .map(|r| (r.key().clone(), *r.value()))
            .collect();

        for (old_path, inode) in moved {
            let new_path = old_path.rebase(old, new);
            self.path_to_inode.remove(&old_path);
            self.path_to_inode.insert(new_path.clone(), inode);
            if let Some(mut entry) = self.inode_to_entry.get_mut(&inode) {
                entry.path = new_path;
            }
        }
    }

    /// Number of live inodes.
    pub fn len(&self) -> usize {
        self.inode_to_entry.len()
    }

    /// True if only the root remains.
    pub fn is_empty(&self) -> bool {
        self.inode_to_entry.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_inode_exists() {
        let table = InodeTable::new();
        assert!(table.get(ROOT_INODE).is_some());
        assert_eq!(table.path_of(ROOT_INODE), Some(RelPath::root()));
    }

    #[test]
    fn test_allocate_inode() {
        let table = InodeTable::new();
        let path = RelPath::new("documents");

        let inode = table.get_or_insert(path.clone());
        assert!(inode > ROOT_INODE);

        // Second lookup returns the same inode and bumps the count.
        let inode2 = table.get_or_insert(path.clone());
        assert_eq!(inode, inode2);
        assert_eq!(table.get(inode).unwrap().nlookup(), 2);
    }

    #[test]
    fn test_forget_evicts() {
        let table = InodeTable::new();
        let path = RelPath::new("temp");
        let inode = table.get_or_insert(path.clone());

        assert_eq!(table.get(inode).unwrap().nlookup(), 1);
        assert!(table.forget(inode, 1));
        assert!(table.get(inode).is_none());
        assert!(table.get_inode(&path).is_none());
    }

    #[test]
    fn test_forget_root_never_evicts() {
        let table = InodeTable::new();
        assert!(!table.forget(ROOT_INODE, 1));
        assert!(table.get(ROOT_INODE).is_some());
    }

    #[test]
    fn test_nlookup_increment_decrement() {
        let table = InodeTable::new();
        let path = RelPath::new("counted");

        let inode = table.get_or_insert(path.clone());
        table.get_or_insert(path.clone());
        assert_eq!(table.get(inode).unwrap().nlookup(), 2);

        assert!(!table.forget(inode, 1));
        assert_eq!(table.get(inode).unwrap().nlookup(), 1);

        assert!(table.forget(inode, 1));
        assert!(table.get(inode).is_none());
    }

    #[test]
    fn test_invalidate_path() {
        let table = InodeTable::new();
        let path = RelPath::new("to_delete");
        let inode = table.get_or_insert(path.clone());

        table.invalidate_path(&path);

        assert!(table.get_inode(&path).is_none());
        // Entry survives until forget.
        assert!(table.get(inode).is_some());
    }

    #[test]
    fn test_rename_single_entry() {
        let table = InodeTable::new();
        let old = RelPath::new("old_name");
        let new = RelPath::new("new_name");
        let inode = table.get_or_insert(old.clone());

        table.rename_tree(&old, &new);

        assert!(table.get_inode(&old).is_none());
        assert_eq!(table.get_inode(&new), Some(inode));
        assert_eq!(table.path_of(inode), Some(new));
    }

    #[test]
    fn test_rename_moves_descendants() {
        let table = InodeTable::new();
        let dir = table.get_or_insert(RelPath::new("dir"));
        let child = table.get_or_insert(RelPath::new("dir/child"));
        let grandchild = table.get_or_insert(RelPath::new("dir/sub/grand"));
        let bystander = table.get_or_insert(RelPath::new("directory"));

        table.rename_tree(&RelPath::new("dir"), &RelPath::new("elsewhere/dir2"));

        assert_eq!(table.get_inode(&RelPath::new("elsewhere/dir2")), Some(dir));
        assert_eq!(
            table.get_inode(&RelPath::new("elsewhere/dir2/child")),
            Some(child)
        );
        assert_eq!(
            table.get_inode(&RelPath::new("elsewhere/dir2/sub/grand")),
            Some(grandchild)
        );
        // A sibling that merely shares the name prefix stays put.
        assert_eq!(table.get_inode(&RelPath::new("directory")), Some(bystander));
        assert_eq!(table.path_of(child), Some(RelPath::new("elsewhere/dir2/child")));
    }

    #[test]
    fn test_rename_drops_clobbered_target() {
        let table = InodeTable::new();
        let src = table.get_or_insert(RelPath::new("src"));
        let dst = table.get_or_insert(RelPath::new("dst"));

        table.rename_tree(&RelPath::new("src"), &RelPath::new("dst"));

        assert_eq!(table.get_inode(&RelPath::new("dst")), Some(src));
        // The clobbered entry survives, pathless, until forgotten.
        assert!(table.get(dst).is_some());
    }

    #[test]
    fn test_evict_after_rename_keeps_new_mapping() {
        let table = InodeTable::new();
        let src = table.get_or_insert(RelPath::new("a"));
        let dst = table.get_or_insert(RelPath::new("b"));
        table.rename_tree(&RelPath::new("a"), &RelPath::new("b"));

        // Forgetting the clobbered inode must not tear down the mapping the
        // renamed entry now owns.
        assert!(table.forget(dst, 1));
        assert_eq!(table.get_inode(&RelPath::new("b")), Some(src));
    }

    #[test]
    fn test_concurrent_allocation() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(InodeTable::new());
        let mut handles = vec![];

        for i in 0..10 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                table.get_or_insert(RelPath::new(format!("file_{i}")))
            }));
        }

        let inodes: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut sorted = inodes.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), inodes.len());
        assert_eq!(table.len(), 11);
    }
}
