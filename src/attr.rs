//! Conversion from host `stat` results to FUSE file attributes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType};

/// How long the kernel may cache attributes and entries. The filesystem
/// keeps no cache of its own; this only feeds the kernel's dentry/attr
/// timeouts.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// Maps the `S_IFMT` bits to the FUSE file type.
pub fn file_type_of(st: &libc::stat) -> FileType {
    match st.st_mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFREG => FileType::RegularFile,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

/// Builds the FUSE attribute record for a `stat` result, substituting the
/// synthetic inode number the table assigned to the path.
pub fn stat_to_attr(st: &libc::stat, ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: st.st_size as u64,
        blocks: st.st_blocks as u64,
        atime: system_time(st.st_atime, st.st_atime_nsec),
        mtime: system_time(st.st_mtime, st.st_mtime_nsec),
        ctime: system_time(st.st_ctime, st.st_ctime_nsec),
        crtime: UNIX_EPOCH,
        kind: file_type_of(st),
        perm: (st.st_mode & 0o7777) as u16,
        nlink: st.st_nlink as u32,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u32,
        blksize: st.st_blksize as u32,
        flags: 0,
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_for(path: &std::path::Path) -> libc::stat {
        crate::sys::lstat_cwd(path).unwrap()
    }

    #[test]
    fn test_regular_file_attr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"12345").unwrap();

        let st = stat_for(&path);
        let attr = stat_to_attr(&st, 99);
        assert_eq!(attr.ino, 99);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.nlink, 1);
    }

    #[test]
    fn test_directory_attr() {
        let dir = tempfile::tempdir().unwrap();
        let st = stat_for(dir.path());
        let attr = stat_to_attr(&st, 1);
        assert_eq!(attr.kind, FileType::Directory);
    }

    #[test]
    fn test_symlink_attr_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("l");
        std::os::unix::fs::symlink("target", &link).unwrap();

        let st = stat_for(&link);
        let attr = stat_to_attr(&st, 2);
        assert_eq!(attr.kind, FileType::Symlink);
        assert_eq!(attr.size, 6);
    }

    #[test]
    fn test_permission_bits_preserved() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        let st = stat_for(&path);
        let attr = stat_to_attr(&st, 3);
        assert_eq!(attr.perm, 0o640);
    }
}
