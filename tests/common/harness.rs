//! Test mount harness for FUSE integration tests.
//!
//! Provides [`TestMount`], which manages the lifecycle of a mounted
//! filesystem: temporary backing directories, mount setup, convenience
//! methods, and clean unmount on drop.
//!
//! Mounting FUSE filesystems needs `/dev/fuse` and mount privileges, which
//! not every build environment has. [`TestMount::new`] returns `None` when
//! the environment cannot mount; tests skip themselves in that case.
//!
//! Two process-wide caveats apply to every test in this harness:
//! only one mount may be alive per test process (credential switching and
//! cwd-style dispatch are process-global, so `TestMount` serializes itself
//! behind a mutex), and tests must use absolute paths throughout (the
//! session thread moves the process working directory on every request).

// Not all tests use all TestMount methods.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use fuser::{BackgroundSession, MountOption};
use shuntfs::{Backings, Router, ShuntFs};
use tempfile::TempDir;

/// How long to wait for the mount to appear in the mount table.
const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait between mount readiness checks.
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(50);

static MOUNT_SERIAL: OnceLock<Mutex<()>> = OnceLock::new();

fn serialize_mounts() -> MutexGuard<'static, ()> {
    MOUNT_SERIAL
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A mounted filesystem for testing.
///
/// The mount point doubles as the base backing, exactly as in production:
/// base-side fixtures must therefore be created through the setup callback,
/// before the mount shadows the directory. The alt backing stays reachable
/// the whole time via [`TestMount::alt_path`].
pub struct TestMount {
    /// The FUSE session (unmounts on drop; declared first so it drops
    /// before the temp dirs).
    _session: BackgroundSession,
    /// Where the filesystem is mounted; also the base backing.
    pub mount_path: PathBuf,
    /// The alt backing directory.
    pub alt_path: PathBuf,
    _base_dir: TempDir,
    _alt_dir: TempDir,
    _serial: MutexGuard<'static, ()>,
}

impl TestMount {
    /// Mounts a fresh filesystem with the given redirect prefixes and empty
    /// backings. Returns `None` (after logging why) when the environment
    /// cannot mount FUSE filesystems.
    pub fn new(prefixes: &[&str]) -> Option<Self> {
        Self::with_setup(prefixes, |_base, _alt| {})
    }

    /// Like [`TestMount::new`], but runs `setup` against the two backing
    /// directories before mounting. This is the only way to pre-populate
    /// the base side.
    pub fn with_setup(prefixes: &[&str], setup: impl FnOnce(&Path, &Path)) -> Option<Self> {
        if !Path::new("/dev/fuse").exists() {
            eprintln!("[harness] /dev/fuse not present, skipping mount test");
            return None;
        }

        let serial = serialize_mounts();

        let base_dir = TempDir::new().expect("create base temp dir");
        let alt_dir = alt_temp_dir();
        setup(base_dir.path(), alt_dir.path());

        let router = Router::from_args(prefixes.iter().copied()).expect("valid test prefixes");
        let backings =
            Backings::open(base_dir.path(), alt_dir.path()).expect("open backing directories");
        let fs = ShuntFs::new(backings, router);

        let mut options = vec![
            MountOption::FSName("shuntfs-test".to_string()),
            MountOption::AutoUnmount,
        ];
        // Needed by tests that access the mount as a second user; only root
        // may request it unconditionally.
        if unsafe { libc::geteuid() } == 0 {
            options.push(MountOption::AllowOther);
        }

        let session = match fuser::spawn_mount2(fs, base_dir.path(), &options) {
            Ok(session) => session,
            Err(e) => {
                eprintln!("[harness] cannot mount ({e}), skipping mount test");
                return None;
            }
        };

        let mount_path = base_dir.path().to_path_buf();
        if !wait_for_mount(&mount_path) {
            eprintln!("[harness] mount did not become ready, skipping mount test");
            return None;
        }

        Some(TestMount {
            _session: session,
            mount_path,
            alt_path: alt_dir.path().to_path_buf(),
            _base_dir: base_dir,
            _alt_dir: alt_dir,
            _serial: serial,
        })
    }

    /// A path inside the mount.
    pub fn mpath(&self, rel: &str) -> PathBuf {
        self.mount_path.join(rel)
    }

    /// A path inside the alt backing, bypassing the mount.
    pub fn apath(&self, rel: &str) -> PathBuf {
        self.alt_path.join(rel)
    }

    /// Writes a file through the mount.
    pub fn write(&self, rel: &str, content: &[u8]) -> std::io::Result<()> {
        fs::write(self.mpath(rel), content)
    }

    /// Reads a file through the mount.
    pub fn read(&self, rel: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.mpath(rel))
    }

    /// Sorted names in a directory of the mount.
    pub fn list(&self, rel: &str) -> std::io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.mpath(rel))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Creates the alt backing on a different filesystem than the base when the
/// host allows it, so that cross-backing renames genuinely cross
/// filesystems and exercise the `EXDEV` fallback. Falls back to the default
/// temp location otherwise.
fn alt_temp_dir() -> TempDir {
    if Path::new("/dev/shm").is_dir() {
        if let Ok(dir) = tempfile::Builder::new()
            .prefix("shuntfs-alt-")
            .tempdir_in("/dev/shm")
        {
            return dir;
        }
    }
    TempDir::new().expect("create alt temp dir")
}

/// Polls the kernel mount table until the mount point shows up.
fn wait_for_mount(mount_path: &Path) -> bool {
    let needle = mount_path.display().to_string();
    let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
    while Instant::now() < deadline {
        if let Ok(mounts) = fs::read_to_string("/proc/self/mounts") {
            if mounts.lines().any(|line| line.contains(needle.as_str())) {
                return true;
            }
        }
        std::thread::sleep(MOUNT_CHECK_INTERVAL);
    }
    false
}
