//! shuntfs - mount a directory while redirecting chosen prefixes elsewhere.
//!
//! Usage: shuntfs <mount-point> <alt-dir> [prefix ...]
//!
//! The mount point doubles as the default backing: its contents keep being
//! served for every path that does not match a redirect prefix, through a
//! directory handle acquired before the mount shadows it.

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use shuntfs::{Backings, Router, ShuntFs};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shuntfs")]
#[command(about = "Union a directory with an alternate location, redirecting chosen path prefixes")]
#[command(version)]
#[command(after_help = "\
Example: shuntfs /tmp /dev/shm file1 file2 file3\n\n\
Everything under /tmp keeps coming from /tmp, except file1, file2 and\n\
file3, which are served from /dev/shm instead. Prefixes are relative to\n\
the mount point and must not start or end with a slash.")]
struct Cli {
    /// Directory to mount over; also the default backing
    mount_point: PathBuf,

    /// Alternate backing directory for redirected prefixes
    alt: PathBuf,

    /// Path prefixes (relative to the mount point) served from the
    /// alternate backing
    prefixes: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Any user may address the mount, so the daemon must be able to assume
    // any caller's identity.
    if unsafe { libc::getuid() } != 0 {
        bail!("shuntfs must run as root to serve requests on behalf of arbitrary users");
    }

    let router =
        Router::from_args(cli.prefixes.iter().cloned()).context("invalid redirect prefix")?;

    // Both directory handles must exist before mounting: once the mount
    // covers the mount point, the base tree is unreachable by path.
    let backings = Backings::open(&cli.mount_point, &cli.alt).with_context(|| {
        format!(
            "failed to open backing directories {} and {}",
            cli.mount_point.display(),
            cli.alt.display()
        )
    })?;

    info!(
        mount = %cli.mount_point.display(),
        alt = %cli.alt.display(),
        redirects = cli.prefixes.len(),
        "mounting"
    );

    let fs = ShuntFs::new(backings, router);

    // Request dispatch must stay serialized: credential switching and the
    // cwd-style routing are process-wide. The session loop delivers one
    // request at a time; mounting over a non-empty directory is the fuse3
    // default.
    let options = vec![
        fuser::MountOption::FSName("shuntfs".to_string()),
        fuser::MountOption::AllowOther,
        fuser::MountOption::AutoUnmount,
    ];

    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to set signal handler")?;

    let session = fuser::spawn_mount2(fs, &cli.mount_point, &options)
        .context("failed to mount filesystem")?;

    info!(
        "filesystem mounted at {} (press Ctrl+C to unmount)",
        cli.mount_point.display()
    );

    match rx.recv() {
        Ok(()) => info!("received interrupt, unmounting"),
        Err(_) => warn!("signal channel closed unexpectedly"),
    }

    drop(session);
    info!("filesystem unmounted");
    Ok(())
}
