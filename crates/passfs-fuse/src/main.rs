//! passfs - Mount a directory as a pass-through FUSE filesystem.
//!
//! Usage: passfs [--debug] [--read-only] <ROOT> <MOUNTPOINT>

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::stat::{umask, Mode};
use passfs_core::{SessionState, TransformKey};
use passfs_fuse::{MountConfig, PassthroughFS};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "passfs")]
#[command(about = "Mount a directory as a pass-through FUSE filesystem")]
#[command(version)]
struct Cli {
    /// Backing directory to expose
    root: PathBuf,

    /// Mountpoint for the filesystem
    mount: PathBuf,

    /// Transform key for the session (if not provided, will use PASSFS_KEY or prompt)
    #[arg(short, long)]
    key: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Mount as read-only (default: read-write)
    #[arg(long)]
    read_only: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Attribute cache TTL in milliseconds
    #[arg(long, default_value_t = 1000)]
    attr_ttl_ms: u64,
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

    // Requested modes reach the host untouched; the kernel already applied
    // the caller's umask.
    umask(Mode::empty());

    if !cli.root.is_dir() {
        anyhow::bail!("Root directory does not exist: {}", cli.root.display());
    }
    if !cli.mount.is_dir() {
        anyhow::bail!("Mountpoint does not exist: {}", cli.mount.display());
    }

    let key = get_key(&cli)?;
    let session = SessionState::new(&cli.root, TransformKey::from(key))
        .context("Failed to initialize session")?;

    let config = MountConfig::default()
        .attr_ttl(Duration::from_millis(cli.attr_ttl_ms))
        .read_only(cli.read_only)
        .allow_other(cli.allow_other);

    info!(
        root = %session.root_directory().display(),
        mount = %cli.mount.display(),
        "Mounting directory"
    );
    let fs = PassthroughFS::new(Arc::new(session), config);
    mount_and_wait(&cli, fs)
}

/// Get the transform key from CLI, environment, or prompt.
fn get_key(cli: &Cli) -> Result<Zeroizing<String>> {
    if let Some(ref key) = cli.key {
        Ok(Zeroizing::new(key.clone()))
    } else if let Ok(key) = std::env::var("PASSFS_KEY") {
        Ok(Zeroizing::new(key))
    } else {
        Ok(Zeroizing::new(
            rpassword::prompt_password("Transform key: ").context("Failed to read key")?,
        ))
    }
}

/// Mount the filesystem and wait for Ctrl+C.
fn mount_and_wait(cli: &Cli, fs: PassthroughFS) -> Result<()> {
    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        tx.send(()).ok();
    })
    .context("Failed to set signal handler")?;

    info!("Mounting filesystem (press Ctrl+C to unmount)");

    let handle = passfs_fuse::mount(fs, &cli.mount).map_err(|e| {
        error!(error = %e, "Mount failed");
        anyhow::anyhow!("Failed to mount filesystem: {e}")
    })?;

    info!("Filesystem mounted at {}", cli.mount.display());

    match rx.recv() {
        Ok(()) => info!("Received interrupt signal, unmounting..."),
        Err(_) => warn!("Signal channel closed unexpectedly"),
    }

    handle.unmount();
    info!("Filesystem unmounted");
    Ok(())
}
