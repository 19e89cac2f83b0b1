//! Booting a simulated host from a manifest file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hotswap_core::host::sim::{HostManifest, SimHost};
use hotswap_core::{HostDirs, ReloaderSettings};

/// File extension of unit files in the simulated packages directory.
pub const UNIT_EXTENSION: &str = "unit";

/// A booted host and where it lives on disk.
pub struct LoadedHost {
    pub host: Arc<SimHost>,
    pub dirs: HostDirs,
    pub manifest_path: PathBuf,
}

/// Read `manifest_path`, build the host and load every plugin, the way the
/// host does at startup.
pub fn boot(manifest_path: &str) -> anyhow::Result<LoadedHost> {
    let (host, dirs, manifest_path) = build(manifest_path)?;
    let plugins = host.boot()?;
    tracing::debug!("booted {} plugins", plugins.len());
    host.take_calls();

    Ok(LoadedHost {
        host: Arc::new(host),
        dirs,
        manifest_path,
    })
}

/// Build the host without loading anything.
pub fn build(manifest_path: &str) -> anyhow::Result<(SimHost, HostDirs, PathBuf)> {
    let path = Path::new(manifest_path);
    if !path.exists() {
        anyhow::bail!("Manifest not found: {}", manifest_path);
    }

    let manifest_path = path.canonicalize()?;
    let manifest = HostManifest::load(&manifest_path)?;
    let dirs = HostDirs::from_manifest_path(&manifest_path, UNIT_EXTENSION)?;
    let host = SimHost::from_manifest(&manifest, dirs.layout.clone());
    Ok((host, dirs, manifest_path))
}

/// Settings from `--settings`, or the defaults.
pub fn settings(path: Option<&str>) -> anyhow::Result<ReloaderSettings> {
    match path {
        Some(path) => Ok(ReloaderSettings::load(Path::new(path))?),
        None => Ok(ReloaderSettings::default()),
    }
}
