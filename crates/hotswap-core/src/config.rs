//! Reloader settings and per-package reload declarations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::host::HostBridge;
use crate::paths::PackageLayout;

/// Name of the per-package declaration resource.
pub const PACKAGE_CONFIG_FILE: &str = ".package_reloader.json";

/// Settings for the reloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloaderSettings {
    /// Reload a package whenever one of its unit files is saved.
    pub reload_on_save: bool,
    /// Emit one trace line per unit reload.
    pub verbose: bool,
    /// Synchronization with the host's plugin pipeline.
    pub barrier: BarrierConfig,
    /// Warn when the host has no dependency manager.
    pub warn_on_missing_dependency_manager: bool,
    /// Packages reload-on-save leaves alone.
    pub ignored_packages: Vec<String>,
}

impl Default for ReloaderSettings {
    fn default() -> Self {
        Self {
            reload_on_save: true,
            verbose: true,
            barrier: BarrierConfig::default(),
            warn_on_missing_dependency_manager: true,
            ignored_packages: Vec::new(),
        }
    }
}

impl ReloaderSettings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_barrier(mut self, barrier: BarrierConfig) -> Self {
        self.barrier = barrier;
        self
    }
}

/// Bounds of the post-reload synchronization barrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierConfig {
    pub enabled: bool,
    /// Overall wait before giving up, in milliseconds.
    pub timeout_ms: u64,
    /// Delay between host polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 30_000,
            poll_interval_ms: 100,
        }
    }
}

impl BarrierConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Number of polls that fit in the timeout.
    pub fn max_polls(&self) -> u64 {
        (self.timeout_ms / self.poll_interval_ms.max(1)).max(1)
    }
}

/// Reload declarations a package ships in its `.package_reloader.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Extra packages to reload together with this one.
    pub dependencies: Vec<String>,
    /// Packages to chain-reload after this one completes.
    pub siblings: Vec<String>,
}

impl PackageConfig {
    /// Read the declaration of `package` through the host's resources.
    ///
    /// A missing or malformed file yields the empty declaration.
    pub fn read(host: &dyn HostBridge, package: &str) -> Self {
        let resource = PackageLayout::resource_path(package, PACKAGE_CONFIG_FILE);
        let Some(text) = host.load_resource(&resource) else {
            return Self::default();
        };

        match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("ignoring malformed {}: {}", resource, e);
                Self::default()
            }
        }
    }
}
