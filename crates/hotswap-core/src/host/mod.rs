//! Host bridge: the primitives the reload engine needs from the process that
//! owns the code units.
//!
//! # Loader middleware
//!
//! The host routes every unit acquisition made by executing code through its
//! [`LoaderSlot`]. While a reload transaction runs, the engine installs its
//! own [`Loader`] there; the returned [`LoaderGuard`] puts the previous loader
//! back when it is dropped, on success, error or panic alike.
//!
//! ```text
//! unit body executes `import x`
//!     │
//!     └── HostBridge::import
//!             │
//!             ├── LoaderSlot has a loader ──► Loader::acquire (engine)
//!             │                                   └── HostBridge::acquire_unit
//!             └── otherwise ────────────────► HostBridge::acquire_unit
//! ```

pub mod sim;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::paths::PackageLayout;
use crate::registry::{ModuleRegistry, UnitRef};

/// Runtime version assumed for packages that don't declare one.
pub const DEFAULT_RUNTIME_VERSION: &str = "1";

/// Resource a package uses to declare its runtime version.
pub const RUNTIME_VERSION_FILE: &str = ".runtime-version";

/// A unit-acquisition path.
pub trait Loader: Send + Sync {
    /// Return the unit named `name`, loading it if needed, and make sure every
    /// name in `from_list` resolves against it.
    fn acquire(&self, name: &str, from_list: &[String]) -> Result<UnitRef>;
}

/// Holds the loader currently intercepting the host's acquisitions.
#[derive(Default)]
pub struct LoaderSlot {
    active: RwLock<Option<Arc<dyn Loader>>>,
}

impl LoaderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The installed loader, if any.
    pub fn current(&self) -> Option<Arc<dyn Loader>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_installed(&self) -> bool {
        self.current().is_some()
    }

    /// Install `loader` until the returned guard is dropped.
    pub fn install(&self, loader: Arc<dyn Loader>) -> LoaderGuard<'_> {
        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(loader);
        LoaderGuard {
            slot: self,
            previous,
        }
    }
}

impl fmt::Debug for LoaderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderSlot")
            .field("installed", &self.is_installed())
            .finish()
    }
}

/// Restores the previously installed loader on drop.
#[must_use = "the loader is uninstalled as soon as the guard is dropped"]
pub struct LoaderGuard<'a> {
    slot: &'a LoaderSlot,
    previous: Option<Arc<dyn Loader>>,
}

impl Drop for LoaderGuard<'_> {
    fn drop(&mut self) {
        *self
            .slot
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner) = self.previous.take();
    }
}

/// Primitives a host process exposes to the reload engine.
pub trait HostBridge: Send + Sync + 'static {
    /// The process-wide unit registry.
    fn registry(&self) -> &dyn ModuleRegistry;

    /// Where the engine installs its loader during a transaction.
    fn loader_slot(&self) -> &LoaderSlot;

    /// Directories the host loads packages from.
    fn layout(&self) -> &PackageLayout;

    /// The host's own acquisition path, ignoring the loader slot.
    fn acquire_unit(&self, name: &str, from_list: &[String]) -> Result<UnitRef>;

    /// Tell the host a plugin unit is going away.
    fn deactivate_plugin(&self, name: &str) -> Result<()>;

    /// Tell the host a (re)loaded plugin unit is ready.
    fn activate_plugin(&self, unit: &UnitRef) -> Result<()>;

    /// Load and activate a plugin unit the way the host does at startup.
    fn first_load(&self, name: &str) -> Result<UnitRef>;

    /// Re-execute a unit's body in place, keeping its identity.
    fn reexecute(&self, unit: &UnitRef) -> Result<UnitRef>;

    /// Resource paths (`Packages/<pkg>/<file>`) matching a `*suffix` pattern.
    fn find_resources(&self, pattern: &str) -> Vec<String>;

    /// Contents of a resource, if it exists.
    fn load_resource(&self, path: &str) -> Option<String>;

    /// Whether this host can run packages declaring `version`.
    fn supports_runtime(&self, version: &str) -> bool;

    /// Whether the host's plugin pipeline currently has `name` loaded.
    fn plugin_loaded(&self, name: &str) -> bool;

    /// Declared package dependencies, when a dependency manager is present.
    fn dependency_graph(&self) -> Option<DependencyGraph>;

    fn list_loaded_units(&self) -> Vec<UnitRef> {
        self.registry().snapshot()
    }

    fn package_roots(&self, name: &str) -> Vec<PathBuf> {
        self.layout().package_roots(name)
    }

    fn package_runtime_version(&self, package: &str) -> String {
        self.load_resource(&PackageLayout::resource_path(package, RUNTIME_VERSION_FILE))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_RUNTIME_VERSION.to_string())
    }

    /// File stem of a package's own unit (`<dir>/<marker>.<ext>`).
    fn package_marker(&self) -> &str {
        "mod"
    }

    /// Acquire a unit through the installed loader, or the host's own path.
    fn import(&self, name: &str, from_list: &[String]) -> Result<UnitRef> {
        match self.loader_slot().current() {
            Some(loader) => loader.acquire(name, from_list),
            None => self.acquire_unit(name, from_list),
        }
    }
}
