//! Hot in-process reloading of a package's code units.
//!
//! This crate provides:
//! - A unit registry abstraction and in-memory implementation
//! - Dependency closure resolution over declared package dependencies
//! - Working-set classification of loaded units into plugins and helpers
//! - A reload engine that re-executes units in place, in import order
//! - A simulated host for tests and the command line

pub mod classify;
pub mod config;
pub mod error;
pub mod graph;
pub mod host;
pub mod paths;
pub mod registry;
pub mod reload;

pub use classify::{UnitClassifier, WorkingSet};
pub use config::{BarrierConfig, PackageConfig, ReloaderSettings};
pub use error::{Error, Result};
pub use graph::{DependencyGraph, DependencyResolver};
pub use host::{HostBridge, Loader, LoaderGuard, LoaderSlot};
pub use paths::{HostDirs, PackageLayout};
pub use registry::{Attr, CodeUnit, MemoryRegistry, ModuleRegistry, UnitRef};
pub use reload::{
    BarrierOutcome, ReloadHandle, ReloadOrchestrator, ReloadReport, ReloadRequest, ReloadStatus,
    Reloader, ReloadingImporter, StatusSink,
};
