//! One end-to-end reload transaction.
//!
//! ```text
//! Idle -> Unregistering -> Evicted -> Reloading -> Reactivating -> SweepingLeftovers -> Barrier -> Done
//!                                         \______________\_______________/
//!                                                         v
//!                                                       Failed (restore, re-raise)
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::classify::{UnitClassifier, WorkingSet};
use crate::config::ReloaderSettings;
use crate::error::{Error, Result};
use crate::graph::DependencyResolver;
use crate::host::HostBridge;
use crate::registry::UnitRef;

use super::barrier::{self, BarrierOutcome};
use super::importer::ReloadingImporter;
use super::status::{LogStatus, StatusSink};

/// What to reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadRequest {
    pub package: String,
    /// Extra packages whose units join the working set.
    pub dependencies: Vec<String>,
    /// Extra qualified unit names to reload after the plugins.
    pub extra_modules: Vec<String>,
    /// Per-request override of [`ReloaderSettings::verbose`].
    pub verbose: Option<bool>,
}

impl ReloadRequest {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            ..Self::default()
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = String>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    pub fn with_extra_modules(mut self, modules: impl IntoIterator<Item = String>) -> Self {
        self.extra_modules.extend(modules);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }
}

/// Terminal state of a transaction that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
    Reloaded,
    /// The package had no loaded units. Nothing was touched.
    NotLoaded,
}

/// Transaction state, logged at debug level as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Unregistering,
    Evicted,
    Reloading,
    Reactivating,
    Failed,
    SweepingLeftovers,
    Barrier,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Unregistering => "unregistering",
            Phase::Evicted => "evicted",
            Phase::Reloading => "reloading",
            Phase::Reactivating => "reactivating",
            Phase::Failed => "failed",
            Phase::SweepingLeftovers => "sweeping leftovers",
            Phase::Barrier => "barrier",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Outcome of a transaction that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub package: String,
    pub status: ReloadStatus,
    /// Packages whose units made up the working set.
    pub packages: BTreeSet<String>,
    /// Working-set units, in segment order.
    pub working_set: Vec<String>,
    /// Plugin units of the working set, in segment order.
    pub plugins: Vec<String>,
    /// Units re-executed, in reload order.
    pub reloaded: Vec<String>,
    /// Working-set units absent from the registry afterwards.
    pub not_reloaded: Vec<String>,
    /// Plugins whose deactivation failed (and was ignored).
    pub deactivation_failures: Vec<String>,
    pub barrier: BarrierOutcome,
}

impl ReloadReport {
    fn not_loaded(package: &str) -> Self {
        Self {
            package: package.to_string(),
            status: ReloadStatus::NotLoaded,
            packages: BTreeSet::new(),
            working_set: Vec::new(),
            plugins: Vec::new(),
            reloaded: Vec::new(),
            not_reloaded: Vec::new(),
            deactivation_failures: Vec::new(),
            barrier: BarrierOutcome::Skipped,
        }
    }

    pub fn is_reloaded(&self) -> bool {
        self.status == ReloadStatus::Reloaded
    }
}

/// Drives reload transactions against a host.
///
/// The orchestrator does no locking of its own; callers go through
/// [`crate::reload::Reloader`], which serializes transactions.
pub struct ReloadOrchestrator<H: HostBridge> {
    host: Arc<H>,
    settings: ReloaderSettings,
    status: Arc<dyn StatusSink>,
}

impl<H: HostBridge> ReloadOrchestrator<H> {
    pub fn new(host: Arc<H>, settings: ReloaderSettings) -> Self {
        Self {
            host,
            settings,
            status: Arc::new(LogStatus),
        }
    }

    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Packages whose units join the working set for `request`: the package,
    /// the requested dependencies, and everything that depends on either.
    pub fn resolve_packages(&self, request: &ReloadRequest) -> BTreeSet<String> {
        let resolver = DependencyResolver::new(self.host.dependency_graph())
            .with_missing_warning(self.settings.warn_on_missing_dependency_manager);

        let roots: Vec<&str> = std::iter::once(request.package.as_str())
            .chain(request.dependencies.iter().map(String::as_str))
            .collect();

        let mut packages: BTreeSet<String> = roots.iter().map(|r| r.to_string()).collect();
        packages.extend(resolver.closure(roots.iter().copied()));
        packages
    }

    /// Classify the loaded units of `packages` into a working set.
    pub fn working_set(&self, packages: &BTreeSet<String>) -> WorkingSet {
        let packages: Vec<String> = packages.iter().cloned().collect();
        WorkingSet::from_classified(UnitClassifier::new(&*self.host).classify(&packages))
    }

    /// Run one transaction to completion.
    ///
    /// Emits exactly one terminal status. Returns `Err` only for
    /// [`Error::ReloadFailure`] and invalid requests.
    pub fn reload(&self, request: &ReloadRequest) -> Result<ReloadReport> {
        let package = request.package.as_str();
        if package.is_empty() {
            return Err(Error::InvalidOperation("empty package name".to_string()));
        }

        if !self.host.registry().has_package(package) {
            tracing::debug!("{} has no loaded units", package);
            self.status.on_not_loaded(package);
            return Ok(ReloadReport::not_loaded(package));
        }

        let verbose = request.verbose.unwrap_or(self.settings.verbose);
        if verbose {
            tracing::info!("begin {}", "=".repeat(54));
        }

        match self.run(request, verbose) {
            Ok(report) => {
                if verbose {
                    tracing::info!("end {}", "-".repeat(56));
                }
                self.status.on_reloaded(package);
                Ok(report)
            }
            Err(e) => {
                if verbose {
                    tracing::info!("reload failed {}", "-".repeat(46));
                }
                self.status.on_failed(package, &e);
                Err(e)
            }
        }
    }

    fn run(&self, request: &ReloadRequest, verbose: bool) -> Result<ReloadReport> {
        let package = request.package.as_str();
        let mut phase = Phase::Idle;
        let registry = self.host.registry();

        let packages = self.resolve_packages(request);
        let working_set = self.working_set(&packages);
        let plugins = working_set.plugins();
        tracing::debug!(
            "{}: {} units over {} packages, {} plugins",
            package,
            working_set.len(),
            packages.len(),
            plugins.len()
        );

        // Pre-transaction objects, working set first, then extras.
        let mut snapshot: Vec<UnitRef> = working_set
            .names()
            .filter_map(|name| registry.get(name))
            .collect();
        for name in &request.extra_modules {
            if !working_set.contains(name)
                && let Some(unit) = registry.get(name)
            {
                snapshot.push(unit);
            }
        }
        let snapshot_names: BTreeSet<String> =
            snapshot.iter().map(|u| u.name().to_string()).collect();

        advance(package, &mut phase, Phase::Unregistering);
        let mut deactivation_failures = Vec::new();
        for plugin in &plugins {
            if !registry.contains(plugin) {
                continue;
            }
            if let Err(e) = self.host.deactivate_plugin(plugin) {
                tracing::warn!("ignoring deactivation failure of {}: {}", plugin, e);
                deactivation_failures.push(plugin.clone());
            }
        }

        advance(package, &mut phase, Phase::Evicted);
        for unit in &snapshot {
            registry.remove(unit.name());
        }

        let trace = verbose.then(|| Arc::clone(&self.status));
        let importer =
            ReloadingImporter::new(Arc::clone(&self.host), snapshot.iter().cloned(), trace);
        let outcome = {
            let _guard = importer.install();
            self.reload_units(package, &mut phase, &importer, &plugins, &snapshot_names)
        };

        if let Err(e) = outcome {
            advance(package, &mut phase, Phase::Failed);
            let restored = restore_absent(&*self.host, &snapshot);
            tracing::debug!("{}: restored {} units after failure", package, restored);
            return Err(e);
        }

        let not_reloaded: Vec<String> = working_set
            .names()
            .chain(request.extra_modules.iter().map(String::as_str))
            .filter(|name| !registry.contains(name))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for name in &not_reloaded {
            tracing::info!("note: {} is not reloaded", name);
        }

        advance(package, &mut phase, Phase::Barrier);
        let barrier = barrier::synchronize(&self.host, &self.settings.barrier);

        advance(package, &mut phase, Phase::Done);
        Ok(ReloadReport {
            package: package.to_string(),
            status: ReloadStatus::Reloaded,
            packages,
            working_set: working_set.names().map(str::to_string).collect(),
            plugins,
            reloaded: importer.reloaded(),
            not_reloaded,
            deactivation_failures,
            barrier,
        })
    }

    /// Reloading, Reactivating and SweepingLeftovers, with the importer
    /// installed.
    fn reload_units(
        &self,
        package: &str,
        phase: &mut Phase,
        importer: &ReloadingImporter<H>,
        plugins: &[String],
        snapshot_names: &BTreeSet<String>,
    ) -> Result<()> {
        let failure = |unit: &str, e: Error| Error::ReloadFailure {
            package: package.to_string(),
            unit: e.unit().unwrap_or(unit).to_string(),
            source: Box::new(e),
        };

        advance(package, phase, Phase::Reloading);
        // Only top-level plugins are reloaded directly; their own imports
        // reach everything else in construction order.
        for plugin in plugins {
            if let Some(unit) = importer.original(plugin) {
                importer.reload(unit).map_err(|e| failure(plugin, e))?;
            }
        }

        advance(package, phase, Phase::Reactivating);
        for plugin in plugins {
            let result = if snapshot_names.contains(plugin) {
                match self.host.registry().get(plugin) {
                    Some(unit) => self.host.activate_plugin(&unit),
                    None => Err(Error::UnitNotFound(plugin.clone())),
                }
            } else {
                self.host.first_load(plugin).map(|_| ())
            };
            result.map_err(|e| failure(plugin, e))?;
        }

        advance(package, phase, Phase::SweepingLeftovers);
        for name in importer.remaining() {
            if let Some(unit) = importer.original(&name) {
                importer.reload(unit).map_err(|e| failure(&name, e))?;
            }
        }
        Ok(())
    }
}

fn advance(package: &str, phase: &mut Phase, next: Phase) {
    tracing::debug!("{}: {} -> {}", package, phase, next);
    *phase = next;
}

/// Put every snapshot unit missing from the registry back, stale. Returns the
/// number of units restored.
fn restore_absent(host: &dyn HostBridge, snapshot: &[UnitRef]) -> usize {
    let registry = host.registry();
    let mut restored = 0;
    for unit in snapshot {
        if !registry.contains(unit.name()) {
            tracing::warn!("restoring previous {} after failed reload", unit.name());
            registry.insert(Arc::clone(unit));
            restored += 1;
        }
    }
    restored
}
