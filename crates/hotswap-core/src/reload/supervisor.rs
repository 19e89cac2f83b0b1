//! Long-lived entry point that owns the transaction lock and runs reloads on
//! a worker thread.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::config::{PackageConfig, ReloaderSettings};
use crate::error::{Error, Result};
use crate::host::HostBridge;

use super::orchestrator::{ReloadOrchestrator, ReloadReport, ReloadRequest};
use super::status::{LogStatus, StatusSink};

/// Process-wide lock admitting one reload transaction at a time.
///
/// Acquisition never blocks.
#[derive(Debug, Clone, Default)]
pub struct TransactionLock {
    held: Arc<AtomicBool>,
}

impl TransactionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or `None` if a transaction already holds it.
    pub fn try_acquire(&self) -> Option<TransactionPermit> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TransactionPermit {
                held: Arc::clone(&self.held),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of holding the [`TransactionLock`]; released on drop.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the permit is dropped"]
pub struct TransactionPermit {
    held: Arc<AtomicBool>,
}

impl Drop for TransactionPermit {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// A reload running on its worker thread.
pub struct ReloadHandle {
    handle: JoinHandle<Result<Vec<ReloadReport>>>,
}

impl ReloadHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the reload and every chained sibling to finish. Returns one
    /// report per package, in reload order.
    pub fn wait(self) -> Result<Vec<ReloadReport>> {
        self.handle.join().map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Error::WorkerPanicked(message)
        })?
    }
}

/// Supervises reload transactions for one host.
///
/// Lives outside anything it reloads, so its lock and settings survive every
/// transaction.
pub struct Reloader<H: HostBridge> {
    host: Arc<H>,
    settings: ReloaderSettings,
    lock: TransactionLock,
    reload_on_save: AtomicBool,
    status: Arc<dyn StatusSink>,
}

impl<H: HostBridge> Reloader<H> {
    pub fn new(host: Arc<H>, settings: ReloaderSettings) -> Self {
        let reload_on_save = AtomicBool::new(settings.reload_on_save);
        Self {
            host,
            settings,
            lock: TransactionLock::new(),
            reload_on_save,
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

    pub fn settings(&self) -> &ReloaderSettings {
        &self.settings
    }

    pub fn transaction_lock(&self) -> &TransactionLock {
        &self.lock
    }

    pub fn reload_on_save(&self) -> bool {
        self.reload_on_save.load(Ordering::Relaxed)
    }

    /// Flip reload-on-save and return the new value. Not persisted.
    pub fn toggle_reload_on_save(&self) -> bool {
        let enabled = !self.reload_on_save.fetch_xor(true, Ordering::Relaxed);
        let state = if enabled { "on" } else { "off" };
        tracing::info!("package reloader: reload on save is {}", state);
        enabled
    }

    /// Whether `package` is installed and not in `ignored_packages`.
    pub fn has_package(&self, package: &str) -> bool {
        self.host.layout().has_package(package)
            && !self.settings.ignored_packages.iter().any(|p| p == package)
    }

    /// Start reloading `package` on a worker thread.
    ///
    /// Fails with [`Error::Busy`] right away, without touching the host, if
    /// another reload is running.
    pub fn request_reload(
        &self,
        package: &str,
        extra_dependencies: &[String],
        verbose: Option<bool>,
    ) -> Result<ReloadHandle> {
        let mut request = ReloadRequest::new(package).with_dependencies(extra_dependencies.to_vec());
        request.verbose = verbose;
        self.submit(request)
    }

    /// Start a fully specified reload on a worker thread.
    pub fn submit(&self, request: ReloadRequest) -> Result<ReloadHandle> {
        let Some(permit) = self.lock.try_acquire() else {
            self.status.on_busy(&request.package);
            return Err(Error::Busy);
        };

        let host = Arc::clone(&self.host);
        let settings = self.settings.clone();
        let status = Arc::clone(&self.status);
        let handle = thread::Builder::new()
            .name("hotswap-reload".to_string())
            .spawn(move || {
                let _permit = permit;
                run_chain(host, settings, status, request)
            })?;

        Ok(ReloadHandle { handle })
    }

    /// Reload `package` and wait for the result.
    pub fn reload_blocking(
        &self,
        package: &str,
        extra_dependencies: &[String],
        verbose: Option<bool>,
    ) -> Result<Vec<ReloadReport>> {
        self.request_reload(package, extra_dependencies, verbose)?.wait()
    }

    /// React to a saved file: reload its package when reload-on-save is on
    /// and the file is a unit file under the packages directory.
    pub fn on_saved(&self, path: &Path) -> Result<Option<ReloadHandle>> {
        if !self.reload_on_save() {
            return Ok(None);
        }

        let layout = self.host.layout();
        if !layout.is_unit_file(path) {
            return Ok(None);
        }
        let Some(package) = layout.package_of(path) else {
            tracing::debug!("{} is not inside a package", path.display());
            return Ok(None);
        };
        if !self.has_package(&package) {
            tracing::debug!("{} is not installed or is ignored", package);
            return Ok(None);
        }

        self.request_reload(&package, &[], None).map(Some)
    }
}

/// Reload `request.package`, then its siblings breadth-first. Each package
/// reloads at most once per chain; a failure stops the chain.
fn run_chain<H: HostBridge>(
    host: Arc<H>,
    settings: ReloaderSettings,
    status: Arc<dyn StatusSink>,
    request: ReloadRequest,
) -> Result<Vec<ReloadReport>> {
    let verbose = request.verbose;
    let orchestrator = ReloadOrchestrator::new(Arc::clone(&host), settings).with_status(status);

    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from([request]);
    let mut reports = Vec::new();

    while let Some(mut request) = queue.pop_front() {
        if !visited.insert(request.package.clone()) {
            continue;
        }

        let config = PackageConfig::read(&*host, &request.package);
        for dependency in config.dependencies {
            if !request.dependencies.contains(&dependency) {
                request.dependencies.push(dependency);
            }
        }

        let report = orchestrator.reload(&request)?;
        if report.is_reloaded() {
            for sibling in config.siblings {
                let mut next = ReloadRequest::new(sibling);
                next.verbose = verbose;
                queue.push_back(next);
            }
        }
        reports.push(report);
    }

    Ok(reports)
}
