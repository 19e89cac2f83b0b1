//! Terminal status notifications for reload transactions.

use crate::error::Error;

use super::tracer::trace_line;

/// Receives exactly one terminal notification per reload transaction.
pub trait StatusSink: Send + Sync {
    /// The package reloaded successfully.
    fn on_reloaded(&self, package: &str);

    /// The transaction for `package` aborted with `error`.
    fn on_failed(&self, package: &str, error: &Error);

    /// `package` has no loaded units; nothing was done.
    fn on_not_loaded(&self, package: &str);

    /// A request was rejected because another transaction holds the lock.
    fn on_busy(&self, _package: &str) {}

    /// `unit` is about to be re-executed, `depth` reloads deep. Only called
    /// for verbose transactions.
    fn on_unit_reloading(&self, _depth: usize, _unit: &str) {}
}

/// Default sink: writes status lines to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn on_reloaded(&self, package: &str) {
        tracing::info!("package reloader: {} reloaded", package);
    }

    fn on_failed(&self, package: &str, error: &Error) {
        tracing::error!("package reloader: failed to reload {}: {}", package, error);
    }

    fn on_not_loaded(&self, package: &str) {
        tracing::info!("package reloader: {} is not loaded", package);
    }

    fn on_busy(&self, package: &str) {
        tracing::warn!("package reloader: reload of {} rejected, another reload is running", package);
    }

    fn on_unit_reloading(&self, depth: usize, unit: &str) {
        tracing::info!("reloading {}", trace_line(depth, unit));
    }
}
