//! Synchronization with the host's asynchronous plugin pipeline.
//!
//! Activation requests made during a transaction complete on the host's own
//! schedule. To know the pipeline has drained, a throwaway plugin file is
//! dropped into the packages directory; once the host reports it loaded, the
//! file is deleted and the host must report it unloaded again. Both edges mean
//! every earlier request has been processed.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use uuid::Uuid;

use crate::config::BarrierConfig;
use crate::host::HostBridge;

/// Prefix of throwaway barrier plugins.
pub const BARRIER_PREFIX: &str = "_hotswap_barrier_";

/// How a barrier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Both edges were observed.
    Synced,
    /// The timeout elapsed first. The transaction still succeeds.
    TimedOut,
    /// Disabled, or the throwaway file could not be written.
    Skipped,
}

#[derive(Default)]
struct Signal {
    /// `Some(true)` once both edges were seen, `Some(false)` if polling gave up.
    result: Mutex<Option<bool>>,
    cond: Condvar,
}

impl Signal {
    fn finish(&self, synced: bool) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(synced);
        self.cond.notify_all();
    }
}

/// Block until the host's plugin pipeline has drained, or the timeout
/// elapses.
pub fn synchronize<H: HostBridge>(host: &Arc<H>, config: &BarrierConfig) -> BarrierOutcome {
    if !config.enabled {
        return BarrierOutcome::Skipped;
    }

    let name = format!("{BARRIER_PREFIX}{}", Uuid::new_v4().simple());
    let layout = host.layout();
    let file = layout
        .packages_dir
        .join(format!("{name}.{}", layout.unit_extension));

    if let Err(e) = fs::write(&file, "") {
        tracing::warn!("cannot write barrier file {}: {}", file.display(), e);
        return BarrierOutcome::Skipped;
    }

    let signal = Arc::new(Signal::default());
    let spawned = {
        let host = Arc::clone(host);
        let signal = Arc::clone(&signal);
        let config = config.clone();
        let file = file.clone();
        thread::Builder::new()
            .name("hotswap-barrier".to_string())
            .spawn(move || poll_edges(&*host, &name, &file, &config, &signal))
    };
    if let Err(e) = spawned {
        tracing::warn!("cannot start barrier poller: {}", e);
        remove_quietly(&file);
        return BarrierOutcome::Skipped;
    }

    let guard = signal.result.lock().unwrap_or_else(PoisonError::into_inner);
    let (guard, timeout) = signal
        .cond
        .wait_timeout_while(guard, config.timeout(), |result| result.is_none())
        .unwrap_or_else(PoisonError::into_inner);

    match *guard {
        Some(true) => {
            tracing::debug!("plugin pipeline drained");
            BarrierOutcome::Synced
        }
        _ => {
            if timeout.timed_out() {
                tracing::warn!("timed out waiting for the plugin pipeline, continuing");
            } else {
                tracing::warn!("plugin pipeline never picked up the barrier, continuing");
            }
            BarrierOutcome::TimedOut
        }
    }
}

fn poll_edges(
    host: &dyn HostBridge,
    name: &str,
    file: &Path,
    config: &BarrierConfig,
    signal: &Signal,
) {
    let loaded = wait_for(config, || host.plugin_loaded(name));
    remove_quietly(file);
    if !loaded {
        signal.finish(false);
        return;
    }

    let unloaded = wait_for(config, || !host.plugin_loaded(name));
    signal.finish(unloaded);
}

fn wait_for(config: &BarrierConfig, mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..config.max_polls() {
        if condition() {
            return true;
        }
        thread::sleep(config.poll_interval());
    }
    condition()
}

fn remove_quietly(file: &Path) {
    if let Err(e) = fs::remove_file(file) {
        tracing::debug!("cannot remove barrier file {}: {}", file.display(), e);
    }
}
