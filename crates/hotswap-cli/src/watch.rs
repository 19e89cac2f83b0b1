//! Watch command implementation.
//!
//! Keeps a simulated host running and reloads packages as their sources
//! change: either the manifest is edited, or a unit file is saved under the
//! host's packages directory.
//!
//! At startup every unpacked unit is written to `.hotswap/Packages` as a JSON
//! statement list. Saving one of those files replaces the unit's source and
//! reloads its package; saves that leave the body unchanged are ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hotswap_core::host::sim::{HostManifest, SimHost};
use hotswap_core::{Error, ReloadReport, Reloader, ReloaderSettings};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;

use crate::colors;
use crate::host;
use crate::reload::print_report;

/// Something the watcher noticed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The host manifest was written.
    ManifestChanged,
    /// A unit file under the packages directory was saved.
    UnitSaved(PathBuf),
}

/// Debounced watcher over a manifest and a packages directory.
pub struct HostWatcher {
    /// Debouncer handle (kept alive to maintain watcher).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl HostWatcher {
    pub fn new(manifest: &Path, packages_dir: &Path, unit_extension: &str) -> Result<Self, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let manifest_file = manifest.to_path_buf();
        let extension = unit_extension.to_string();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: DebounceEventResult| {
                let Ok(events) = result else {
                    return;
                };
                for event in events {
                    let path = &event.path;
                    let watch_event = if path == &manifest_file {
                        WatchEvent::ManifestChanged
                    } else if path.extension().is_some_and(|ext| ext == extension.as_str())
                        && path.exists()
                    {
                        WatchEvent::UnitSaved(path.clone())
                    } else {
                        continue;
                    };
                    let _ = tx.send(watch_event);
                }
            },
        )
        .map_err(|e| Error::Watch(e.to_string()))?;

        let manifest_dir = manifest.parent().unwrap_or(Path::new("."));
        debouncer
            .watcher()
            .watch(manifest_dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Watch(e.to_string()))?;
        debouncer
            .watcher()
            .watch(packages_dir, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(e.to_string()))?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

/// Execute the watch command.
pub async fn execute(manifest_path: &str, settings: ReloaderSettings) -> anyhow::Result<()> {
    let loaded = host::boot(manifest_path)?;
    let host = Arc::clone(&loaded.host);
    let written = host.write_sources()?;
    tracing::debug!("wrote {} unit files", written);
    let reloader = Arc::new(Reloader::new(Arc::clone(&host), settings));

    println!(
        "\n{}hotswap watch{} - {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        loaded.manifest_path.display(),
        colors::RESET
    );
    println!("{}", "─".repeat(50));
    println!(
        "{}Watching for changes... (Ctrl+C to stop){}",
        colors::DIM,
        colors::RESET
    );

    let mut watcher = HostWatcher::new(
        &loaded.manifest_path,
        &loaded.dirs.layout.packages_dir,
        host::UNIT_EXTENSION,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create file watcher: {}", e))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = watcher.recv() => match event {
                Some(WatchEvent::ManifestChanged) => {
                    manifest_changed(&loaded.manifest_path, &host, &reloader).await;
                }
                Some(WatchEvent::UnitSaved(path)) => {
                    unit_saved(path, &host, &reloader).await;
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                println!("\n{}Stopped{}", colors::DIM, colors::RESET);
                break;
            }
        }
    }

    Ok(())
}

async fn manifest_changed(path: &Path, host: &SimHost, reloader: &Arc<Reloader<SimHost>>) {
    let manifest = match HostManifest::load(path) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("{}Error:{} {}", colors::RED, colors::RESET, e.with_hint());
            return;
        }
    };

    let changed = host.apply_manifest(&manifest);
    if let Err(e) = host.write_sources() {
        eprintln!("{}Error:{} {}", colors::RED, colors::RESET, e.with_hint());
    }
    if changed.is_empty() {
        tracing::debug!("manifest changed without source edits");
        return;
    }

    for package in changed {
        println!(
            "\n{}{} changed, reloading...{}",
            colors::YELLOW,
            package,
            colors::RESET
        );
        let reloader = Arc::clone(reloader);
        let result =
            tokio::task::spawn_blocking(move || reloader.reload_blocking(&package, &[], None))
                .await;
        print_outcome(result.map(|r| r.map(Some)));
    }
}

async fn unit_saved(path: PathBuf, host: &Arc<SimHost>, reloader: &Arc<Reloader<SimHost>>) {
    let host = Arc::clone(host);
    let reloader = Arc::clone(reloader);
    let result = tokio::task::spawn_blocking(move || -> hotswap_core::Result<_> {
        let Some(unit) = host.read_source_file(&path)? else {
            tracing::debug!("{} saved without changes", path.display());
            return Ok(None);
        };
        println!("\n{}{} changed, reloading...{}", colors::YELLOW, unit, colors::RESET);
        reloader
            .on_saved(&path)
            .and_then(|handle| handle.map(|h| h.wait()).transpose())
    })
    .await;
    print_outcome(result);
}

fn print_outcome(
    result: Result<hotswap_core::Result<Option<Vec<ReloadReport>>>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(Some(reports))) => reports.iter().for_each(print_report),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => eprintln!("{}Error:{} {}", colors::RED, colors::RESET, e.with_hint()),
        Err(e) => eprintln!("{}Error:{} reload task failed: {}", colors::RED, colors::RESET, e),
    }
}
