//! Units command: list the working set a reload would use.

use std::sync::Arc;

use hotswap_core::{ReloadOrchestrator, ReloadRequest, ReloaderSettings};

use crate::colors;
use crate::host;

/// Execute the units command.
pub fn execute(
    manifest_path: &str,
    package: &str,
    settings: ReloaderSettings,
) -> anyhow::Result<()> {
    let loaded = host::boot(manifest_path)?;
    let orchestrator = ReloadOrchestrator::new(Arc::clone(&loaded.host), settings);

    let packages = orchestrator.resolve_packages(&ReloadRequest::new(package));
    let working_set = orchestrator.working_set(&packages);
    let plugins = working_set.plugins();

    println!(
        "{}{}{} ({} units)",
        colors::BOLD,
        packages.iter().cloned().collect::<Vec<_>>().join(", "),
        colors::RESET,
        working_set.len()
    );
    for name in working_set.names() {
        if plugins.iter().any(|p| p == name) {
            println!("  {} {}[plugin]{}", name, colors::GREEN, colors::RESET);
        } else {
            println!("  {name}");
        }
    }
    Ok(())
}
