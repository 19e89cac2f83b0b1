//! Closure command: show which packages a reload of a package would touch.

use hotswap_core::HostBridge;

use crate::colors;
use crate::host;

/// Execute the closure command.
pub fn execute(manifest_path: &str, package: &str) -> anyhow::Result<()> {
    let (host, _dirs, _) = host::build(manifest_path)?;

    let Some(graph) = host.dependency_graph() else {
        println!(
            "{}No dependency manager:{} a reload of {} only touches {}",
            colors::YELLOW,
            colors::RESET,
            package,
            package
        );
        return Ok(());
    };

    if !graph.contains(package) {
        anyhow::bail!("Unknown package: {}", package);
    }

    println!("{}{}{}", colors::BOLD, package, colors::RESET);
    print_list("dependents", graph.dependents(package));
    print_list("requires", graph.requirements(package));
    Ok(())
}

fn print_list(label: &str, names: impl IntoIterator<Item = String>) {
    let names: Vec<String> = names.into_iter().collect();
    let shown = if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    };
    println!("  {}{}:{} {}", colors::CYAN, label, colors::RESET, shown);
}
