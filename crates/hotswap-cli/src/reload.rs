//! Reload command implementation.

use std::sync::Arc;
use std::time::Instant;

use hotswap_core::{
    BarrierOutcome, ReloadReport, ReloadRequest, ReloadStatus, Reloader, ReloaderSettings,
};

use crate::colors;
use crate::host;

/// Execute the reload command.
pub fn execute(
    manifest_path: &str,
    package: &str,
    dependencies: &[String],
    modules: &[String],
    quiet: bool,
    settings: ReloaderSettings,
) -> anyhow::Result<()> {
    let loaded = host::boot(manifest_path)?;
    let reloader = Reloader::new(Arc::clone(&loaded.host), settings);

    println!(
        "\n{}hotswap{} - reloading {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        package,
        colors::RESET
    );
    println!("{}", "─".repeat(50));
    colors::flush_stdout();

    let mut request = ReloadRequest::new(package)
        .with_dependencies(dependencies.iter().cloned())
        .with_extra_modules(modules.iter().cloned());
    if quiet {
        request = request.with_verbose(false);
    }

    let start = Instant::now();
    let reports = reloader.submit(request)?.wait()?;
    for report in &reports {
        print_report(report);
    }

    println!("\n{}", "─".repeat(50));
    println!(
        "{}Done{} in {:.2}s",
        colors::GREEN,
        colors::RESET,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Print one transaction report.
pub fn print_report(report: &ReloadReport) {
    if report.status == ReloadStatus::NotLoaded {
        println!(
            "{}{} is not loaded{}",
            colors::YELLOW,
            report.package,
            colors::RESET
        );
        return;
    }

    println!(
        "{}✓{} {} reloaded ({} units across {})",
        colors::GREEN,
        colors::RESET,
        report.package,
        report.reloaded.len(),
        report.packages.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    for name in &report.reloaded {
        let marker = if report.plugins.contains(name) {
            " [plugin]"
        } else {
            ""
        };
        println!("  {}{}{}{}", colors::DIM, name, marker, colors::RESET);
    }
    for name in &report.deactivation_failures {
        println!(
            "  {}warning:{} could not deactivate {}",
            colors::YELLOW,
            colors::RESET,
            name
        );
    }
    for name in &report.not_reloaded {
        println!("  {}note:{} {} is not reloaded", colors::YELLOW, colors::RESET, name);
    }

    let barrier = match report.barrier {
        BarrierOutcome::Synced => "synced",
        BarrierOutcome::TimedOut => "timed out",
        BarrierOutcome::Skipped => "skipped",
    };
    println!("  {}barrier: {}{}", colors::DIM, barrier, colors::RESET);
}
