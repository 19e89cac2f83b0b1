//! hotswap CLI - in-process package reloading against a simulated host.

mod closure;
mod colors;
mod host;
mod reload;
mod units;
mod watch;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hotswap")]
#[command(about = "Hot in-process reloading of package code units")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Reloader settings file (JSON)
    #[arg(long, global = true)]
    settings: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a host and reload one package
    Reload {
        /// Path to the host manifest (JSON)
        manifest: String,

        /// Package to reload
        package: String,

        /// Extra package whose units join the reload
        #[arg(short, long = "dependency")]
        dependencies: Vec<String>,

        /// Extra unit to reload after the plugins
        #[arg(short, long = "module")]
        modules: Vec<String>,

        /// Suppress per-unit trace lines
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the packages a reload would touch
    Closure {
        /// Path to the host manifest (JSON)
        manifest: String,

        /// Package to inspect
        package: String,
    },

    /// List the units a reload would re-execute
    Units {
        /// Path to the host manifest (JSON)
        manifest: String,

        /// Package to inspect
        package: String,
    },

    /// Keep a host running and reload packages as they change
    Watch {
        /// Path to the host manifest (JSON)
        manifest: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; the engine's reload trace is logged at info
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::WARN.into())
            .add_directive("hotswap_core=info".parse()?)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Helper to format hotswap-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<hotswap_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    let settings = host::settings(cli.settings.as_deref()).map_err(format_error)?;

    match cli.command {
        Commands::Reload {
            manifest,
            package,
            dependencies,
            modules,
            quiet,
        } => {
            reload::execute(&manifest, &package, &dependencies, &modules, quiet, settings)
                .map_err(format_error)?;
        }

        Commands::Closure { manifest, package } => {
            closure::execute(&manifest, &package).map_err(format_error)?;
        }

        Commands::Units { manifest, package } => {
            units::execute(&manifest, &package, settings).map_err(format_error)?;
        }

        Commands::Watch { manifest } => {
            watch::execute(&manifest, settings).await.map_err(format_error)?;
        }
    }

    Ok(())
}
