//! Integration tests for complete reload transactions.
//!
//! Every test boots a simulated host, edits it the way a developer would, and
//! drives reloads through the public entry points.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use hotswap_core::host::sim::{HostCall, HostManifest, SimHost, Statement};
use hotswap_core::reload::trace_line;
use hotswap_core::{
    Attr, BarrierConfig, BarrierOutcome, Error, HostBridge, PackageConfig, PackageLayout,
    ReloadOrchestrator, ReloadReport, ReloadRequest, ReloadStatus, Reloader, ReloaderSettings,
    Result, StatusSink,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

fn settings() -> ReloaderSettings {
    ReloaderSettings::default().with_barrier(BarrierConfig::disabled())
}

/// Host with sources installed but nothing loaded yet.
fn host_with(sources: &[(&str, Vec<Statement>)]) -> SimHost {
    let host = SimHost::new(PackageLayout::new(Path::new("/host"), "unit"));
    for (name, body) in sources {
        host.set_source(name, body.clone());
    }
    host
}

/// Boot the host and forget the calls booting made.
fn boot(host: SimHost) -> Arc<SimHost> {
    host.boot().expect("Failed to boot host");
    host.take_calls();
    Arc::new(host)
}

fn loaded_names(host: &SimHost) -> BTreeSet<String> {
    host.list_loaded_units()
        .iter()
        .map(|unit| unit.name().to_string())
        .collect()
}

fn reload(host: &Arc<SimHost>, package: &str) -> Result<ReloadReport> {
    ReloadOrchestrator::new(Arc::clone(host), settings()).reload(&ReloadRequest::new(package))
}

fn write_package_config(host: &SimHost, package: &str, config: &PackageConfig) {
    let text = serde_json::to_string(config).expect("Failed to serialize config");
    host.set_resource(&format!("Packages/{package}/.package_reloader.json"), &text);
}

// =============================================================================
// Transaction Properties
// =============================================================================

#[test]
fn test_each_unit_reexecuted_at_most_once() {
    let host = boot(host_with(&[
        (
            "Pkg.main",
            vec![Statement::import("Pkg.lib.a"), Statement::import("Pkg.lib.b")],
        ),
        ("Pkg.lib.a", vec![Statement::import("Pkg.lib.common")]),
        ("Pkg.lib.b", vec![Statement::import("Pkg.lib.common")]),
        ("Pkg.lib.common", vec![Statement::define("shared", "1")]),
    ]));

    let report = reload(&host, "Pkg").expect("Reload failed");

    let calls = host.reexecuted();
    let unique: BTreeSet<&String> = calls.iter().collect();
    assert_eq!(calls.len(), unique.len(), "duplicate reloads in {calls:?}");
    assert_eq!(unique.len(), report.working_set.len());
}

#[test]
fn test_reload_follows_natural_import_order() {
    let host = boot(host_with(&[
        (
            "Pkg.main",
            vec![Statement::import("Pkg.lib.b"), Statement::import("Pkg.lib.a")],
        ),
        ("Pkg.lib.a", vec![]),
        ("Pkg.lib.b", vec![Statement::import("Pkg.lib.a")]),
    ]));

    let report = reload(&host, "Pkg").expect("Reload failed");
    assert_eq!(
        report.reloaded,
        vec!["Pkg", "Pkg.main", "Pkg.lib", "Pkg.lib.b", "Pkg.lib.a"]
    );
}

#[test]
fn test_dependents_are_reloaded_with_their_dependency() {
    let host = host_with(&[
        ("A.main", vec![]),
        ("B.main", vec![Statement::import("A.main")]),
        ("C.main", vec![Statement::import("B.main")]),
        ("D.main", vec![]),
    ]);
    host.declare_dependencies("B", &["A".to_string()]);
    host.declare_dependencies("C", &["B".to_string()]);
    let host = boot(host);

    let report = reload(&host, "A").expect("Reload failed");

    assert_eq!(
        report.packages,
        BTreeSet::from(["A".to_string(), "B".to_string(), "C".to_string()])
    );
    let reloaded = host.reexecuted();
    for name in ["A.main", "B.main", "C.main"] {
        assert!(reloaded.contains(&name.to_string()), "{name} not reloaded");
    }
    assert!(!reloaded.iter().any(|name| name.starts_with('D')));
}

#[test]
fn test_missing_dependency_manager_reloads_only_the_package() {
    let host = host_with(&[("A.main", vec![]), ("B.main", vec![Statement::import("A.main")])]);
    host.declare_dependencies("B", &["A".to_string()]);
    let host = boot(host.without_dependency_manager());

    let report = reload(&host, "A").expect("Reload failed");
    assert_eq!(report.packages, BTreeSet::from(["A".to_string()]));
    assert!(!host.reexecuted().contains(&"B.main".to_string()));
}

#[test]
fn test_repeated_reload_keeps_registry_keys() {
    let host = boot(host_with(&[
        ("Pkg.main", vec![Statement::import("Pkg.lib.util")]),
        ("Pkg.lib.util", vec![]),
        ("Other.main", vec![]),
    ]));
    let before = loaded_names(&host);

    reload(&host, "Pkg").expect("First reload failed");
    reload(&host, "Pkg").expect("Second reload failed");

    assert_eq!(loaded_names(&host), before);
}

#[test]
fn test_missing_package_is_a_no_op() {
    let host = boot(host_with(&[("Pkg.main", vec![])]));

    let report = reload(&host, "NotLoaded").expect("Missing package must not fail");

    assert_eq!(report.status, ReloadStatus::NotLoaded);
    assert!(host.calls().is_empty());
}

#[test]
fn test_failure_leaves_every_unit_registered() {
    let host = boot(host_with(&[
        (
            "Pkg.a",
            vec![
                Statement::import("Pkg.b"),
                Statement::import("Pkg.c"),
                Statement::import("Pkg.d"),
            ],
        ),
        ("Pkg.b", vec![]),
        ("Pkg.c", vec![]),
        ("Pkg.d", vec![]),
    ]));
    let before = loaded_names(&host);
    assert_eq!(before.len(), 5);
    let failing = host.registry().get("Pkg.b").expect("Pkg.b not loaded");
    host.fail_reexecute("Pkg.b");

    let err = reload(&host, "Pkg").expect_err("Reload should fail");

    assert!(matches!(err, Error::ReloadFailure { ref unit, .. } if unit == "Pkg.b"));
    assert_eq!(host.reexecuted()[2], "Pkg.b");
    assert_eq!(loaded_names(&host), before);
    let restored = host.registry().get("Pkg.b").expect("Pkg.b not restored");
    assert!(Arc::ptr_eq(&failing, &restored));
    assert!(!host.loader_slot().is_installed());
}

#[test]
fn test_reload_after_fixing_failure() {
    let host = boot(host_with(&[("Pkg.a", vec![Statement::define("x", "1")])]));

    host.set_source("Pkg.a", vec![Statement::fail("syntax error")]);
    assert!(reload(&host, "Pkg").is_err());

    host.set_source("Pkg.a", vec![Statement::define("x", "2")]);
    let report = reload(&host, "Pkg").expect("Reload after fix failed");

    assert!(report.is_reloaded());
    let unit = host.registry().get("Pkg.a").expect("Pkg.a missing");
    assert_eq!(unit.get("x"), Some(Attr::Value("2".to_string())));
    assert!(host.active_plugins().contains("Pkg.a"));
}

#[test]
fn test_identity_survives_edit() {
    let host = boot(host_with(&[
        ("Pkg.main", vec![Statement::from("Pkg.lib.util", &["x"])]),
        ("Pkg.lib.util", vec![Statement::define("x", "old")]),
    ]));
    let util = host.registry().get("Pkg.lib.util").expect("util not loaded");
    let generation = util.generation();

    host.set_source("Pkg.lib.util", vec![Statement::define("x", "new")]);
    reload(&host, "Pkg").expect("Reload failed");

    let after = host.registry().get("Pkg.lib.util").expect("util missing");
    assert!(Arc::ptr_eq(&util, &after));
    assert!(util.generation() > generation);
    let main = host.registry().get("Pkg.main").expect("main missing");
    assert_eq!(main.get("x"), Some(Attr::Value("new".to_string())));
}

#[test]
fn test_from_list_submodule_is_reloaded() {
    let host = boot(host_with(&[
        ("Pkg.a", vec![Statement::from("Pkg.b", &["c"])]),
        ("Pkg.b.c", vec![Statement::define("f", "1")]),
    ]));

    reload(&host, "Pkg").expect("Reload failed");
    assert!(host.reexecuted().contains(&"Pkg.b.c".to_string()));
}

#[test]
fn test_deactivation_failure_is_ignored() {
    let host = boot(host_with(&[("Pkg.main", vec![])]));
    host.fail_deactivation("Pkg.main");

    let report = reload(&host, "Pkg").expect("Deactivation failure must not abort");

    assert_eq!(report.deactivation_failures, vec!["Pkg.main".to_string()]);
    assert!(host.calls().contains(&HostCall::Activate("Pkg.main".to_string())));
}

#[test]
fn test_activation_failure_aborts_and_keeps_units_registered() {
    let host = boot(host_with(&[
        ("Pkg.main", vec![Statement::import("Pkg.lib.util")]),
        ("Pkg.lib.util", vec![]),
    ]));
    let before: Vec<_> = loaded_names(&host)
        .into_iter()
        .map(|name| host.registry().get(&name).expect("unit not loaded"))
        .collect();
    host.fail_activation("Pkg.main");

    let err = reload(&host, "Pkg").expect_err("Activation failure should abort");

    assert!(matches!(err, Error::ReloadFailure { ref unit, .. } if unit == "Pkg.main"));
    for unit in &before {
        let current = host.registry().get(unit.name()).expect("unit dropped");
        assert!(Arc::ptr_eq(unit, &current), "{} replaced", unit.name());
    }
    assert!(!host.active_plugins().contains("Pkg.main"));
    assert!(!host.loader_slot().is_installed());
}

#[test]
fn test_unreached_library_unit_is_swept() {
    let host = boot(host_with(&[("Pkg.main", vec![]), ("Pkg.lib.unused", vec![])]));
    host.import("Pkg.lib.unused", &[]).expect("Failed to import");
    host.take_calls();

    let report = reload(&host, "Pkg").expect("Reload failed");
    assert_eq!(report.reloaded.last().map(String::as_str), Some("Pkg.lib.unused"));
}

#[test]
fn test_unit_without_source_fails_and_is_restored() {
    let host = boot(host_with(&[("Pkg.main", vec![]), ("Pkg.lib.gone", vec![])]));
    host.import("Pkg.lib.gone", &[]).expect("Failed to import");
    host.remove_source("Pkg.lib.gone");

    let err = reload(&host, "Pkg").expect_err("Missing source should fail");
    assert!(matches!(err, Error::ReloadFailure { ref unit, .. } if unit == "Pkg.lib.gone"));
    assert!(host.registry().contains("Pkg.lib.gone"));
}

#[test]
fn test_unloaded_extra_module_is_noted() {
    let host = boot(host_with(&[("Pkg.main", vec![])]));
    let request = ReloadRequest::new("Pkg").with_extra_modules(["Pkg.ghost".to_string()]);

    let report = ReloadOrchestrator::new(Arc::clone(&host), settings())
        .reload(&request)
        .expect("Reload failed");

    assert_eq!(report.not_reloaded, vec!["Pkg.ghost".to_string()]);
}

// =============================================================================
// Verbose Trace
// =============================================================================

/// Keeps the trace lines and terminal statuses of a transaction.
#[derive(Default)]
struct TraceLog {
    lines: Mutex<Vec<String>>,
    statuses: Mutex<Vec<String>>,
}

impl StatusSink for TraceLog {
    fn on_reloaded(&self, package: &str) {
        self.statuses.lock().unwrap().push(format!("reloaded {package}"));
    }

    fn on_failed(&self, package: &str, _error: &Error) {
        self.statuses.lock().unwrap().push(format!("failed {package}"));
    }

    fn on_not_loaded(&self, package: &str) {
        self.statuses.lock().unwrap().push(format!("not loaded {package}"));
    }

    fn on_unit_reloading(&self, depth: usize, unit: &str) {
        self.lines.lock().unwrap().push(trace_line(depth, unit));
    }
}

fn traced_reload(verbose: bool) -> (Arc<TraceLog>, ReloadReport) {
    let host = boot(host_with(&[
        (
            "Pkg.main",
            vec![Statement::import("Pkg.lib.b"), Statement::import("Pkg.lib.a")],
        ),
        ("Pkg.lib.a", vec![]),
        ("Pkg.lib.b", vec![Statement::import("Pkg.lib.a")]),
    ]));
    let log = Arc::new(TraceLog::default());
    let report = ReloadOrchestrator::new(Arc::clone(&host), settings())
        .with_status(Arc::clone(&log) as Arc<dyn StatusSink>)
        .reload(&ReloadRequest::new("Pkg").with_verbose(verbose))
        .expect("Reload failed");
    (log, report)
}

#[test]
fn test_verbose_reload_traces_each_unit_at_its_depth() {
    let (log, report) = traced_reload(true);

    let lines = log.lines.lock().unwrap().clone();
    assert_eq!(
        lines,
        vec![
            "|-- Pkg",
            "|-- Pkg.main",
            "| |-- Pkg.lib",
            "| |-- Pkg.lib.b",
            "| | |-- Pkg.lib.a",
        ]
    );
    assert_eq!(lines.len(), report.reloaded.len());
    assert_eq!(*log.statuses.lock().unwrap(), vec!["reloaded Pkg".to_string()]);
}

#[test]
fn test_quiet_reload_emits_no_trace() {
    let (log, report) = traced_reload(false);

    assert!(log.lines.lock().unwrap().is_empty());
    assert_eq!(report.reloaded.len(), 5);
    assert_eq!(*log.statuses.lock().unwrap(), vec!["reloaded Pkg".to_string()]);
}

// =============================================================================
// Supervisor
// =============================================================================

#[test]
fn test_request_while_busy_is_rejected() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let layout = PackageLayout::new(temp.path(), "unit");
    layout.create_dirs().expect("Failed to create dirs");
    let host = SimHost::new(layout);
    host.set_source("Foo.main", vec![]);
    host.set_source("Bar.main", vec![]);
    let host = boot(host);
    host.stall_pipeline();

    let barrier = BarrierConfig {
        timeout_ms: 300,
        poll_interval_ms: 10,
        ..BarrierConfig::default()
    };
    let reloader = Reloader::new(Arc::clone(&host), settings().with_barrier(barrier));

    let running = reloader
        .request_reload("Foo", &[], Some(false))
        .expect("First request rejected");
    let err = reloader
        .request_reload("Bar", &[], Some(false))
        .err()
        .expect("Second request accepted");
    assert!(matches!(err, Error::Busy));

    let reports = running.wait().expect("First reload failed");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].barrier, BarrierOutcome::TimedOut);
    assert!(!reloader.transaction_lock().is_held());

    let touched_bar = host.calls().iter().any(|call| match call {
        HostCall::Deactivate(name) | HostCall::Activate(name) | HostCall::FirstLoad(name)
        | HostCall::Reexecute(name) => name.starts_with("Bar"),
    });
    assert!(!touched_bar);
    assert!(host.registry().contains("Bar.main"));
}

#[test]
fn test_barrier_syncs_with_plugin_pipeline() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let layout = PackageLayout::new(temp.path(), "unit");
    layout.create_dirs().expect("Failed to create dirs");
    let host = SimHost::new(layout.clone());
    host.set_source("Foo.main", vec![]);
    let host = boot(host);

    let barrier = BarrierConfig {
        timeout_ms: 2_000,
        poll_interval_ms: 5,
        ..BarrierConfig::default()
    };
    let reloader = Reloader::new(Arc::clone(&host), settings().with_barrier(barrier));
    let reports = reloader
        .reload_blocking("Foo", &[], None)
        .expect("Reload failed");

    assert_eq!(reports[0].barrier, BarrierOutcome::Synced);
    let leftovers = fs::read_dir(&layout.packages_dir)
        .expect("Failed to list packages")
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_siblings_chain_once_each() {
    let host = host_with(&[("Foo.main", vec![]), ("Bar.main", vec![]), ("Baz.main", vec![])]);
    write_package_config(
        &host,
        "Foo",
        &PackageConfig {
            siblings: vec!["Bar".to_string(), "Baz".to_string()],
            ..PackageConfig::default()
        },
    );
    write_package_config(
        &host,
        "Bar",
        &PackageConfig {
            siblings: vec!["Foo".to_string()],
            ..PackageConfig::default()
        },
    );
    let host = boot(host);
    let reloader = Reloader::new(Arc::clone(&host), settings());

    let reports = reloader
        .reload_blocking("Foo", &[], Some(false))
        .expect("Reload failed");

    let packages: Vec<&str> = reports.iter().map(|r| r.package.as_str()).collect();
    assert_eq!(packages, vec!["Foo", "Bar", "Baz"]);
}

#[test]
fn test_config_dependencies_join_working_set() {
    let host = host_with(&[("Foo.main", vec![]), ("Lib.core", vec![])]);
    write_package_config(
        &host,
        "Foo",
        &PackageConfig {
            dependencies: vec!["Lib".to_string()],
            ..PackageConfig::default()
        },
    );
    let host = boot(host);
    let reloader = Reloader::new(Arc::clone(&host), settings());

    let reports = reloader
        .reload_blocking("Foo", &[], Some(false))
        .expect("Reload failed");

    assert!(reports[0].packages.contains("Lib"));
    assert!(host.reexecuted().contains(&"Lib.core".to_string()));
}

#[test]
fn test_manifest_host_round_trip() {
    let manifest = HostManifest::from_json(
        r#"{
            "packages": {
                "Lib": { "units": { "Lib.core": [{"define": "version", "value": "1"}] } },
                "App": {
                    "dependencies": ["Lib"],
                    "units": { "App.main": [{"from": "Lib.core", "names": ["version"]}] }
                }
            }
        }"#,
    )
    .expect("Failed to parse manifest");
    let host = boot(SimHost::from_manifest(
        &manifest,
        PackageLayout::new(Path::new("/host"), "unit"),
    ));

    let report = reload(&host, "Lib").expect("Reload failed");
    assert!(report.packages.contains("App"));
    assert!(host.reexecuted().contains(&"App.main".to_string()));
}
