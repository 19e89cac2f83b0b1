//! One-shot reloading loader installed for the duration of a transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::host::{HostBridge, Loader, LoaderGuard};
use crate::registry::{UnitRef, segment_key};

use super::status::StatusSink;
use super::tracer::DepthMeter;

/// Reloads each working-set unit at most once, following the order in which
/// the units' own imports reach them.
///
/// While installed in the host's loader slot, every acquisition made by a
/// re-executing unit passes through [`Loader::acquire`], which reloads the
/// acquired unit (and any working-set submodules named in the from-list)
/// before handing it back.
pub struct ReloadingImporter<H: HostBridge> {
    host: Arc<H>,
    /// Pre-transaction objects of the working set.
    units: BTreeMap<String, UnitRef>,
    /// Working-set units not reloaded yet.
    to_reload: Mutex<BTreeSet<String>>,
    /// Units reloaded so far, in order.
    reloaded: Mutex<Vec<String>>,
    meter: DepthMeter,
    /// Loader that was installed before this one.
    previous: Option<Arc<dyn Loader>>,
    /// Receives one trace call per reload when set.
    trace: Option<Arc<dyn StatusSink>>,
}

impl<H: HostBridge> ReloadingImporter<H> {
    /// Create an importer over `units`. Nothing is intercepted until
    /// [`ReloadingImporter::install`]. With `trace` set, every reload is
    /// reported to it along with its nesting depth.
    pub fn new(
        host: Arc<H>,
        units: impl IntoIterator<Item = UnitRef>,
        trace: Option<Arc<dyn StatusSink>>,
    ) -> Arc<Self> {
        let units: BTreeMap<String, UnitRef> = units
            .into_iter()
            .map(|unit| (unit.name().to_string(), unit))
            .collect();
        let to_reload = units.keys().cloned().collect();
        let previous = host.loader_slot().current();

        Arc::new(Self {
            host,
            units,
            to_reload: Mutex::new(to_reload),
            reloaded: Mutex::new(Vec::new()),
            meter: DepthMeter::new(),
            previous,
            trace,
        })
    }

    /// Intercept the host's acquisitions until the guard drops.
    pub fn install(self: &Arc<Self>) -> LoaderGuard<'_> {
        let loader: Arc<dyn Loader> = Arc::clone(self) as Arc<dyn Loader>;
        self.host.loader_slot().install(loader)
    }

    /// Re-execute `unit` in place if it is still waiting for its reload;
    /// otherwise hand it back untouched.
    ///
    /// On failure the unit is left out of the registry and the error is
    /// returned; every unit never reached stays in [`Self::remaining`].
    pub fn reload(&self, unit: &UnitRef) -> Result<UnitRef> {
        let name = unit.name();
        let pending = self
            .to_reload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if !pending {
            return Ok(Arc::clone(unit));
        }

        let registry = self.host.registry();
        if !registry.contains(name) {
            registry.insert(Arc::clone(unit));
        }

        let level = self.meter.enter();
        if let Some(trace) = &self.trace {
            trace.on_unit_reloading(level.depth(), name);
        }

        match self.host.reexecute(unit) {
            Ok(unit) => {
                self.reloaded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(name.to_string());
                Ok(unit)
            }
            Err(e) => {
                tracing::error!("reloading {} failed: {}", name, e);
                registry.remove(name);
                Err(e)
            }
        }
    }

    /// Whether `name` is in the working set and not reloaded yet.
    pub fn is_pending(&self, name: &str) -> bool {
        self.to_reload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Working-set units never reached, in qualified-name segment order.
    pub fn remaining(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .to_reload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        names.sort_by(|a, b| segment_key(a).cmp(&segment_key(b)));
        names
    }

    /// Units reloaded so far, in reload order.
    pub fn reloaded(&self) -> Vec<String> {
        self.reloaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pre-transaction object of a working-set unit.
    pub fn original(&self, name: &str) -> Option<&UnitRef> {
        self.units.get(name)
    }

    /// Current nesting depth of reloads.
    pub fn depth(&self) -> usize {
        self.meter.depth()
    }

    fn acquire_underlying(&self, name: &str, from_list: &[String]) -> Result<UnitRef> {
        match &self.previous {
            Some(loader) => loader.acquire(name, from_list),
            None => self.host.acquire_unit(name, from_list),
        }
    }

    /// Reload an evicted working-set unit under its original identity, after
    /// its parents, before the host resolves anything against it.
    fn restore_pending(&self, name: &str) -> Result<()> {
        let Some(unit) = self.units.get(name) else {
            return Ok(());
        };
        if !self.is_pending(name) {
            return Ok(());
        }

        let segments: Vec<&str> = name.split('.').collect();
        for depth in 1..segments.len() {
            self.host.import(&segments[..depth].join("."), &[])?;
        }
        self.reload(unit)?;
        Ok(())
    }

    /// Reload working-set submodules a from-list names.
    ///
    /// Reloading mutates namespaces in place, so a from-list name that is a
    /// submodule is always already bound and the host never re-imports it.
    fn reload_from_list(&self, unit: &UnitRef, from_list: &[String]) -> Result<()> {
        for attr in unit.expand_from_list(from_list) {
            let submodule = format!("{}.{}", unit.name(), attr);
            let bound = unit.get(&attr).and_then(|a| a.as_unit().map(str::to_string));

            for target in [Some(submodule), bound].into_iter().flatten() {
                if let Some(target_unit) = self.units.get(&target) {
                    self.reload(target_unit)?;
                }
            }
        }
        Ok(())
    }
}

impl<H: HostBridge> Loader for ReloadingImporter<H> {
    fn acquire(&self, name: &str, from_list: &[String]) -> Result<UnitRef> {
        self.restore_pending(name)?;
        let unit = self.acquire_underlying(name, from_list)?;
        let unit = self.reload(&unit)?;
        if !from_list.is_empty() {
            self.reload_from_list(&unit, from_list)?;
        }
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::error::Error;
    use crate::host::sim::{SimHost, Statement};
    use crate::paths::PackageLayout;
    use crate::registry::Attr;

    /// Records the depth and name of every traced reload.
    #[derive(Default)]
    struct Traced(Mutex<Vec<(usize, String)>>);

    impl StatusSink for Traced {
        fn on_reloaded(&self, _package: &str) {}
        fn on_failed(&self, _package: &str, _error: &Error) {}
        fn on_not_loaded(&self, _package: &str) {}
        fn on_unit_reloading(&self, depth: usize, unit: &str) {
            self.0.lock().unwrap().push((depth, unit.to_string()));
        }
    }

    fn booted(sources: &[(&str, Vec<Statement>)]) -> Arc<SimHost> {
        let host = SimHost::new(PackageLayout::new(Path::new("/host"), "unit"));
        for (name, body) in sources {
            host.set_source(name, body.clone());
        }
        host.boot().unwrap();
        host.take_calls();
        Arc::new(host)
    }

    fn working_set(host: &SimHost, prefix: &str) -> Vec<UnitRef> {
        host.list_loaded_units()
            .into_iter()
            .filter(|u| u.package_name() == prefix)
            .collect()
    }

    fn evict(host: &SimHost, units: &[UnitRef]) {
        for unit in units {
            host.registry().remove(unit.name());
        }
    }

    #[test]
    fn test_reload_at_most_once() {
        let host = booted(&[("pkg.a", vec![Statement::import("pkg.b")]), ("pkg.b", vec![])]);
        let units = working_set(&host, "pkg");
        let importer = ReloadingImporter::new(Arc::clone(&host), units.clone(), None);

        let b = host.registry().get("pkg.b").unwrap();
        importer.reload(&b).unwrap();
        importer.reload(&b).unwrap();

        assert_eq!(host.reexecuted(), vec!["pkg.b".to_string()]);
        assert!(!importer.is_pending("pkg.b"));
    }

    #[test]
    fn test_units_outside_working_set_untouched() {
        let host = booted(&[("pkg.a", vec![]), ("other.a", vec![])]);
        let importer = ReloadingImporter::new(Arc::clone(&host), working_set(&host, "pkg"), None);

        let other = host.registry().get("other.a").unwrap();
        let same = importer.reload(&other).unwrap();
        assert!(Arc::ptr_eq(&other, &same));
        assert!(host.reexecuted().is_empty());
    }

    #[test]
    fn test_imports_reload_depth_first_with_identity() {
        let host = booted(&[
            ("pkg.a", vec![Statement::import("pkg.b"), Statement::import("pkg.c")]),
            ("pkg.b", vec![Statement::import("pkg.d")]),
            ("pkg.c", vec![]),
            ("pkg.d", vec![Statement::define("x", "old")]),
        ]);
        let units = working_set(&host, "pkg");
        let d_before = host.registry().get("pkg.d").unwrap();
        evict(&host, &units);
        host.set_source("pkg.d", vec![Statement::define("x", "new")]);

        let traced = Arc::new(Traced::default());
        let importer = ReloadingImporter::new(
            Arc::clone(&host),
            units,
            Some(Arc::clone(&traced) as Arc<dyn StatusSink>),
        );
        {
            let _guard = importer.install();
            let a = importer.original("pkg.a").unwrap().clone();
            importer.reload(&a).unwrap();
        }
        assert!(!host.loader_slot().is_installed());

        assert_eq!(
            importer.reloaded(),
            vec!["pkg.a", "pkg", "pkg.b", "pkg.d", "pkg.c"]
        );
        assert_eq!(
            *traced.0.lock().unwrap(),
            vec![
                (0, "pkg.a".to_string()),
                (1, "pkg".to_string()),
                (1, "pkg.b".to_string()),
                (2, "pkg.d".to_string()),
                (1, "pkg.c".to_string()),
            ]
        );
        let d_after = host.registry().get("pkg.d").unwrap();
        assert!(Arc::ptr_eq(&d_before, &d_after));
        assert_eq!(d_before.get("x"), Some(Attr::Value("new".into())));
        assert_eq!(importer.depth(), 0);
    }

    #[test]
    fn test_from_list_submodule_is_reloaded() {
        let host = booted(&[
            ("pkg.a", vec![Statement::from("pkg.b", &["c"])]),
            ("pkg.b.c", vec![Statement::define("f", "1")]),
        ]);
        let units = working_set(&host, "pkg");
        evict(&host, &units);

        let importer = ReloadingImporter::new(Arc::clone(&host), units, None);
        {
            let _guard = importer.install();
            let a = importer.original("pkg.a").unwrap().clone();
            importer.reload(&a).unwrap();
        }

        assert!(host.reexecuted().contains(&"pkg.b.c".to_string()));
        assert!(importer.remaining().is_empty());
    }

    #[test]
    fn test_wildcard_from_list_uses_public_names() {
        let host = booted(&[
            ("pkg.a", vec![Statement::from("pkg.b", &["*"])]),
            ("pkg.b", vec![Statement::export(&["c"]), Statement::import("pkg.b.c")]),
            ("pkg.b.c", vec![]),
        ]);
        let units = working_set(&host, "pkg");
        evict(&host, &units);

        let importer = ReloadingImporter::new(Arc::clone(&host), units, None);
        {
            let _guard = importer.install();
            let a = importer.original("pkg.a").unwrap().clone();
            importer.reload(&a).unwrap();
        }
        assert!(importer.reloaded().contains(&"pkg.b.c".to_string()));
    }

    #[test]
    fn test_failure_erases_unit_and_keeps_remainder() {
        let host = booted(&[
            ("pkg.a", vec![Statement::import("pkg.b"), Statement::import("pkg.c")]),
            ("pkg.b", vec![]),
            ("pkg.c", vec![]),
        ]);
        let units = working_set(&host, "pkg");
        evict(&host, &units);
        host.fail_reexecute("pkg.b");

        let importer = ReloadingImporter::new(Arc::clone(&host), units, None);
        let result = {
            let _guard = importer.install();
            let a = importer.original("pkg.a").unwrap().clone();
            importer.reload(&a)
        };

        assert!(result.is_err());
        assert!(!host.registry().contains("pkg.b"));
        assert!(!host.registry().contains("pkg.a"));
        assert_eq!(importer.remaining(), vec!["pkg.c".to_string()]);
        assert!(!host.loader_slot().is_installed());
    }
}
