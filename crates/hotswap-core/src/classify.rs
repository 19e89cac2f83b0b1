//! Working-set selection: which loaded units belong to a set of packages, and
//! which of them are top-level plugins the host (de)activates.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::host::HostBridge;
use crate::paths::RESOURCE_PREFIX;
use crate::registry::segment_key;

/// Scans the registry and the host's resources for units of given packages.
pub struct UnitClassifier<'a> {
    host: &'a dyn HostBridge,
    /// Runtime compatibility, memoized per package for one classification.
    runtime_matches: FxHashMap<String, bool>,
}

impl<'a> UnitClassifier<'a> {
    pub fn new(host: &'a dyn HostBridge) -> Self {
        Self {
            host,
            runtime_matches: FxHashMap::default(),
        }
    }

    /// Classify every unit belonging to one of `packages` as
    /// `(qualified name, is_plugin)`.
    ///
    /// Loaded units come first, sorted by name; top-level resources of each
    /// package follow as plugins even when not loaded. The two passes may
    /// name the same unit; see [`WorkingSet::from_classified`].
    pub fn classify(&mut self, packages: &[String]) -> Vec<(String, bool)> {
        let bases: Vec<PathBuf> = packages
            .iter()
            .flat_map(|package| self.host.package_roots(package))
            .collect();

        let mut units = self.host.list_loaded_units();
        units.sort_by(|a, b| a.name().cmp(b.name()));

        let mut found = Vec::new();
        for unit in &units {
            let matched = unit.paths().find_map(|path| {
                bases
                    .iter()
                    .find(|base| is_under(path, base))
                    .map(|base| (path, base))
            });
            let Some((path, base)) = matched else {
                continue;
            };

            let is_top_level = path.parent() == Some(base.as_path());
            let is_plugin = is_top_level && self.runtime_matches(unit.package_name());
            found.push((unit.name().to_string(), is_plugin));
        }

        let pattern = format!("*.{}", self.host.layout().unit_extension);
        for resource in self.host.find_resources(&pattern) {
            for package in packages {
                if !self.runtime_matches(package) {
                    continue;
                }
                if let Some(stem) = self.top_level_stem(&resource, package) {
                    found.push((format!("{package}.{stem}"), true));
                }
            }
        }

        found
    }

    fn runtime_matches(&mut self, package: &str) -> bool {
        if let Some(&matched) = self.runtime_matches.get(package) {
            return matched;
        }
        let version = self.host.package_runtime_version(package);
        let matched = self.host.supports_runtime(&version);
        if !matched {
            tracing::debug!("{} requires runtime {}, not a plugin here", package, version);
        }
        self.runtime_matches.insert(package.to_string(), matched);
        matched
    }

    /// Stem of `resource` when it is a top-level unit file of `package`
    /// (other than the package's own unit).
    fn top_level_stem<'r>(&self, resource: &'r str, package: &str) -> Option<&'r str> {
        let (dir, file) = resource.rsplit_once('/')?;
        if dir != format!("{RESOURCE_PREFIX}/{package}") {
            return None;
        }
        let (stem, _ext) = file.rsplit_once('.')?;
        (stem != self.host.package_marker()).then_some(stem)
    }
}

/// `path` is `base` itself or lies inside it. Paths are compared component by
/// component, so `Foo` never matches `FooBar`.
fn is_under(path: &Path, base: &Path) -> bool {
    path.starts_with(base)
}

/// Units selected for one reload transaction.
///
/// Ordered by qualified-name segments. This is the sweep order, not the
/// reload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    entries: Vec<(String, bool)>,
}

impl WorkingSet {
    /// Deduplicate classifier output by name (a unit is a plugin if either
    /// pass said so) and sort it.
    pub fn from_classified(classified: impl IntoIterator<Item = (String, bool)>) -> Self {
        let mut merged: FxHashMap<String, bool> = FxHashMap::default();
        for (name, is_plugin) in classified {
            *merged.entry(name).or_insert(false) |= is_plugin;
        }

        let mut entries: Vec<(String, bool)> = merged.into_iter().collect();
        entries.sort_by(|a, b| segment_key(&a.0).cmp(&segment_key(&b.0)));
        Self { entries }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn plugins(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, is_plugin)| *is_plugin)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
