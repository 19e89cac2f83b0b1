//! In-memory host used by the test suite and the CLI.
//!
//! `SimHost` keeps a catalog of unit sources (small statement lists standing in
//! for unit bodies) and reproduces the host behaviour the engine depends on:
//!
//! - acquisition loads parent packages first, then the unit itself
//! - a failed first load erases the unit from the registry
//! - from-list names missing from a unit fall back to importing the submodule
//! - re-execution runs the current source in the existing namespace
//! - the plugin pipeline reports `<name>` loaded while
//!   `Packages/<name>.<ext>` exists on disk (unless stalled)
//!
//! Sources can be written out to the packages directory and read back after
//! an edit, so a file watcher can drive reloads.
//!
//! Every bridge call the engine makes is recorded in a call log.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::config::{PACKAGE_CONFIG_FILE, PackageConfig};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::paths::PackageLayout;
use crate::registry::{Attr, CodeUnit, MemoryRegistry, ModuleRegistry, UnitRef, segment_key, top_level};

use super::{DEFAULT_RUNTIME_VERSION, HostBridge, LoaderSlot, RUNTIME_VERSION_FILE};

/// One statement of a simulated unit body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Statement {
    /// `import <module>`; binds the module under its full name.
    Import { import: String },
    /// `from <module> import <names>`.
    From { from: String, names: Vec<String> },
    /// Bind a plain value.
    Define {
        define: String,
        #[serde(default)]
        value: String,
    },
    /// Declare the names a wildcard import pulls in.
    Export { export: Vec<String> },
    /// Raise while executing.
    Fail { fail: String },
}

impl Statement {
    pub fn import(module: &str) -> Self {
        Statement::Import {
            import: module.to_string(),
        }
    }

    pub fn from(module: &str, names: &[&str]) -> Self {
        Statement::From {
            from: module.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn define(name: &str, value: &str) -> Self {
        Statement::Define {
            define: name.to_string(),
            value: value.to_string(),
        }
    }

    pub fn export(names: &[&str]) -> Self {
        Statement::Export {
            export: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn fail(message: &str) -> Self {
        Statement::Fail {
            fail: message.to_string(),
        }
    }
}

/// JSON description of a simulated host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostManifest {
    /// Runtime versions the host supports (defaults to the default version).
    pub runtimes: Vec<String>,
    /// Whether the host exposes declared package dependencies.
    pub dependency_manager: Option<bool>,
    pub packages: BTreeMap<String, PackageManifest>,
}

impl HostManifest {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// One package of a [`HostManifest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageManifest {
    /// Loaded from `Installed Packages/<name>.<archive ext>` instead of `Packages/<name>`.
    pub archived: bool,
    pub runtime_version: Option<String>,
    /// Packages this one requires.
    pub dependencies: Vec<String>,
    /// Contents of the package's `.package_reloader.json`.
    pub reloader: Option<PackageConfig>,
    /// Unit bodies by qualified name.
    pub units: BTreeMap<String, Vec<Statement>>,
}

/// A bridge call recorded by [`SimHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Deactivate(String),
    Activate(String),
    FirstLoad(String),
    Reexecute(String),
}

#[derive(Debug, Clone)]
struct UnitSource {
    body: Vec<Statement>,
    file: PathBuf,
    /// Set for package units.
    dir: Option<PathBuf>,
    resource: String,
}

#[derive(Debug, Default)]
struct SimState {
    sources: BTreeMap<String, UnitSource>,
    archived: FxHashSet<String>,
    resources: BTreeMap<String, String>,
    runtimes: Vec<String>,
    dependencies: Option<DependencyGraph>,
    active_plugins: BTreeSet<String>,
    calls: Vec<HostCall>,
    failing: FxHashSet<String>,
    failing_deactivation: FxHashSet<String>,
    failing_activation: FxHashSet<String>,
    pipeline_stalled: bool,
}

/// Simulated host process.
#[derive(Debug)]
pub struct SimHost {
    layout: PackageLayout,
    registry: MemoryRegistry,
    slot: LoaderSlot,
    state: Mutex<SimState>,
}

impl SimHost {
    /// Create an empty host over `layout`.
    pub fn new(layout: PackageLayout) -> Self {
        Self {
            layout,
            registry: MemoryRegistry::new(),
            slot: LoaderSlot::new(),
            state: Mutex::new(SimState {
                runtimes: vec![DEFAULT_RUNTIME_VERSION.to_string()],
                dependencies: Some(DependencyGraph::new()),
                ..SimState::default()
            }),
        }
    }

    /// Build a host from a manifest. Nothing is loaded until [`SimHost::boot`].
    pub fn from_manifest(manifest: &HostManifest, layout: PackageLayout) -> Self {
        let host = Self::new(layout);
        {
            let mut state = host.state();
            if !manifest.runtimes.is_empty() {
                state.runtimes = manifest.runtimes.clone();
            }
            if manifest.dependency_manager == Some(false) {
                state.dependencies = None;
            }
        }

        for (package, entry) in &manifest.packages {
            host.apply_package(package, entry);
        }
        host
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_package(&self, package: &str, entry: &PackageManifest) {
        if entry.archived {
            self.state().archived.insert(package.to_string());
        }
        self.declare_dependencies(package, &entry.dependencies);
        if let Some(version) = &entry.runtime_version {
            self.set_resource(
                &PackageLayout::resource_path(package, RUNTIME_VERSION_FILE),
                version,
            );
        }
        if let Some(config) = &entry.reloader {
            let text = serde_json::to_string(config).unwrap_or_default();
            self.set_resource(&PackageLayout::resource_path(package, PACKAGE_CONFIG_FILE), &text);
        }
        for (name, body) in &entry.units {
            self.set_source(name, body.clone());
        }
    }

    /// Replace the sources with those of `manifest`, returning the packages
    /// whose units were added, edited or removed.
    ///
    /// Loaded units, activation state and injected failures are kept.
    pub fn apply_manifest(&self, manifest: &HostManifest) -> BTreeSet<String> {
        let staged = SimHost::from_manifest(manifest, self.layout.clone());
        let fresh = std::mem::take(&mut *staged.state());

        let mut state = self.state();
        let mut changed = BTreeSet::new();
        for (name, source) in &state.sources {
            match fresh.sources.get(name) {
                Some(new_source) if new_source.body == source.body => {}
                _ => {
                    changed.insert(top_level(name).to_string());
                }
            }
        }
        for name in fresh.sources.keys() {
            if !state.sources.contains_key(name) {
                changed.insert(top_level(name).to_string());
            }
        }

        state.sources = fresh.sources;
        state.archived = fresh.archived;
        state.resources = fresh.resources;
        state.runtimes = fresh.runtimes;
        state.dependencies = fresh.dependencies;
        changed
    }

    /// Add or edit the source of a unit. Missing parent package units are
    /// created with an empty body.
    pub fn set_source(&self, name: &str, body: Vec<Statement>) {
        let segments: Vec<&str> = name.split('.').collect();
        for depth in 1..segments.len() {
            let parent = segments[..depth].join(".");
            let exists = self.state().sources.contains_key(&parent);
            if !exists {
                self.insert_source(&parent, Vec::new(), true);
            } else {
                self.promote_to_package(&parent);
            }
        }

        let is_package = {
            let prefix = format!("{name}.");
            let state = self.state();
            segments.len() == 1
                || state.sources.keys().any(|other| other.starts_with(&prefix))
        };
        self.insert_source(name, body, is_package);
    }

    pub fn remove_source(&self, name: &str) {
        self.state().sources.remove(name);
    }

    fn promote_to_package(&self, name: &str) {
        let needs_promotion = self
            .state()
            .sources
            .get(name)
            .is_some_and(|src| src.dir.is_none());
        if needs_promotion {
            let body = self.state().sources[name].body.clone();
            self.insert_source(name, body, true);
        }
    }

    fn insert_source(&self, name: &str, body: Vec<Statement>, is_package: bool) {
        let package = top_level(name);
        let archived = self.state().archived.contains(package);
        let roots = self.layout.package_roots(package);
        let root = if archived { &roots[0] } else { &roots[1] };

        let mut relative: Vec<&str> = name.split('.').skip(1).collect();
        let ext = &self.layout.unit_extension;
        let (file, dir, rel_file) = if is_package {
            let dir = relative.iter().fold(root.clone(), |acc, seg| acc.join(seg));
            relative.push(self.package_marker());
            let file_name = format!("{}.{ext}", self.package_marker());
            (dir.join(&file_name), Some(dir), relative.join("/") + "." + ext)
        } else {
            let leaf = relative.pop().unwrap_or(package);
            let parent = relative.iter().fold(root.clone(), |acc, seg| acc.join(seg));
            let rel = relative
                .iter()
                .copied()
                .chain([leaf])
                .collect::<Vec<_>>()
                .join("/");
            (parent.join(format!("{leaf}.{ext}")), None, format!("{rel}.{ext}"))
        };

        let source = UnitSource {
            body,
            file,
            dir,
            resource: PackageLayout::resource_path(package, &rel_file),
        };
        self.state().sources.insert(name.to_string(), source);
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.state().sources.contains_key(name)
    }

    /// Write the source of every unpacked unit to its file under the packages
    /// directory, as a JSON statement list. Returns the number of files written.
    pub fn write_sources(&self) -> Result<usize> {
        let files: Vec<(PathBuf, Vec<Statement>)> = self
            .state()
            .sources
            .values()
            .filter(|src| src.file.starts_with(&self.layout.packages_dir))
            .map(|src| (src.file.clone(), src.body.clone()))
            .collect();

        for (file, body) in &files {
            if let Some(dir) = file.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(file, serde_json::to_string_pretty(body)?)?;
        }
        Ok(files.len())
    }

    /// Take the source of the unit stored at `path` from disk.
    ///
    /// Returns the unit's name when its body changed, and `None` when the file
    /// belongs to no unit or holds the body already known.
    pub fn read_source_file(&self, path: &Path) -> Result<Option<String>> {
        let name = self
            .state()
            .sources
            .iter()
            .find(|(_, src)| src.file == path)
            .map(|(name, _)| name.clone());
        let Some(name) = name else {
            return Ok(None);
        };

        let body: Vec<Statement> = serde_json::from_str(&fs::read_to_string(path)?)?;
        let mut state = self.state();
        match state.sources.get_mut(&name) {
            Some(src) if src.body != body => {
                src.body = body;
                Ok(Some(name))
            }
            _ => Ok(None),
        }
    }

    pub fn set_resource(&self, path: &str, text: &str) {
        self.state()
            .resources
            .insert(path.to_string(), text.to_string());
    }

    /// Declare the direct dependencies of `package` to the dependency manager.
    pub fn declare_dependencies(&self, package: &str, dependencies: &[String]) {
        if let Some(graph) = self.state().dependencies.as_mut() {
            graph.add_package(package);
            for dependency in dependencies {
                graph.add_requirement(package, dependency);
            }
        }
    }

    /// Remove the dependency manager.
    pub fn without_dependency_manager(self) -> Self {
        self.state().dependencies = None;
        self
    }

    /// Make every re-execution of `name` fail.
    pub fn fail_reexecute(&self, name: &str) {
        self.state().failing.insert(name.to_string());
    }

    /// Make deactivation of plugin `name` fail.
    pub fn fail_deactivation(&self, name: &str) {
        self.state().failing_deactivation.insert(name.to_string());
    }

    /// Make activation of plugin `name` fail.
    pub fn fail_activation(&self, name: &str) {
        self.state().failing_activation.insert(name.to_string());
    }

    /// Stop the plugin pipeline from ever picking up new files.
    pub fn stall_pipeline(&self) {
        self.state().pipeline_stalled = true;
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.state().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<HostCall> {
        std::mem::take(&mut self.state().calls)
    }

    /// Names passed to `reexecute`, in call order.
    pub fn reexecuted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Reexecute(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn active_plugins(&self) -> BTreeSet<String> {
        self.state().active_plugins.clone()
    }

    fn record(&self, call: HostCall) {
        self.state().calls.push(call);
    }

    /// Load and activate every top-level unit, the way the host does at
    /// startup. Returns the plugins that were loaded.
    pub fn boot(&self) -> Result<Vec<String>> {
        let mut plugins: Vec<String> = {
            let state = self.state();
            state
                .sources
                .iter()
                .filter(|(name, src)| {
                    let roots = self.layout.package_roots(top_level(name));
                    src.file
                        .parent()
                        .is_some_and(|dir| roots.iter().any(|root| root == dir))
                })
                .map(|(name, _)| name.clone())
                .collect()
        };
        plugins.sort_by(|a, b| segment_key(a).cmp(&segment_key(b)));

        for plugin in &plugins {
            self.first_load(plugin)?;
        }
        Ok(plugins)
    }

    /// Load a unit that is not in the registry yet.
    fn load_one(&self, name: &str) -> Result<UnitRef> {
        if let Some(unit) = self.registry.get(name) {
            return Ok(unit);
        }

        let source = self
            .state()
            .sources
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;

        let unit = match source.dir {
            Some(dir) => CodeUnit::package(name, Some(source.file), dir),
            None => CodeUnit::new(name, Some(source.file)),
        }
        .into_ref();

        self.registry.insert(Arc::clone(&unit));
        if let Err(e) = self.execute(&unit) {
            self.registry.remove(name);
            return Err(e);
        }

        if let Some(parent) = unit.parent_name().and_then(|p| self.registry.get(p)) {
            parent.set(unit.leaf_name(), Attr::Unit(name.to_string()));
        }
        Ok(unit)
    }

    /// Run the unit's current source in its existing namespace.
    fn execute(&self, unit: &UnitRef) -> Result<()> {
        let name = unit.name();
        let (body, failing) = {
            let state = self.state();
            let body = state
                .sources
                .get(name)
                .map(|src| src.body.clone())
                .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;
            (body, state.failing.contains(name))
        };

        unit.bump_generation();
        if failing {
            return Err(Error::Execution {
                unit: name.to_string(),
                message: "injected failure".to_string(),
            });
        }

        for statement in body {
            match statement {
                Statement::Import { import } => {
                    self.import(&import, &[])?;
                    unit.set(import.clone(), Attr::Unit(import));
                }
                Statement::From { from, names } => {
                    let source = self.import(&from, &names)?;
                    for attr in source.expand_from_list(&names) {
                        let value = source.get(&attr).ok_or_else(|| Error::ImportName {
                            unit: from.clone(),
                            name: attr.clone(),
                        })?;
                        unit.set(attr, value);
                    }
                }
                Statement::Define { define, value } => unit.set(define, Attr::Value(value)),
                Statement::Export { export } => unit.set_public_names(export),
                Statement::Fail { fail } => {
                    return Err(Error::Execution {
                        unit: name.to_string(),
                        message: fail,
                    });
                }
            }
        }
        Ok(())
    }
}

impl HostBridge for SimHost {
    fn registry(&self) -> &dyn ModuleRegistry {
        &self.registry
    }

    fn loader_slot(&self) -> &LoaderSlot {
        &self.slot
    }

    fn layout(&self) -> &PackageLayout {
        &self.layout
    }

    fn acquire_unit(&self, name: &str, from_list: &[String]) -> Result<UnitRef> {
        let segments: Vec<&str> = name.split('.').collect();
        for depth in 1..segments.len() {
            self.import(&segments[..depth].join("."), &[])?;
        }

        let unit = self.load_one(name)?;

        for attr in unit.expand_from_list(from_list) {
            if unit.has(&attr) {
                continue;
            }
            let submodule = format!("{name}.{attr}");
            if self.has_source(&submodule) {
                self.import(&submodule, &[])?;
            }
            if !unit.has(&attr) {
                return Err(Error::ImportName {
                    unit: name.to_string(),
                    name: attr,
                });
            }
        }
        Ok(unit)
    }

    fn deactivate_plugin(&self, name: &str) -> Result<()> {
        self.record(HostCall::Deactivate(name.to_string()));
        let mut state = self.state();
        if state.failing_deactivation.contains(name) {
            return Err(Error::Deactivation {
                unit: name.to_string(),
                message: "injected failure".to_string(),
            });
        }
        state.active_plugins.remove(name);
        Ok(())
    }

    fn activate_plugin(&self, unit: &UnitRef) -> Result<()> {
        self.record(HostCall::Activate(unit.name().to_string()));
        let mut state = self.state();
        if state.failing_activation.contains(unit.name()) {
            return Err(Error::Activation {
                unit: unit.name().to_string(),
                message: "injected failure".to_string(),
            });
        }
        state.active_plugins.insert(unit.name().to_string());
        Ok(())
    }

    fn first_load(&self, name: &str) -> Result<UnitRef> {
        self.record(HostCall::FirstLoad(name.to_string()));
        let unit = self.import(name, &[])?;
        self.state().active_plugins.insert(name.to_string());
        Ok(unit)
    }

    fn reexecute(&self, unit: &UnitRef) -> Result<UnitRef> {
        self.record(HostCall::Reexecute(unit.name().to_string()));
        self.execute(unit)?;
        Ok(Arc::clone(unit))
    }

    fn find_resources(&self, pattern: &str) -> Vec<String> {
        let suffix = pattern.trim_start_matches('*');
        let state = self.state();
        let mut found: Vec<String> = state
            .sources
            .values()
            .map(|src| src.resource.clone())
            .chain(state.resources.keys().cloned())
            .filter(|path| path.ends_with(suffix))
            .collect();
        found.sort();
        found.dedup();
        found
    }

    fn load_resource(&self, path: &str) -> Option<String> {
        self.state().resources.get(path).cloned()
    }

    fn supports_runtime(&self, version: &str) -> bool {
        self.state().runtimes.iter().any(|r| r == version)
    }

    fn plugin_loaded(&self, name: &str) -> bool {
        if self.state().pipeline_stalled {
            return false;
        }
        self.layout
            .packages_dir
            .join(format!("{name}.{}", self.layout.unit_extension))
            .exists()
    }

    fn dependency_graph(&self) -> Option<DependencyGraph> {
        self.state().dependencies.clone()
    }
}
