//! Code units: the host-managed module objects held in the registry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;

/// Shared handle to a code unit.
///
/// Identity is the `Arc` pointer: a reload mutates the unit in place, so every
/// holder of a `UnitRef` observes the new definitions.
pub type UnitRef = Arc<CodeUnit>;

/// Value bound to a name in a unit's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    /// Reference to another unit, by qualified name.
    Unit(String),
    /// Any other definition (function, class, constant...), rendered as text.
    Value(String),
}

impl Attr {
    /// Qualified name of the referenced unit, if this attribute is a unit.
    pub fn as_unit(&self) -> Option<&str> {
        match self {
            Attr::Unit(name) => Some(name),
            Attr::Value(_) => None,
        }
    }
}

/// Mutable namespace of a unit.
#[derive(Debug, Default)]
struct Namespace {
    attrs: FxHashMap<String, Attr>,
    /// Explicit public-name declaration used to expand wildcard imports.
    public_names: Option<Vec<String>>,
}

/// An executable module object managed by the host.
///
/// A unit carries no separate ownership tag: the package it was loaded from
/// is the first segment of its name, see [`CodeUnit::package_name`].
#[derive(Debug)]
pub struct CodeUnit {
    /// Dot-separated qualified name, unique in the registry.
    name: String,
    /// File the unit was loaded from.
    file: Option<PathBuf>,
    /// Directories searched for submodules (only set for package units).
    search_paths: Vec<PathBuf>,
    namespace: RwLock<Namespace>,
    /// Number of times the unit body has been executed.
    generation: AtomicU64,
}

impl CodeUnit {
    /// Create a plain (non-package) unit.
    pub fn new(name: impl Into<String>, file: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            file,
            search_paths: Vec::new(),
            namespace: RwLock::new(Namespace::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a package unit that can contain submodules.
    pub fn package(name: impl Into<String>, file: Option<PathBuf>, dir: PathBuf) -> Self {
        Self {
            search_paths: vec![dir],
            ..Self::new(name, file)
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> UnitRef {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// The file first, then the search paths.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.file
            .as_deref()
            .into_iter()
            .chain(self.search_paths.iter().map(PathBuf::as_path))
    }

    pub fn is_package(&self) -> bool {
        !self.search_paths.is_empty()
    }

    /// Top-level package this unit belongs to (first name segment).
    pub fn package_name(&self) -> &str {
        top_level(&self.name)
    }

    /// Qualified name of the containing unit, if any.
    pub fn parent_name(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Last segment of the qualified name.
    pub fn leaf_name(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map_or(self.name.as_str(), |(_, leaf)| leaf)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Record one more execution of the unit body.
    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self, attr: &str) -> Option<Attr> {
        self.read(|ns| ns.attrs.get(attr).cloned())
    }

    pub fn has(&self, attr: &str) -> bool {
        self.read(|ns| ns.attrs.contains_key(attr))
    }

    pub fn set(&self, attr: impl Into<String>, value: Attr) {
        self.write(|ns| {
            ns.attrs.insert(attr.into(), value);
        });
    }

    pub fn public_names(&self) -> Option<Vec<String>> {
        self.read(|ns| ns.public_names.clone())
    }

    pub fn set_public_names(&self, names: Vec<String>) {
        self.write(|ns| ns.public_names = Some(names));
    }

    /// Expand a from-list against this unit: `*` becomes the public-name
    /// declaration (nothing when absent), other names pass through.
    pub fn expand_from_list(&self, from_list: &[String]) -> Vec<String> {
        from_list
            .iter()
            .flat_map(|item| {
                if item == "*" {
                    self.public_names().unwrap_or_default()
                } else {
                    vec![item.clone()]
                }
            })
            .collect()
    }

    fn read<T>(&self, f: impl FnOnce(&Namespace) -> T) -> T {
        let ns = self.namespace.read().unwrap_or_else(PoisonError::into_inner);
        f(&ns)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Namespace) -> T) -> T {
        let mut ns = self.namespace.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut ns)
    }
}

/// First segment of a qualified name.
pub fn top_level(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Sort key comparing qualified names segment by segment, so that
/// `a.b` sorts before `a.b.c` and `a.b.c` before `a.bc`.
pub fn segment_key(name: &str) -> Vec<&str> {
    name.split('.').collect()
}
