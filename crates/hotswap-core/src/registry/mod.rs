//! Process-wide registry of loaded code units.
//!
//! Presence in the registry is the only signal that a unit is loaded. The
//! registry is abstracted behind [`ModuleRegistry`] so hosts can expose their
//! own store and tests can use [`MemoryRegistry`].

mod unit;

use std::sync::{PoisonError, RwLock};

use rustc_hash::FxHashMap;

pub use unit::{Attr, CodeUnit, UnitRef, segment_key, top_level};

/// Read/write access to the name → unit mapping.
pub trait ModuleRegistry: Send + Sync {
    /// Look up a unit by qualified name.
    fn get(&self, name: &str) -> Option<UnitRef>;

    /// Insert a unit under its own name, returning the unit it replaced.
    fn insert(&self, unit: UnitRef) -> Option<UnitRef>;

    /// Remove a unit by qualified name.
    fn remove(&self, name: &str) -> Option<UnitRef>;

    /// All currently loaded units, in no particular order.
    fn snapshot(&self) -> Vec<UnitRef>;

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sorted qualified names of every loaded unit.
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshot()
            .iter()
            .map(|unit| unit.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Whether any unit of `package` (the package unit or a submodule) is loaded.
    fn has_package(&self, package: &str) -> bool {
        let prefix = format!("{package}.");
        self.contains(package)
            || self
                .snapshot()
                .iter()
                .any(|unit| unit.name().starts_with(&prefix))
    }
}

/// In-memory registry backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    units: RwLock<FxHashMap<String, UnitRef>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModuleRegistry for MemoryRegistry {
    fn get(&self, name: &str) -> Option<UnitRef> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn insert(&self, unit: UnitRef) -> Option<UnitRef> {
        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(unit.name().to_string(), unit)
    }

    fn remove(&self, name: &str) -> Option<UnitRef> {
        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    fn snapshot(&self) -> Vec<UnitRef> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
