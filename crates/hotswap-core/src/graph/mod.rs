//! Dependency graph for package closure resolution.
//!
//! This module provides:
//! - The declared `requires` relation between packages
//! - Reverse reachability (dependents) and forward reachability (requirements)
//! - Graceful degradation when the host has no dependency manager

mod resolver;

pub use resolver::{DependencyGraph, DependencyResolver};
