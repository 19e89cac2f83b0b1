//! Nesting-depth tracking for reload trace output.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts how deeply reloads are nested inside one another.
///
/// Nested reloads happen synchronously on the transaction's worker, so this is
/// a diagnostic counter, not a synchronization primitive.
#[derive(Debug, Default)]
pub struct DepthMeter {
    depth: AtomicUsize,
}

impl DepthMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Enter one level; the level is left when the guard drops.
    pub fn enter(&self) -> DepthGuard<'_> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst);
        DepthGuard { meter: self, depth }
    }
}

/// One level of nesting in a [`DepthMeter`].
pub struct DepthGuard<'a> {
    meter: &'a DepthMeter,
    depth: usize,
}

impl DepthGuard<'_> {
    /// Depth of this level (0 for the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.meter.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Trace line for a unit reloaded at `depth`: `| | |-- name`.
pub fn trace_line(depth: usize, name: &str) -> String {
    format!("{}|-- {}", "| ".repeat(depth), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting() {
        let meter = DepthMeter::new();
        {
            let outer = meter.enter();
            assert_eq!(outer.depth(), 0);
            {
                let inner = meter.enter();
                assert_eq!(inner.depth(), 1);
                assert_eq!(meter.depth(), 2);
            }
            assert_eq!(meter.depth(), 1);
        }
        assert_eq!(meter.depth(), 0);
    }

    #[test]
    fn test_trace_line() {
        assert_eq!(trace_line(0, "a"), "|-- a");
        assert_eq!(trace_line(2, "a.b"), "| | |-- a.b");
    }
}
