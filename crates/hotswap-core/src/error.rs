//! Error types for hotswap-core.

use thiserror::Error;

/// Result type for hotswap-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hotswap-core.
#[derive(Debug, Error)]
pub enum Error {
    /// No unit with this qualified name can be found or loaded.
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// A from-list name does not resolve against the unit's namespace.
    #[error("cannot import name '{name}' from '{unit}'")]
    ImportName { unit: String, name: String },

    /// The host failed while executing a unit body.
    #[error("execution of {unit} failed: {message}")]
    Execution { unit: String, message: String },

    /// A reload transaction aborted while re-executing a unit.
    #[error("failed to reload {package} (at {unit}): {source}")]
    ReloadFailure {
        package: String,
        unit: String,
        #[source]
        source: Box<Error>,
    },

    /// The host refused to deactivate a plugin unit.
    #[error("failed to deactivate plugin {unit}: {message}")]
    Deactivation { unit: String, message: String },

    /// The host refused to activate a plugin unit.
    #[error("failed to activate plugin {unit}: {message}")]
    Activation { unit: String, message: String },

    /// Another reload transaction is already in flight.
    #[error("a reload is already in progress")]
    Busy,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File watcher error.
    #[error("watch error: {0}")]
    Watch(String),

    /// The worker thread running a reload panicked.
    #[error("reload worker panicked: {0}")]
    WorkerPanicked(String),

    /// Invalid operation (e.g., reloading an empty package name).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Name of the unit the error is about, if any.
    pub fn unit(&self) -> Option<&str> {
        match self {
            Error::UnitNotFound(unit) => Some(unit),
            Error::ImportName { unit, .. }
            | Error::Execution { unit, .. }
            | Error::ReloadFailure { unit, .. }
            | Error::Deactivation { unit, .. }
            | Error::Activation { unit, .. } => Some(unit),
            _ => None,
        }
    }

    /// Render the error together with a recovery hint for terminal output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::ReloadFailure { .. } => Some(
                "units that were not reached keep their previous definitions; fix the error and reload again",
            ),
            Error::Busy => Some("wait for the running reload to finish and retry"),
            Error::UnitNotFound(_) => Some("check that the package is installed and loaded"),
            Error::Json(_) => Some("check the manifest or settings file for syntax errors"),
            Error::Watch(_) => Some("check that the watched path exists and is readable"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_failure_names_unit() {
        let err = Error::ReloadFailure {
            package: "Foo".to_string(),
            unit: "Foo.bar".to_string(),
            source: Box::new(Error::Execution {
                unit: "Foo.bar".to_string(),
                message: "boom".to_string(),
            }),
        };
        assert_eq!(err.unit(), Some("Foo.bar"));
        assert!(err.to_string().contains("Foo"));
        assert!(err.with_hint().contains("hint:"));
    }

    #[test]
    fn test_busy_has_no_unit() {
        assert_eq!(Error::Busy.unit(), None);
    }
}
