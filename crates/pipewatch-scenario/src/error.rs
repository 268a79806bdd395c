//! Error types for the scenario engine.

use std::path::PathBuf;

use pipewatch_graph::GraphError;
use thiserror::Error;

/// Result type alias for scenario operations.
pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Errors raised while loading or executing a scenario.
///
/// Loading errors abort the load. Execution errors never escape the
/// scenario: they are turned into `scenario::execution-error` reports.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The scenario file could not be read.
    #[error("cannot read scenario {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A line is malformed.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What is wrong
        message: String,
    },

    /// The action type is not known.
    #[error("line {line}: unknown action type '{action}'")]
    UnknownAction {
        /// 1-based line number
        line: usize,
        /// Action type as written
        action: String,
    },

    /// A mandatory field is absent.
    #[error("line {line}: action '{action}' requires field '{field}'")]
    MissingField {
        /// 1-based line number
        line: usize,
        /// Action type
        action: &'static str,
        /// Missing field
        field: &'static str,
    },

    /// A field has the wrong type or an out-of-range value.
    #[error("line {line}: field '{field}' of '{action}': {reason}")]
    InvalidField {
        /// 1-based line number
        line: usize,
        /// Action type
        action: &'static str,
        /// Offending field
        field: &'static str,
        /// What is wrong
        reason: String,
    },

    /// No target is attached, or it is gone.
    #[error("scenario has no target pipeline")]
    NoTarget,

    /// An action names an element that does not exist in the target.
    #[error("no element named '{0}' in the target pipeline")]
    ElementNotFound(String),

    /// The pipeline refused an action.
    #[error("{0}")]
    Rejected(String),

    /// Error from the pipeline graph.
    #[error(transparent)]
    Graph(#[from] GraphError),
}
