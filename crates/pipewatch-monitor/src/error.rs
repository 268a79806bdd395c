//! Error types for monitor construction.
//!
//! Only constructing a monitor can fail. Everything a monitor observes
//! afterwards is turned into a validation report instead.

use pipewatch_graph::GraphError;
use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that abort a single wrap attempt.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The element is already wrapped by a live monitor.
    #[error("element '{element}' is already monitored")]
    AlreadyMonitored {
        /// Element name
        element: String,
    },

    /// A bin monitor was requested for an element that holds no children.
    #[error("element '{0}' is not a container")]
    NotABin(String),

    /// The runner was dropped before the monitor could register.
    #[error("runner is gone")]
    RunnerGone,

    /// The graph refused a hook (e.g. an interceptor is already installed).
    #[error(transparent)]
    Graph(#[from] GraphError),
}
