//! Error types for Pipewatch Core.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for session setup.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for [`crate::ValidateConfig`].
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    /// Runner policy or fatal flags rejected.
    #[error("Runner error: {0}")]
    Report(#[from] pipewatch_report::ReportError),

    /// Scenario failed to load or parse.
    #[error("Scenario error: {0}")]
    Scenario(#[from] pipewatch_scenario::ScenarioError),

    /// Monitor tree could not be built.
    #[error("Monitor error: {0}")]
    Monitor(#[from] pipewatch_monitor::MonitorError),

    /// Graph collaborator failure.
    #[error("Graph error: {0}")]
    Graph(#[from] pipewatch_graph::GraphError),
}
