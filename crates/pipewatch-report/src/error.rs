//! Error types for the report crate.

use thiserror::Error;

/// Result type alias for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

/// Errors raised while configuring the runner.
#[derive(Debug, Error)]
pub enum ReportError {
    /// An opaque-bin pattern is not a valid regex.
    #[error("invalid opaque bin pattern: {0}")]
    InvalidPattern(String),

    /// A fatal flag was not recognized.
    #[error("unknown fatal flag '{0}' (expected fatal_criticals, fatal_warnings or fatal_issues)")]
    UnknownFatalFlag(String),
}
