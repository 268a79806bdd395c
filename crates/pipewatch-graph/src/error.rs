//! Error types for the graph interface and the simulated graph.

use thiserror::Error;

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by containers and elements.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A child with the same name already lives in the container.
    #[error("bin '{bin}' already has a child named '{child}'")]
    DuplicateChild {
        /// Container name
        bin: String,
        /// Offending child name
        child: String,
    },

    /// The requested child is not part of the container.
    #[error("bin '{bin}' has no child '{child}'")]
    NoSuchChild {
        /// Container name
        bin: String,
        /// Requested child
        child: String,
    },

    /// Another state interceptor is already installed on the container.
    #[error("bin '{0}' already has a state interceptor installed")]
    InterceptorInstalled(String),

    /// Property is unknown or rejected the value.
    #[error("element '{element}' rejected property '{property}': {reason}")]
    Property {
        /// Element name
        element: String,
        /// Property name
        property: String,
        /// Why it was rejected
        reason: String,
    },

    /// A launch description could not be parsed.
    #[error("launch description error at offset {offset}: {message}")]
    Launch {
        /// Byte offset into the description
        offset: usize,
        /// What went wrong
        message: String,
    },

    /// A value could not be parsed.
    #[error("invalid value '{value}': expected {expected}")]
    InvalidValue {
        /// Text that failed to parse
        value: String,
        /// Expected kind
        expected: &'static str,
    },
}
