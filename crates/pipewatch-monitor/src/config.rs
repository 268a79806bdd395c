//! Monitor tree configuration.

use std::time::Duration;

/// Configuration shared by every monitor of a tree.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use pipewatch_monitor::MonitorConfig;
///
/// let config = MonitorConfig::new()
///     .with_position_interval(Duration::from_millis(100))
///     .with_consistency_timeout(Duration::from_secs(2));
/// assert!(config.report_positions);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Period of the position timer.
    pub position_interval: Duration,
    /// How long children may take to settle after a container transition.
    pub consistency_timeout: Duration,
    /// Whether the root monitor samples positions at all.
    pub report_positions: bool,
}

impl MonitorConfig {
    /// Creates a config with default values.
    ///
    /// Defaults:
    /// - Position interval: 250 ms
    /// - Consistency timeout: 5 s
    /// - Position reports: enabled
    #[must_use]
    pub const fn new() -> Self {
        Self {
            position_interval: Duration::from_millis(250),
            consistency_timeout: Duration::from_secs(5),
            report_positions: true,
        }
    }

    /// Sets the position timer period.
    #[must_use]
    pub const fn with_position_interval(mut self, interval: Duration) -> Self {
        self.position_interval = interval;
        self
    }

    /// Sets the state-consistency window.
    #[must_use]
    pub const fn with_consistency_timeout(mut self, timeout: Duration) -> Self {
        self.consistency_timeout = timeout;
        self
    }

    /// Enables or disables position sampling.
    #[must_use]
    pub const fn with_report_positions(mut self, enabled: bool) -> Self {
        self.report_positions = enabled;
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}
