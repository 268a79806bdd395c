//! Configuration types for a validation run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pipewatch_monitor::MonitorConfig;
use pipewatch_report::{FatalFlags, MonitorPolicy, RecursePolicy, RunnerConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::Result;

/// Environment variable holding fatal flags, e.g. `fatal_criticals`.
pub const ENV_FATAL: &str = "PIPEWATCH_FATAL";

/// Environment variable holding a scenario file path.
pub const ENV_SCENARIO: &str = "PIPEWATCH_SCENARIO";

/// Configuration for a validation session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateConfig {
    /// Runner policy and fatal levels.
    pub runner: RunnerSection,

    /// Monitor tree timing.
    pub monitor: MonitorSection,

    /// Scenario to execute.
    pub scenario: ScenarioSection,
}

/// Runner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// Report levels that stop the run.
    pub fatal: FatalFlags,

    /// Skip state-change interception and position sampling.
    pub stateless: bool,

    /// How deep nested containers get their own monitor.
    pub recurse: RecursePolicy,

    /// Regexes naming containers to wrap as leaves.
    pub opaque_bins: Vec<String>,
}

impl RunnerSection {
    /// Builds the runner configuration. Fails on a bad opaque pattern.
    pub fn to_runner_config(&self) -> Result<RunnerConfig> {
        Ok(RunnerConfig {
            fatal: self.fatal,
            policy: MonitorPolicy::new(self.stateless, self.recurse, &self.opaque_bins)?,
        })
    }
}

/// Monitor tree timing, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Position sampling period.
    pub position_interval_ms: u64,

    /// How long children get to settle after a container transition.
    pub consistency_timeout_ms: u64,

    /// Sample positions at all.
    pub report_positions: bool,
}

impl Default for MonitorSection {
    fn default() -> Self {
        let defaults = MonitorConfig::new();
        Self {
            position_interval_ms: defaults.position_interval.as_millis() as u64,
            consistency_timeout_ms: defaults.consistency_timeout.as_millis() as u64,
            report_positions: defaults.report_positions,
        }
    }
}

impl MonitorSection {
    /// Converts to the monitor crate's configuration.
    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new()
            .with_position_interval(Duration::from_millis(self.position_interval_ms.max(1)))
            .with_consistency_timeout(Duration::from_millis(self.consistency_timeout_ms))
            .with_report_positions(self.report_positions)
    }
}

/// Scenario selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSection {
    /// Scenario file; none runs the pipeline unscripted.
    pub path: Option<PathBuf>,
}

impl ValidateConfig {
    /// Parses a JSON document. Missing sections take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Self::from_json(&text)
    }

    /// Applies `PIPEWATCH_FATAL` and `PIPEWATCH_SCENARIO` when set.
    pub fn apply_env(&mut self) -> Result<()> {
        let fatal = std::env::var(ENV_FATAL).ok();
        let scenario = std::env::var(ENV_SCENARIO).ok();
        self.apply_overrides(fatal.as_deref(), scenario.as_deref())
    }

    /// Overrides the fatal flags and scenario path. Empty values are
    /// ignored.
    pub fn apply_overrides(&mut self, fatal: Option<&str>, scenario: Option<&str>) -> Result<()> {
        if let Some(fatal) = fatal.filter(|f| !f.trim().is_empty()) {
            self.runner.fatal = fatal.parse()?;
        }
        if let Some(scenario) = scenario.filter(|s| !s.trim().is_empty()) {
            self.scenario.path = Some(PathBuf::from(scenario));
        }
        Ok(())
    }
}
