//! Monitor-creation policy supplied by the runner.

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};

/// How deep the monitor tree follows nested containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode", content = "depth")]
pub enum RecursePolicy {
    /// Every nested container gets its own bin monitor.
    #[default]
    Always,
    /// Only the top-level container is treated as a bin.
    Never,
    /// Containers deeper than the given depth are wrapped as leaves.
    /// The top-level container is depth 0.
    MaxDepth(usize),
}

/// Decides how discovered children are wrapped.
#[derive(Debug, Clone)]
pub struct MonitorPolicy {
    stateless: bool,
    recurse: RecursePolicy,
    opaque: Option<RegexSet>,
    opaque_patterns: Vec<String>,
}

impl MonitorPolicy {
    /// Builds a policy. `opaque_bins` are regexes; containers whose name
    /// matches one are wrapped as leaves.
    pub fn new(stateless: bool, recurse: RecursePolicy, opaque_bins: &[String]) -> Result<Self> {
        let opaque = if opaque_bins.is_empty() {
            None
        } else {
            Some(RegexSet::new(opaque_bins).map_err(|e| ReportError::InvalidPattern(e.to_string()))?)
        };
        Ok(Self {
            stateless,
            recurse,
            opaque,
            opaque_patterns: opaque_bins.to_vec(),
        })
    }

    /// True if bin monitors skip state-change interception.
    pub fn stateless(&self) -> bool {
        self.stateless
    }

    /// Recursion setting.
    pub fn recurse(&self) -> RecursePolicy {
        self.recurse
    }

    /// Patterns naming containers to treat as leaves.
    pub fn opaque_patterns(&self) -> &[String] {
        &self.opaque_patterns
    }

    /// True if a container called `name` at `depth` gets a bin monitor.
    pub fn should_recurse(&self, name: &str, depth: usize) -> bool {
        if self.opaque.as_ref().is_some_and(|set| set.is_match(name)) {
            return false;
        }
        match self.recurse {
            RecursePolicy::Always => true,
            RecursePolicy::Never => depth == 0,
            RecursePolicy::MaxDepth(max) => depth <= max,
        }
    }
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            stateless: false,
            recurse: RecursePolicy::Always,
            opaque: None,
            opaque_patterns: Vec::new(),
        }
    }
}
