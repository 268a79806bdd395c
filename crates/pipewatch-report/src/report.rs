//! Validation reports and position telemetry.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use pipewatch_graph::{ClockTime, ElementId};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::issue::{IssueId, ReportLevel};

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// What went wrong
    pub issue: IssueId,
    /// Effective severity
    pub level: ReportLevel,
    /// Name of the monitor that detected it
    pub reporter: String,
    /// Element the reporter wraps, if any
    pub element: Option<ElementId>,
    /// Free-form detail
    pub message: String,
    /// Time since the runner started
    pub timestamp: Duration,
}

impl Report {
    /// Creates a report at the issue's default level.
    pub fn new(issue: IssueId, reporter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issue,
            level: issue.issue().default_level,
            reporter: reporter.into(),
            element: None,
            message: message.into(),
            timestamp: Duration::ZERO,
        }
    }

    /// Attaches the element identity.
    #[must_use]
    pub fn with_element(mut self, element: ElementId) -> Self {
        self.element = Some(element);
        self
    }

    /// Overrides the level.
    #[must_use]
    pub fn with_level(mut self, level: ReportLevel) -> Self {
        self.level = level;
        self
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let issue = self.issue.issue();
        writeln!(f, "{:>10} : {}", self.level.name(), issue.summary)?;
        writeln!(
            f,
            "{:12} Detected on <{}> at {}",
            "",
            self.reporter,
            ClockTime::from(self.timestamp)
        )?;
        if !self.message.is_empty() {
            writeln!(f, "{:12} Details : {}", "", self.message)?;
        }
        if let Some(description) = issue.description {
            writeln!(f, "{:12} Description : {}", "", description)?;
        }
        Ok(())
    }
}

/// A sampled playback position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Name of the sampling monitor
    pub reporter: String,
    /// Current position
    pub position: ClockTime,
    /// Duration, when known
    pub duration: Option<ClockTime>,
}

impl fmt::Display for PositionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration {
            Some(d) => write!(f, "<position: {} duration: {}>", self.position, d),
            None => write!(f, "<position: {} duration: unknown>", self.position),
        }
    }
}

/// Which report levels latch the runner's fatal flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalFlags {
    /// Criticals are fatal
    #[serde(default)]
    pub criticals: bool,
    /// Warnings (and criticals) are fatal
    #[serde(default)]
    pub warnings: bool,
    /// Issues (and everything above) are fatal
    #[serde(default)]
    pub issues: bool,
}

impl FatalFlags {
    /// True if a report at `level` is fatal under these flags.
    pub fn is_fatal(&self, level: ReportLevel) -> bool {
        (self.issues && level <= ReportLevel::Issue)
            || (self.warnings && level <= ReportLevel::Warning)
            || (self.criticals && level <= ReportLevel::Critical)
    }
}

impl FromStr for FatalFlags {
    type Err = ReportError;

    /// Parses a comma or colon separated list such as
    /// `fatal_criticals,fatal_warnings`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = FatalFlags::default();
        for token in s.split([',', ':']).map(str::trim).filter(|t| !t.is_empty()) {
            match token {
                "fatal_criticals" => flags.criticals = true,
                "fatal_warnings" => flags.warnings = true,
                "fatal_issues" => flags.issues = true,
                other => return Err(ReportError::UnknownFatalFlag(other.to_string())),
            }
        }
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_rendering() {
        let report = Report::new(IssueId::StateChangeTimeout, "pipeline", "sink stuck in paused");
        let text = report.to_string();
        assert!(text.contains("  critical : children did not reach"));
        assert!(text.contains("Detected on <pipeline>"));
        assert!(text.contains("Details : sink stuck in paused"));
        assert!(text.contains("Description : "));
    }

    #[test]
    fn test_fatal_flags() {
        let flags: FatalFlags = "fatal_warnings".parse().unwrap();
        assert!(flags.is_fatal(ReportLevel::Critical));
        assert!(flags.is_fatal(ReportLevel::Warning));
        assert!(!flags.is_fatal(ReportLevel::Issue));

        assert!(!FatalFlags::default().is_fatal(ReportLevel::Critical));
        assert!("fatal_everything".parse::<FatalFlags>().is_err());
    }

    #[test]
    fn test_report_serializes() {
        let report = Report::new(IssueId::ErrorOnBus, "src", "boom");
        let json = serde_json::to_string(&report).unwrap();
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
