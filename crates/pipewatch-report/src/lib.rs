//! # Validation Reports
//!
//! The issue catalog, the [`Report`] value monitors emit, and the
//! [`Runner`] that collects reports from a whole monitor tree.
//!
//! ## Flow
//!
//! ```text
//!  ElementMonitor ─┐
//!                  ├──► BinMonitor ──► Runner ──► print_summary / exit_code
//!  ElementMonitor ─┘        │
//!                           └── PositionReport ──► Runner::subscribe_positions
//! ```
//!
//! Reports are findings, not errors: the run continues after every report
//! so a session accumulates as many findings as possible. [`FatalFlags`]
//! only latch [`Runner::is_fatal`] so the caller can decide to stop.
//!
//! ## Example
//!
//! ```rust
//! use pipewatch_report::{IssueId, ReportLevel, Runner, RunnerConfig};
//!
//! let runner = Runner::new(RunnerConfig::default());
//! runner.report_issue(IssueId::StateChangeFailure, "pipeline", "paused -> playing");
//!
//! assert_eq!(runner.count_level(ReportLevel::Critical), 1);
//! assert_eq!(runner.exit_code(), 1);
//! ```

mod error;
mod issue;
mod policy;
mod report;
mod runner;

pub use error::{ReportError, Result};
pub use issue::{Issue, IssueId, ReportArea, ReportLevel};
pub use policy::{MonitorPolicy, RecursePolicy};
pub use report::{FatalFlags, PositionReport, Report};
pub use runner::{Runner, RunnerConfig};
