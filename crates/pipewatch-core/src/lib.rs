//! # Pipewatch Core
//!
//! Validation session facade. Wires a [`Runner`], a monitor tree and an
//! optional scenario around one pipeline.
//!
//! ## Components
//!
//! | Layer | Crate | Role |
//! |-------|-------|------|
//! | Graph | `pipewatch-graph` | Elements, containers, interception seam |
//! | Reports | `pipewatch-report` | Issue catalog, runner, policy |
//! | Scenario | `pipewatch-scenario` | Scripted actions against the pipeline |
//! | Monitors | `pipewatch-monitor` | Shadow tree of observers |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Session                           │
//! ├───────────────────────────────────────────────────────────┤
//! │                                                           │
//! │   ValidateConfig ──► Runner ◄──── reports ────┐           │
//! │                        │                      │           │
//! │                        ▼                      │           │
//! │   pipeline ─────► BinMonitor (root) ──────────┤           │
//! │                        │    ▲                 │           │
//! │                        │    └── Scenario ◄── events       │
//! │                        ▼                                  │
//! │             ElementMonitor / BinMonitor ...               │
//! │                                                           │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pipewatch_core::{RunLimits, Session, ValidateConfig};
//! use pipewatch_monitor::TokioScheduler;
//!
//! let mut config = ValidateConfig::from_file("pipewatch.json")?;
//! config.apply_env()?;
//!
//! let scheduler = Arc::new(TokioScheduler::current().unwrap());
//! let session = Session::new(config, pipeline, scheduler)?;
//! let reason = session.run(RunLimits::new().with_timeout(Duration::from_secs(30))).await;
//! let summary = session.finish();
//! std::process::exit(summary.exit_code);
//! ```
//!
//! ## Notes
//!
//! - Findings are [`Report`]s on the runner, never `Err`s
//! - `Err` means the session could not be set up
//! - The exit code is non-zero once any critical was reported

mod config;
mod error;
mod session;

pub use config::{
    MonitorSection, RunnerSection, ScenarioSection, ValidateConfig, ENV_FATAL, ENV_SCENARIO,
};
pub use error::CoreError;
pub use session::{RunLimits, Session, StopReason, Summary};

// Re-export component types for convenience
pub use pipewatch_monitor::{BinMonitor, ManualScheduler, MonitorConfig, Scheduler, TokioScheduler};
pub use pipewatch_report::{IssueId, Report, ReportLevel, Runner};
pub use pipewatch_scenario::Scenario;

/// Core result type for session operations.
pub type Result<T> = std::result::Result<T, CoreError>;
