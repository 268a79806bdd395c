//! # Monitor Tree
//!
//! A shadow hierarchy of observers mirroring a live container/element
//! graph while it runs and mutates.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`BinMonitor`] | Wraps a container: child sync, state checks, position timer, scenario host |
//! | [`ElementMonitor`] | Wraps a leaf: forwards state, errors and warnings |
//! | [`MonitorHandle`] | Either of the above behind one interface |
//! | [`MonitorContext`] | Runner, scheduler and [`MonitorConfig`] shared by a tree |
//! | [`Scheduler`] | Position timers and deferred state checks: [`TokioScheduler`] or [`ManualScheduler`] |
//!
//! ## Flow
//!
//! ```text
//!            Runner ◄──────────── reports ─────────────┐
//!              ▲                                       │
//!      BinMonitor (root) ── position timer ──► PositionReport
//!        │          ▲
//!        │          └── child_state_changed / raise ──┐
//!        ├── ElementMonitor (src)                     │
//!        └── BinMonitor (dec) ─── ElementMonitor ─────┘
//! ```
//!
//! Reports travel up through the parents to the runner; the runner is
//! held weakly everywhere.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pipewatch_graph::sim::parse_launch;
//! use pipewatch_monitor::{BinMonitor, ManualScheduler, MonitorConfig, MonitorContext};
//! use pipewatch_report::{Runner, RunnerConfig};
//!
//! let runner = Runner::new(RunnerConfig::default());
//! let ctx = MonitorContext::new(&runner, ManualScheduler::new(), MonitorConfig::new());
//!
//! let pipeline = parse_launch("src ! dec[ parse ! decoder ] ! sink")?;
//! let monitor = BinMonitor::new(pipeline, &ctx)?;
//!
//! assert_eq!(monitor.child_count(), 3);
//! assert!(monitor.find_monitor("decoder").is_some());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bin;
mod config;
mod element;
mod error;
mod handle;
mod schedule;

pub use bin::BinMonitor;
pub use config::MonitorConfig;
pub use element::ElementMonitor;
pub use error::{MonitorError, Result};
pub use handle::{MonitorContext, MonitorHandle};
pub use schedule::{ManualScheduler, OnceTask, Scheduler, Task, TaskHandle, TokioScheduler};
