//! # Scenarios
//!
//! Scripted test scenarios run against a monitored pipeline. A scenario
//! is a list of actions (seek, state changes, property writes, checks)
//! each optionally bound to a playback time.
//!
//! ## Execution
//!
//! | Trigger | Effect |
//! |---------|--------|
//! | target reaches PLAYING | actions without `playback-time` at the head of the queue run |
//! | [`Scenario::on_position`] | actions whose `playback-time` has passed run |
//! | [`Scenario::finish`] | leftover actions are reported as `scenario::not-ended` |
//!
//! Actions always run in file order: a due action waits behind an
//! earlier one that is not due yet.
//!
//! ## Example
//!
//! ```rust
//! use pipewatch_report::{Runner, RunnerConfig};
//! use pipewatch_scenario::Scenario;
//!
//! let runner = Runner::new(RunnerConfig::default());
//! let scenario = Scenario::parse(
//!     "smoke",
//!     "set-state, state=paused, playback-time=1.0\nstop, playback-time=2.0",
//!     &runner,
//! )?;
//! assert_eq!(scenario.pending_actions(), 2);
//! # Ok::<(), pipewatch_scenario::ScenarioError>(())
//! ```

mod action;
mod error;
mod scenario;

pub use action::{parse_scenario, Action, ActionKind, ActionType, ParsedScenario, ACTION_TYPES, PLAYBACK_TIME};
pub use error::{Result, ScenarioError};
pub use scenario::{Scenario, ScenarioEvent, ScenarioTarget};
