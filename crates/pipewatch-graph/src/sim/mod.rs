//! # Simulated Graph
//!
//! In-process [`Element`](crate::Element) and [`Bin`](crate::Bin)
//! implementations. No data flows; the simulation only models the parts
//! the monitor tree observes: structure, state, position, properties and
//! lifecycle notifications.
//!
//! Knobs for inducing misbehavior:
//!
//! | Knob | Effect |
//! |------|--------|
//! | [`SimElement::fail_transitions_to`] | transitions to that state return `Failure` |
//! | [`SimElement::set_transition_mode`] | commit immediately, after a delay, or never |
//! | [`SimBin::set_ignore_child_failures`] | bin reports success even when a child fails |
//! | [`SimElement::post_error`] | posts an error notification |
//! | [`SimBin::set_position_available`] | position queries answer `None` |
//!
//! ```rust
//! use pipewatch_graph::sim::{SimBin, SimElement};
//! use pipewatch_graph::{Bin, Element, State};
//!
//! let pipeline = SimBin::new("pipeline");
//! pipeline.add(SimElement::new("src"))?;
//! pipeline.add(SimElement::new("sink"))?;
//!
//! pipeline.set_state(State::Playing);
//! assert!(pipeline
//!     .children()
//!     .iter()
//!     .all(|c| c.current_state() == State::Playing));
//! # Ok::<(), pipewatch_graph::GraphError>(())
//! ```

mod bin;
mod element;
mod launch;

pub use bin::SimBin;
pub use element::{SimElement, TransitionMode};
pub use launch::parse_launch;
