//! # Pipeline Graph Interface
//!
//! The narrow collaborator surface the monitor tree observes: processing
//! units ([`Element`]), containers of processing units ([`Bin`]), and
//! the hooks a container offers for watching its structure and state.
//!
//! ## Capabilities
//!
//! | Capability | Method |
//! |------------|--------|
//! | Enumerate children | [`Bin::children`] |
//! | Child added/removed notifications | [`Bin::connect_children`] |
//! | Lifecycle notifications | [`Element::connect_events`] |
//! | Current state and position | [`Element::current_state`], [`Element::query_position`] |
//! | State-change interception | [`Bin::install_interceptor`] |
//! | Container vs leaf test | [`Element::as_bin`] |
//!
//! Every notification channel hands back a [`Subscription`]; dropping it
//! disconnects the handler.
//!
//! ## Simulated graph
//!
//! The [`sim`] module provides an in-process implementation (no media
//! flows through it) used by tests and the command-line runner.
//!
//! ```rust
//! use pipewatch_graph::sim::parse_launch;
//! use pipewatch_graph::{Bin, Element};
//!
//! let pipeline = parse_launch("src ! dec[ parse ! decoder ] ! sink")?;
//! assert_eq!(pipeline.children().len(), 3);
//! # Ok::<(), pipewatch_graph::GraphError>(())
//! ```

mod element;
mod error;
mod subscription;
mod time;

pub mod sim;

pub use element::{
    Bin, ChildEvent, ChildHandler, ChildStateResult, Element, ElementEvent, ElementHandler,
    ElementId, Event, InterceptDecision, PropertyValue, State, StateChangeOutcome,
    StateChangeReturn, StateInterceptor, StateTransition,
};
pub use error::{GraphError, Result};
pub use subscription::{HandlerList, Subscription, SubscriptionId};
pub use time::ClockTime;
