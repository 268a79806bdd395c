//! Element and container traits plus the values that flow through them.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::subscription::Subscription;
use crate::time::ClockTime;

static NEXT_ELEMENT: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(u64);

impl ElementId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        Self(NEXT_ELEMENT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of an element. Ordered from `Null` to `Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Initial state, no resources held.
    Null,
    /// Resources allocated.
    Ready,
    /// Prerolled, clock stopped.
    Paused,
    /// Data flowing.
    Playing,
}

impl State {
    /// Lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            State::Null => "null",
            State::Ready => "ready",
            State::Paused => "paused",
            State::Playing => "playing",
        }
    }

    /// True for states in which a position is meaningful.
    pub const fn is_playing_capable(self) -> bool {
        matches!(self, State::Paused | State::Playing)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for State {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(State::Null),
            "ready" => Ok(State::Ready),
            "paused" => Ok(State::Paused),
            "playing" => Ok(State::Playing),
            _ => Err(GraphError::InvalidValue {
                value: s.to_string(),
                expected: "one of null, ready, paused, playing",
            }),
        }
    }
}

/// Result of a state-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateChangeReturn {
    /// The transition failed.
    Failure,
    /// The transition completed.
    Success,
    /// The transition will complete later.
    Async,
    /// Completed, but the element cannot preroll (live source).
    NoPreroll,
}

impl fmt::Display for StateChangeReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateChangeReturn::Failure => "failure",
            StateChangeReturn::Success => "success",
            StateChangeReturn::Async => "async",
            StateChangeReturn::NoPreroll => "no-preroll",
        })
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Free-form string.
    Str(String),
}

impl PropertyValue {
    /// Parses a bare token, trying bool, integer, float, then string.
    pub fn infer(text: &str) -> Self {
        let t = text.trim();
        match t {
            "true" | "TRUE" | "yes" => return PropertyValue::Bool(true),
            "false" | "FALSE" | "no" => return PropertyValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = t.parse::<i64>() {
            return PropertyValue::Int(i);
        }
        if let Ok(f) = t.parse::<f64>() {
            return PropertyValue::Float(f);
        }
        PropertyValue::Str(t.to_string())
    }

    /// Numeric view (integers widen to float).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String view; only for string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// An event sent into an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Move playback to `start`.
    Seek {
        /// New playback position
        start: ClockTime,
        /// Flush queued data first
        flush: bool,
    },
    /// End of stream.
    Eos,
    /// Start flushing.
    FlushStart,
    /// Stop flushing.
    FlushStop,
    /// Application-defined event.
    Custom(String),
}

/// Lifecycle notification posted by an element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementEvent {
    /// State was committed.
    StateChanged {
        /// Previous state
        old: State,
        /// New state
        new: State,
    },
    /// Fatal error posted by the element.
    Error {
        /// Error text
        message: String,
    },
    /// Non-fatal warning posted by the element.
    Warning {
        /// Warning text
        message: String,
    },
    /// A property was written.
    PropertyChanged {
        /// Property name
        name: String,
        /// New value
        value: PropertyValue,
    },
    /// End of stream reached.
    Eos,
}

/// Structural notification posted by a container.
#[derive(Debug, Clone)]
pub enum ChildEvent {
    /// A child joined the container.
    Added(Arc<dyn Element>),
    /// A child left the container.
    Removed(Arc<dyn Element>),
}

impl ChildEvent {
    /// The child concerned.
    pub fn child(&self) -> &Arc<dyn Element> {
        match self {
            ChildEvent::Added(c) | ChildEvent::Removed(c) => c,
        }
    }
}

/// Handler for [`ElementEvent`]s.
pub type ElementHandler = Arc<dyn Fn(&ElementEvent) + Send + Sync>;

/// Handler for [`ChildEvent`]s.
pub type ChildHandler = Arc<dyn Fn(&ChildEvent) + Send + Sync>;

/// A requested state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State at request time
    pub from: State,
    /// Requested state
    pub to: State,
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Interceptor answer before a transition is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptDecision {
    /// Apply the transition.
    Proceed,
    /// Refuse the transition; the container returns `Failure`.
    Veto(String),
}

/// Per-child result of an applied transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildStateResult {
    /// Child identity
    pub id: ElementId,
    /// Child name
    pub name: String,
    /// What the child returned
    pub result: StateChangeReturn,
}

/// Outcome handed to [`StateInterceptor::after_change`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeOutcome {
    /// What the container returned to its caller
    pub result: StateChangeReturn,
    /// What each child returned
    pub children: Vec<ChildStateResult>,
}

/// Hook wrapped around a container's state changes.
///
/// Both hooks run on the thread that requested the transition and must
/// return promptly. Anything that waits for children to settle belongs
/// on another thread.
pub trait StateInterceptor: Send + Sync {
    /// Called before the transition reaches any child.
    fn before_change(&self, transition: StateTransition) -> InterceptDecision;

    /// Called once the transition has been applied.
    fn after_change(&self, transition: StateTransition, outcome: &StateChangeOutcome);
}

/// A processing unit.
pub trait Element: Send + Sync + fmt::Debug {
    /// Identity, stable for the element's lifetime.
    fn id(&self) -> ElementId;

    /// Name, unique within the parent container.
    fn name(&self) -> String;

    /// Last committed state.
    fn current_state(&self) -> State;

    /// Requests a transition to `target`.
    fn set_state(&self, target: State) -> StateChangeReturn;

    /// Current playback position. Must not block; `None` when unknown.
    fn query_position(&self) -> Option<ClockTime>;

    /// Stream duration. Must not block; `None` when unknown.
    fn query_duration(&self) -> Option<ClockTime>;

    /// Reads a property.
    fn property(&self, name: &str) -> Option<PropertyValue>;

    /// Writes a property.
    fn set_property(&self, name: &str, value: PropertyValue) -> Result<()>;

    /// Sends an event into the element. Returns whether it was handled.
    fn send_event(&self, event: Event) -> bool;

    /// Connects a lifecycle handler.
    fn connect_events(&self, handler: ElementHandler) -> Subscription;

    /// Container capability test. `Some` when this element holds children.
    fn as_bin(self: Arc<Self>) -> Option<Arc<dyn Bin>>;
}

/// A processing unit that owns child units.
pub trait Bin: Element {
    /// Current children, in container order.
    fn children(&self) -> Vec<Arc<dyn Element>>;

    /// True if `id` is currently a direct child.
    fn contains(&self, id: ElementId) -> bool;

    /// Connects a child-added/child-removed handler.
    ///
    /// The container removes a child from its list before notifying the
    /// removal, and inserts it before notifying the addition.
    fn connect_children(&self, handler: ChildHandler) -> Subscription;

    /// Wraps state changes with `interceptor`. Only one may be installed;
    /// dropping the subscription uninstalls it.
    fn install_interceptor(&self, interceptor: Arc<dyn StateInterceptor>) -> Result<Subscription>;

    /// Upcast.
    fn as_element(self: Arc<Self>) -> Arc<dyn Element>;
}
