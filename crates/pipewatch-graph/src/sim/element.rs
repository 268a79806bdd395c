//! Simulated leaf element.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::element::{
    Bin, Element, ElementEvent, ElementHandler, ElementId, Event, PropertyValue, State,
    StateChangeReturn,
};
use crate::error::{GraphError, Result};
use crate::subscription::{HandlerList, Subscription};
use crate::time::ClockTime;

/// How a [`SimElement`] completes state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionMode {
    /// Commit before `set_state` returns (`Success`).
    Immediate,
    /// Return `Async` and commit from a helper thread after the delay.
    Delayed(Duration),
    /// Return `Async` and never commit.
    Stalled,
}

#[derive(Debug)]
struct ElementState {
    state: State,
    generation: u64,
    properties: BTreeMap<String, PropertyValue>,
    failing: Option<State>,
    mode: TransitionMode,
    position: Option<ClockTime>,
    duration: Option<ClockTime>,
    received: Vec<Event>,
}

/// A leaf element with scriptable behavior.
pub struct SimElement {
    id: ElementId,
    name: String,
    inner: Mutex<ElementState>,
    handlers: HandlerList<ElementHandler>,
    self_weak: Weak<SimElement>,
}

impl SimElement {
    /// Creates an element in the `Null` state.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak| Self {
            id: ElementId::next(),
            name,
            inner: Mutex::new(ElementState {
                state: State::Null,
                generation: 0,
                properties: BTreeMap::new(),
                failing: None,
                mode: TransitionMode::Immediate,
                position: None,
                duration: None,
                received: Vec::new(),
            }),
            handlers: HandlerList::new(),
            self_weak: weak.clone(),
        })
    }

    /// Makes every transition to `state` fail. `None` clears it.
    pub fn fail_transitions_to(&self, state: Option<State>) {
        self.inner.lock().failing = state;
    }

    /// Selects how transitions complete.
    pub fn set_transition_mode(&self, mode: TransitionMode) {
        self.inner.lock().mode = mode;
    }

    /// Sets the value answered by position queries.
    pub fn set_position(&self, position: Option<ClockTime>) {
        self.inner.lock().position = position;
    }

    /// Sets the value answered by duration queries.
    pub fn set_duration(&self, duration: Option<ClockTime>) {
        self.inner.lock().duration = duration;
    }

    /// Posts an error notification.
    pub fn post_error(&self, message: impl Into<String>) {
        self.emit(&ElementEvent::Error {
            message: message.into(),
        });
    }

    /// Posts a warning notification.
    pub fn post_warning(&self, message: impl Into<String>) {
        self.emit(&ElementEvent::Warning {
            message: message.into(),
        });
    }

    /// Events received through [`Element::send_event`], oldest first.
    pub fn received_events(&self) -> Vec<Event> {
        self.inner.lock().received.clone()
    }

    /// Number of connected lifecycle handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn emit(&self, event: &ElementEvent) {
        for handler in self.handlers.snapshot() {
            handler(event);
        }
    }

    fn commit(&self, target: State, generation: u64) {
        let old = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            let old = inner.state;
            inner.state = target;
            old
        };
        if old != target {
            trace!(element = %self.name, %old, new = %target, "state committed");
            self.emit(&ElementEvent::StateChanged { old, new: target });
        }
    }
}

impl Element for SimElement {
    fn id(&self) -> ElementId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn current_state(&self) -> State {
        self.inner.lock().state
    }

    fn set_state(&self, target: State) -> StateChangeReturn {
        let (mode, generation) = {
            let mut inner = self.inner.lock();
            if inner.failing == Some(target) {
                return StateChangeReturn::Failure;
            }
            inner.generation += 1;
            (inner.mode, inner.generation)
        };

        match mode {
            TransitionMode::Immediate => {
                self.commit(target, generation);
                StateChangeReturn::Success
            }
            TransitionMode::Delayed(delay) => {
                let weak = self.self_weak.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    if let Some(element) = weak.upgrade() {
                        element.commit(target, generation);
                    }
                });
                StateChangeReturn::Async
            }
            TransitionMode::Stalled => StateChangeReturn::Async,
        }
    }

    fn query_position(&self) -> Option<ClockTime> {
        self.inner.lock().position
    }

    fn query_duration(&self) -> Option<ClockTime> {
        self.inner.lock().duration
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        if name == "name" {
            return Some(PropertyValue::Str(self.name.clone()));
        }
        self.inner.lock().properties.get(name).cloned()
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        if name == "name" {
            return Err(GraphError::Property {
                element: self.name.clone(),
                property: name.to_string(),
                reason: "read-only".to_string(),
            });
        }
        self.inner
            .lock()
            .properties
            .insert(name.to_string(), value.clone());
        self.emit(&ElementEvent::PropertyChanged {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn send_event(&self, event: Event) -> bool {
        let is_eos = matches!(event, Event::Eos);
        {
            let mut inner = self.inner.lock();
            if let Event::Seek { start, .. } = &event {
                if inner.position.is_some() {
                    inner.position = Some(*start);
                }
            }
            inner.received.push(event);
        }
        if is_eos {
            self.emit(&ElementEvent::Eos);
        }
        true
    }

    fn connect_events(&self, handler: ElementHandler) -> Subscription {
        self.handlers.connect(handler)
    }

    fn as_bin(self: Arc<Self>) -> Option<Arc<dyn Bin>> {
        None
    }
}

impl fmt::Debug for SimElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimElement")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
