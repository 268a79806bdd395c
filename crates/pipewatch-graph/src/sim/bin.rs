//! Simulated container.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::element::{
    Bin, ChildEvent, ChildHandler, ChildStateResult, Element, ElementEvent, ElementHandler,
    ElementId, Event, InterceptDecision, PropertyValue, State, StateChangeOutcome,
    StateChangeReturn, StateInterceptor, StateTransition,
};
use crate::error::{GraphError, Result};
use crate::subscription::{HandlerList, Subscription, SubscriptionId};
use crate::time::ClockTime;

#[derive(Debug)]
struct BinState {
    state: State,
    children: Vec<Arc<dyn Element>>,
    properties: BTreeMap<String, PropertyValue>,
    /// Position accumulated before the current PLAYING stretch.
    base: ClockTime,
    playing_since: Option<Instant>,
    duration: Option<ClockTime>,
    position_available: bool,
    ignore_child_failures: bool,
    received: Vec<Event>,
}

impl BinState {
    fn position(&self) -> ClockTime {
        match self.playing_since {
            Some(since) => self.base.saturating_add(ClockTime::from(since.elapsed())),
            None => self.base,
        }
    }

    fn enter(&mut self, new: State) {
        match new {
            State::Playing => {
                if self.playing_since.is_none() {
                    self.playing_since = Some(Instant::now());
                }
            }
            State::Paused => {
                self.base = self.position();
                self.playing_since = None;
            }
            State::Ready | State::Null => {
                self.base = ClockTime::ZERO;
                self.playing_since = None;
            }
        }
        self.state = new;
    }
}

/// A container holding other elements. Its clock runs while PLAYING.
pub struct SimBin {
    id: ElementId,
    name: String,
    inner: Mutex<BinState>,
    element_handlers: HandlerList<ElementHandler>,
    child_handlers: HandlerList<ChildHandler>,
    interceptor: Mutex<Option<(SubscriptionId, Arc<dyn StateInterceptor>)>>,
    self_weak: Weak<SimBin>,
}

impl SimBin {
    /// Creates an empty container in the `Null` state.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak| Self {
            id: ElementId::next(),
            name,
            inner: Mutex::new(BinState {
                state: State::Null,
                children: Vec::new(),
                properties: BTreeMap::new(),
                base: ClockTime::ZERO,
                playing_since: None,
                duration: None,
                position_available: true,
                ignore_child_failures: false,
                received: Vec::new(),
            }),
            element_handlers: HandlerList::new(),
            child_handlers: HandlerList::new(),
            interceptor: Mutex::new(None),
            self_weak: weak.clone(),
        })
    }

    /// Adds a child, then notifies child-added handlers.
    pub fn add(&self, child: Arc<dyn Element>) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            let name = child.name();
            if inner
                .children
                .iter()
                .any(|c| c.id() == child.id() || c.name() == name)
            {
                return Err(GraphError::DuplicateChild {
                    bin: self.name.clone(),
                    child: name,
                });
            }
            inner.children.push(Arc::clone(&child));
        }
        debug!(bin = %self.name, child = %child.name(), "child added");
        self.emit_child(&ChildEvent::Added(child));
        Ok(())
    }

    /// Removes the child with `id`, then notifies child-removed handlers.
    pub fn remove(&self, id: ElementId) -> Result<Arc<dyn Element>> {
        let child = {
            let mut inner = self.inner.lock();
            let index = inner
                .children
                .iter()
                .position(|c| c.id() == id)
                .ok_or_else(|| GraphError::NoSuchChild {
                    bin: self.name.clone(),
                    child: id.to_string(),
                })?;
            inner.children.remove(index)
        };
        debug!(bin = %self.name, child = %child.name(), "child removed");
        self.emit_child(&ChildEvent::Removed(Arc::clone(&child)));
        Ok(child)
    }

    /// Removes the child called `name`.
    pub fn remove_by_name(&self, name: &str) -> Result<Arc<dyn Element>> {
        let id = self
            .child_by_name(name)
            .map(|c| c.id())
            .ok_or_else(|| GraphError::NoSuchChild {
                bin: self.name.clone(),
                child: name.to_string(),
            })?;
        self.remove(id)
    }

    /// Direct child called `name`.
    pub fn child_by_name(&self, name: &str) -> Option<Arc<dyn Element>> {
        self.inner
            .lock()
            .children
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Sets the value answered by duration queries.
    pub fn set_duration(&self, duration: Option<ClockTime>) {
        self.inner.lock().duration = duration;
    }

    /// When cleared, position queries answer `None` in every state.
    pub fn set_position_available(&self, available: bool) {
        self.inner.lock().position_available = available;
    }

    /// When set, the bin reports success even if a child fails.
    pub fn set_ignore_child_failures(&self, ignore: bool) {
        self.inner.lock().ignore_child_failures = ignore;
    }

    /// Posts an error notification from the bin itself.
    pub fn post_error(&self, message: impl Into<String>) {
        self.emit_element(&ElementEvent::Error {
            message: message.into(),
        });
    }

    /// Events received through [`Element::send_event`], oldest first.
    pub fn received_events(&self) -> Vec<Event> {
        self.inner.lock().received.clone()
    }

    /// Number of connected child-added/removed handlers.
    pub fn child_handler_count(&self) -> usize {
        self.child_handlers.len()
    }

    /// Number of connected lifecycle handlers.
    pub fn handler_count(&self) -> usize {
        self.element_handlers.len()
    }

    /// True if a state interceptor is installed.
    pub fn has_interceptor(&self) -> bool {
        self.interceptor.lock().is_some()
    }

    fn emit_child(&self, event: &ChildEvent) {
        for handler in self.child_handlers.snapshot() {
            handler(event);
        }
    }

    fn emit_element(&self, event: &ElementEvent) {
        for handler in self.element_handlers.snapshot() {
            handler(event);
        }
    }

    fn combine(results: &[ChildStateResult], ignore_failures: bool) -> StateChangeReturn {
        let any = |r: StateChangeReturn| results.iter().any(|c| c.result == r);
        if any(StateChangeReturn::Failure) && !ignore_failures {
            StateChangeReturn::Failure
        } else if any(StateChangeReturn::Async) {
            StateChangeReturn::Async
        } else if any(StateChangeReturn::NoPreroll) {
            StateChangeReturn::NoPreroll
        } else {
            StateChangeReturn::Success
        }
    }
}

impl Element for SimBin {
    fn id(&self) -> ElementId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn current_state(&self) -> State {
        self.inner.lock().state
    }

    /// Commits `target` and emits `StateChanged` as soon as no child
    /// failed, before `after_change` runs. With an `Async` result the
    /// container therefore reports the new state while some children are
    /// still on their way; a later transition replaces it as the
    /// committed state.
    fn set_state(&self, target: State) -> StateChangeReturn {
        let (from, children, ignore_failures) = {
            let inner = self.inner.lock();
            (
                inner.state,
                inner.children.clone(),
                inner.ignore_child_failures,
            )
        };
        let transition = StateTransition { from, to: target };
        let interceptor = self.interceptor.lock().as_ref().map(|(_, i)| Arc::clone(i));

        if let Some(interceptor) = &interceptor {
            if let InterceptDecision::Veto(reason) = interceptor.before_change(transition) {
                debug!(bin = %self.name, %transition, %reason, "state change vetoed");
                return StateChangeReturn::Failure;
            }
        }

        let results: Vec<ChildStateResult> = children
            .iter()
            .map(|child| ChildStateResult {
                id: child.id(),
                name: child.name(),
                result: child.set_state(target),
            })
            .collect();
        let result = Self::combine(&results, ignore_failures);

        if result != StateChangeReturn::Failure && from != target {
            self.inner.lock().enter(target);
            trace!(bin = %self.name, %transition, "state committed");
            self.emit_element(&ElementEvent::StateChanged {
                old: from,
                new: target,
            });
        }

        if let Some(interceptor) = interceptor {
            interceptor.after_change(
                transition,
                &StateChangeOutcome {
                    result,
                    children: results,
                },
            );
        }
        result
    }

    fn query_position(&self) -> Option<ClockTime> {
        let inner = self.inner.lock();
        if !inner.position_available || !inner.state.is_playing_capable() {
            return None;
        }
        Some(inner.position())
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
        self.emit_element(&ElementEvent::PropertyChanged {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn send_event(&self, event: Event) -> bool {
        let children = {
            let mut inner = self.inner.lock();
            if let Event::Seek { start, .. } = &event {
                inner.base = *start;
                if inner.playing_since.is_some() {
                    inner.playing_since = Some(Instant::now());
                }
            }
            inner.received.push(event.clone());
            inner.children.clone()
        };
        for child in &children {
            child.send_event(event.clone());
        }
        if matches!(event, Event::Eos) {
            self.emit_element(&ElementEvent::Eos);
        }
        true
    }

    fn connect_events(&self, handler: ElementHandler) -> Subscription {
        self.element_handlers.connect(handler)
    }

    fn as_bin(self: Arc<Self>) -> Option<Arc<dyn Bin>> {
        Some(self)
    }
}

impl Bin for SimBin {
    fn children(&self) -> Vec<Arc<dyn Element>> {
        self.inner.lock().children.clone()
    }

    fn contains(&self, id: ElementId) -> bool {
        self.inner.lock().children.iter().any(|c| c.id() == id)
    }

    fn connect_children(&self, handler: ChildHandler) -> Subscription {
        self.child_handlers.connect(handler)
    }

    fn install_interceptor(&self, interceptor: Arc<dyn StateInterceptor>) -> Result<Subscription> {
        let mut slot = self.interceptor.lock();
        if slot.is_some() {
            return Err(GraphError::InterceptorInstalled(self.name.clone()));
        }
        let id = SubscriptionId::next();
        *slot = Some((id, interceptor));

        let weak = self.self_weak.clone();
        Ok(Subscription::new(id, move || {
            if let Some(bin) = weak.upgrade() {
                let mut slot = bin.interceptor.lock();
                if matches!(slot.as_ref(), Some((s, _)) if *s == id) {
                    *slot = None;
                }
            }
        }))
    }

    fn as_element(self: Arc<Self>) -> Arc<dyn Element> {
        self
    }
}

impl fmt::Debug for SimBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBin")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
