//! Leaf monitor.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use pipewatch_graph::{Element, ElementEvent, Subscription};
use pipewatch_report::{IssueId, Report};
use pipewatch_scenario::{Scenario, ScenarioEvent};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bin::BinMonitor;
use crate::error::{MonitorError, Result};
use crate::handle::MonitorContext;

/// Watches a single leaf element: state changes, errors, warnings,
/// property writes and end-of-stream.
///
/// Issues go up to the owning [`BinMonitor`], lifecycle events to the
/// tree's scenario.
pub struct ElementMonitor {
    element: Arc<dyn Element>,
    name: String,
    ctx: MonitorContext,
    parent: Option<Weak<BinMonitor>>,
    scenario: Mutex<Option<Arc<Scenario>>>,
    subscription: Mutex<Option<Subscription>>,
    cancel: CancellationToken,
    gate: RwLock<()>,
    callbacks: AtomicU64,
    detached: AtomicBool,
}

impl ElementMonitor {
    /// Wraps a top-level leaf element.
    pub fn new(element: Arc<dyn Element>, ctx: &MonitorContext) -> Result<Arc<Self>> {
        Self::create(element, ctx, None)
    }

    pub(crate) fn create(
        element: Arc<dyn Element>,
        ctx: &MonitorContext,
        parent: Option<&BinMonitor>,
    ) -> Result<Arc<Self>> {
        let runner = ctx.runner().ok_or(MonitorError::RunnerGone)?;
        let name = element.name();
        if !runner.register_monitor(element.id()) {
            return Err(MonitorError::AlreadyMonitored { element: name });
        }

        let monitor = Arc::new(Self {
            element: Arc::clone(&element),
            name,
            ctx: ctx.clone(),
            parent: parent.map(BinMonitor::downgrade),
            scenario: Mutex::new(None),
            subscription: Mutex::new(None),
            cancel: parent.map_or_else(CancellationToken::new, BinMonitor::child_token),
            gate: RwLock::new(()),
            callbacks: AtomicU64::new(0),
            detached: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&monitor);
        let subscription = element.connect_events(Arc::new(move |event: &ElementEvent| {
            if let Some(monitor) = weak.upgrade() {
                monitor.on_event(event);
            }
        }));
        *monitor.subscription.lock() = Some(subscription);
        debug!(element = %monitor.name, "element monitor attached");
        Ok(monitor)
    }

    /// Name of the wrapped element.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped element.
    pub fn element(&self) -> &Arc<dyn Element> {
        &self.element
    }

    /// False once detached.
    pub fn is_attached(&self) -> bool {
        !self.detached.load(Ordering::Acquire)
    }

    /// Number of notifications handled.
    pub fn callbacks_fired(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// Sets or clears the scenario this monitor forwards events to.
    pub fn set_scenario(&self, scenario: Option<Arc<Scenario>>) {
        *self.scenario.lock() = scenario;
    }

    /// Scenario currently held.
    pub fn scenario(&self) -> Option<Arc<Scenario>> {
        self.scenario.lock().clone()
    }

    /// Stops all callbacks. Blocks until in-flight callbacks return.
    /// Idempotent.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        drop(self.gate.write());

        drop(self.subscription.lock().take());
        self.scenario.lock().take();
        if let Some(runner) = self.ctx.runner() {
            runner.unregister_monitor(self.element.id());
        }
        debug!(element = %self.name, "element monitor detached");
    }

    /// Admits a callback unless the monitor is being torn down.
    fn enter(&self) -> Option<RwLockReadGuard<'_, ()>> {
        let guard = self.gate.read_recursive();
        if self.cancel.is_cancelled() {
            return None;
        }
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        Some(guard)
    }

    fn raise(&self, report: Report) {
        match self.parent.as_ref().and_then(Weak::upgrade) {
            Some(parent) => parent.raise(report),
            None => self.ctx.submit(report),
        }
    }

    fn forward(&self, event: ScenarioEvent) {
        let scenario = self.scenario.lock().clone();
        if let Some(scenario) = scenario {
            scenario.notify(event);
        }
    }

    fn on_event(&self, event: &ElementEvent) {
        let Some(_gate) = self.enter() else { return };
        match event {
            ElementEvent::StateChanged { new, .. } => {
                self.forward(ScenarioEvent::StateReached {
                    element: self.name.clone(),
                    state: *new,
                });
                if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
                    parent.child_state_changed();
                }
            }
            ElementEvent::Error { message } => {
                self.raise(
                    Report::new(IssueId::ErrorOnBus, &self.name, message.clone())
                        .with_element(self.element.id()),
                );
                self.forward(ScenarioEvent::Error {
                    element: self.name.clone(),
                    message: message.clone(),
                });
            }
            ElementEvent::Warning { message } => self.raise(
                Report::new(IssueId::WarningOnBus, &self.name, message.clone())
                    .with_element(self.element.id()),
            ),
            ElementEvent::PropertyChanged { name, .. } => {
                self.forward(ScenarioEvent::PropertyChanged {
                    element: self.name.clone(),
                    name: name.clone(),
                })
            }
            ElementEvent::Eos => self.forward(ScenarioEvent::Eos {
                element: self.name.clone(),
            }),
        }
    }
}

impl Drop for ElementMonitor {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ElementMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementMonitor")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}
