//! # Bin Monitor
//!
//! Mirrors one container of the pipeline graph.
//!
//! ## Responsibilities
//!
//! | Concern | How |
//! |---------|-----|
//! | Structure | one child monitor per live child, kept in sync through child-added/removed notifications |
//! | State | a [`StateInterceptor`] checks every container transition (skipped when stateless); waiting for lagging children happens on the scheduler |
//! | Position | the root monitor samples position on a scheduled task while PAUSED or PLAYING |
//! | Scenario | the attached scenario is handed to every current and future descendant |
//!
//! ## Teardown
//!
//! [`BinMonitor::detach`] cancels the monitor's token (which cancels every
//! descendant's token), waits for in-flight callbacks, drops its
//! subscriptions, timer and pending consistency check, then detaches
//! children. No callback runs
//! once detaching has started.
//!
//! ## Locking
//!
//! Each monitor owns one mutex for its child list and scenario. It is
//! never held while calling into a child monitor or the scenario, so a
//! parent and a child lock are never held together. The one graph call
//! made under it is [`Bin::contains`], which containers answer without
//! emitting notifications.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use pipewatch_graph::{
    Bin, ChildEvent, ChildStateResult, Element, ElementEvent, ElementId, InterceptDecision, State,
    StateChangeOutcome, StateChangeReturn, StateInterceptor, StateTransition, Subscription,
};
use pipewatch_report::{IssueId, PositionReport, Report};
use pipewatch_scenario::{Scenario, ScenarioEvent, ScenarioTarget};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{MonitorError, Result};
use crate::handle::{create_monitor, MonitorContext, MonitorHandle};
use crate::schedule::TaskHandle;

#[derive(Default)]
struct BinInner {
    children: Vec<MonitorHandle>,
    /// Children whose monitor is being built.
    wrapping: HashSet<ElementId>,
    scenario: Option<Arc<Scenario>>,
    /// True when this monitor is the scenario's execution target.
    scenario_target: bool,
}

/// Monitor for a container.
pub struct BinMonitor {
    bin: Arc<dyn Bin>,
    element: Arc<dyn Element>,
    name: String,
    depth: usize,
    stateless: bool,
    ctx: MonitorContext,
    parent: Option<Weak<BinMonitor>>,
    inner: Mutex<BinInner>,
    subscriptions: Mutex<Vec<Subscription>>,
    position_task: Mutex<Option<TaskHandle>>,
    /// Latest deferred consistency check; replacing it cancels the old one.
    consistency_check: Mutex<Option<TaskHandle>>,
    cancel: CancellationToken,
    gate: RwLock<()>,
    /// Bumped whenever a direct child commits a state.
    epoch: Mutex<u64>,
    settled: Condvar,
    callbacks: AtomicU64,
    positions: AtomicU64,
    detached: AtomicBool,
    self_weak: Weak<BinMonitor>,
}

impl BinMonitor {
    /// Wraps a top-level container.
    ///
    /// Every current child is wrapped before this returns. Fails if the
    /// container is already monitored, in which case nothing is left
    /// subscribed.
    pub fn new(bin: Arc<dyn Bin>, ctx: &MonitorContext) -> Result<Arc<Self>> {
        Self::create(bin, ctx, None, 0)
    }

    /// Wraps `element`, which must be a container.
    pub fn for_element(element: Arc<dyn Element>, ctx: &MonitorContext) -> Result<Arc<Self>> {
        let name = element.name();
        let bin = element.as_bin().ok_or(MonitorError::NotABin(name))?;
        Self::new(bin, ctx)
    }

    pub(crate) fn create(
        bin: Arc<dyn Bin>,
        ctx: &MonitorContext,
        parent: Option<&BinMonitor>,
        depth: usize,
    ) -> Result<Arc<Self>> {
        let runner = ctx.runner().ok_or(MonitorError::RunnerGone)?;
        let element = Arc::clone(&bin).as_element();
        let name = element.name();
        if !runner.register_monitor(element.id()) {
            return Err(MonitorError::AlreadyMonitored { element: name });
        }

        let monitor = Arc::new_cyclic(|weak| Self {
            bin,
            element,
            name,
            depth,
            stateless: runner.policy().stateless(),
            ctx: ctx.clone(),
            parent: parent.map(BinMonitor::downgrade),
            inner: Mutex::new(BinInner::default()),
            subscriptions: Mutex::new(Vec::new()),
            position_task: Mutex::new(None),
            consistency_check: Mutex::new(None),
            cancel: parent.map_or_else(CancellationToken::new, BinMonitor::child_token),
            gate: RwLock::new(()),
            epoch: Mutex::new(0),
            settled: Condvar::new(),
            callbacks: AtomicU64::new(0),
            positions: AtomicU64::new(0),
            detached: AtomicBool::new(false),
            self_weak: weak.clone(),
        });

        if let Err(e) = monitor.attach() {
            warn!(bin = %monitor.name, "attach failed, rolling back: {e}");
            monitor.detach();
            return Err(e);
        }
        info!(
            bin = %monitor.name,
            depth,
            children = monitor.child_count(),
            stateless = monitor.stateless,
            "bin monitor attached"
        );
        Ok(monitor)
    }

    fn attach(&self) -> Result<()> {
        let weak = self.self_weak.clone();
        let children = self.bin.connect_children(Arc::new(move |event: &ChildEvent| {
            if let Some(monitor) = weak.upgrade() {
                monitor.on_child_event(event);
            }
        }));
        let weak = self.self_weak.clone();
        let events = self.element.connect_events(Arc::new(move |event: &ElementEvent| {
            if let Some(monitor) = weak.upgrade() {
                monitor.on_element_event(event);
            }
        }));
        let mut subscriptions = vec![children, events];
        if !self.stateless {
            let guard = Arc::new(StateGuard {
                monitor: self.self_weak.clone(),
            });
            subscriptions.push(self.bin.install_interceptor(guard)?);
        }
        self.subscriptions.lock().extend(subscriptions);

        for child in self.bin.children() {
            let id = child.id();
            match self.add_child(child) {
                Ok(_) => {}
                Err(MonitorError::AlreadyMonitored { .. }) if self.has_child(id) => {}
                Err(MonitorError::AlreadyMonitored { element }) => self.report(
                    IssueId::DuplicateMonitor,
                    format!("{element} in {} is already monitored elsewhere", self.name),
                ),
                Err(e) => return Err(e),
            }
        }

        if self.element.current_state().is_playing_capable() {
            self.start_position_timer();
        }
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> Weak<BinMonitor> {
        self.self_weak.clone()
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Name of the wrapped container.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped container.
    pub fn element(&self) -> &Arc<dyn Element> {
        &self.element
    }

    /// The wrapped container, as a bin.
    pub fn bin(&self) -> &Arc<dyn Bin> {
        &self.bin
    }

    /// Nesting depth; the root is 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True if state changes are not intercepted.
    pub fn is_stateless(&self) -> bool {
        self.stateless
    }

    /// False once detached.
    pub fn is_attached(&self) -> bool {
        !self.detached.load(Ordering::Acquire)
    }

    /// Snapshot of the child monitors, in discovery order.
    pub fn children(&self) -> Vec<MonitorHandle> {
        self.inner.lock().children.clone()
    }

    /// Number of child monitors.
    pub fn child_count(&self) -> usize {
        self.inner.lock().children.len()
    }

    /// True if `id` has a child monitor here.
    pub fn has_child(&self, id: ElementId) -> bool {
        self.inner.lock().children.iter().any(|c| c.id() == id)
    }

    /// Child monitor for `id`.
    pub fn child(&self, id: ElementId) -> Option<MonitorHandle> {
        self.inner
            .lock()
            .children
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Finds a monitor by element name anywhere in this subtree.
    pub fn find_monitor(&self, name: &str) -> Option<MonitorHandle> {
        for child in self.children() {
            if child.name() == name {
                return Some(child);
            }
            if let Some(found) = child.as_bin().and_then(|b| b.find_monitor(name)) {
                return Some(found);
            }
        }
        None
    }

    /// Number of notifications handled by this monitor.
    pub fn callbacks_fired(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// Number of position reports emitted.
    pub fn positions_reported(&self) -> u64 {
        self.positions.load(Ordering::Relaxed)
    }

    /// True while the position timer is scheduled.
    pub fn has_position_timer(&self) -> bool {
        self.position_task.lock().is_some()
    }

    /// Scenario currently held.
    pub fn scenario(&self) -> Option<Arc<Scenario>> {
        self.inner.lock().scenario.clone()
    }

    /// Attaches `scenario` with this monitor as its execution target, and
    /// hands it to every current and future descendant.
    pub fn attach_scenario(&self, scenario: Arc<Scenario>) {
        let target: Weak<dyn ScenarioTarget> = self.self_weak.clone();
        scenario.attach_target(target);
        self.inner.lock().scenario_target = true;
        self.set_scenario(Some(Arc::clone(&scenario)));
        debug!(bin = %self.name, scenario = %scenario.name(), "scenario attached");
    }

    /// Releases the scenario here and in every descendant.
    pub fn detach_scenario(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            let was_target = std::mem::take(&mut inner.scenario_target);
            inner.scenario.clone().filter(|_| was_target)
        };
        if let Some(scenario) = previous {
            scenario.detach_target();
        }
        self.set_scenario(None);
    }

    /// Sets or clears the scenario for this subtree.
    pub fn set_scenario(&self, scenario: Option<Arc<Scenario>>) {
        let children = {
            let mut inner = self.inner.lock();
            inner.scenario = scenario.clone();
            inner.children.clone()
        };
        for child in children {
            child.set_scenario(scenario.clone());
        }
    }

    /// Stops all callbacks, then detaches every descendant. Blocks until
    /// in-flight callbacks of this monitor return. Idempotent.
    ///
    /// Must not be called from one of this monitor's own callbacks.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        {
            let _epoch = self.epoch.lock();
            self.settled.notify_all();
        }
        drop(self.gate.write());

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        drop(subscriptions);
        drop(self.position_task.lock().take());
        drop(self.consistency_check.lock().take());

        let (children, scenario, was_target) = {
            let mut inner = self.inner.lock();
            (
                std::mem::take(&mut inner.children),
                inner.scenario.take(),
                std::mem::take(&mut inner.scenario_target),
            )
        };
        for child in &children {
            child.detach();
        }
        if let (Some(scenario), true) = (scenario, was_target) {
            scenario.detach_target();
        }
        if let Some(runner) = self.ctx.runner() {
            runner.unregister_monitor(self.element.id());
        }
        debug!(bin = %self.name, children = children.len(), "bin monitor detached");
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

    /// Passes a report up the tree to the runner.
    pub(crate) fn raise(&self, report: Report) {
        match self.parent.as_ref().and_then(Weak::upgrade) {
            Some(parent) => parent.raise(report),
            None => self.ctx.submit(report),
        }
    }

    fn report(&self, issue: IssueId, message: impl Into<String>) {
        self.raise(Report::new(issue, &self.name, message).with_element(self.element.id()));
    }

    fn forward(&self, event: ScenarioEvent) {
        let scenario = self.inner.lock().scenario.clone();
        if let Some(scenario) = scenario {
            scenario.notify(event);
        }
    }

    pub(crate) fn child_state_changed(&self) {
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.settled.notify_all();
    }

    /// Wraps `child` unless it already has a monitor here, is being
    /// wrapped by another call, or has left the container by the time its
    /// monitor is built. Returns whether a monitor was installed.
    fn add_child(&self, child: Arc<dyn Element>) -> Result<bool> {
        let id = child.id();
        {
            let mut inner = self.inner.lock();
            if inner.children.iter().any(|c| c.id() == id) || !inner.wrapping.insert(id) {
                return Ok(false);
            }
        }
        let created = create_monitor(Arc::clone(&child), &self.ctx, Some(self), self.depth + 1);

        let (monitor, scenario) = {
            let mut inner = self.inner.lock();
            // released under the same lock as the containment check
            inner.wrapping.remove(&id);
            let monitor = created?;
            if self.cancel.is_cancelled() || !self.bin.contains(id) {
                drop(inner);
                monitor.detach();
                debug!(bin = %self.name, child = %monitor.name(), "child left before its monitor was installed");
                return Ok(false);
            }
            inner.children.push(monitor.clone());
            (monitor, inner.scenario.clone())
        };

        trace!(bin = %self.name, child = %monitor.name(), "child monitor installed");
        if let Some(scenario) = scenario {
            monitor.set_scenario(Some(Arc::clone(&scenario)));
            scenario.notify(ScenarioEvent::ChildAdded {
                parent: self.name.clone(),
                child: monitor.name().to_string(),
            });
        }
        Ok(true)
    }

    /// Detaches and drops the monitor for `id`. Returns whether one existed.
    fn remove_child(&self, id: ElementId) -> bool {
        let (removed, scenario) = {
            let mut inner = self.inner.lock();
            let removed = inner
                .children
                .iter()
                .position(|c| c.id() == id)
                .map(|index| inner.children.remove(index));
            (removed, inner.scenario.clone())
        };
        let Some(monitor) = removed else {
            debug!(bin = %self.name, child = %id, "removed child had no monitor");
            return false;
        };

        monitor.detach();
        trace!(bin = %self.name, child = %monitor.name(), "child monitor removed");
        if let Some(scenario) = scenario {
            scenario.notify(ScenarioEvent::ChildRemoved {
                parent: self.name.clone(),
                child: monitor.name().to_string(),
            });
        }
        true
    }

    fn on_child_event(&self, event: &ChildEvent) {
        let Some(_gate) = self.enter() else { return };
        match event {
            ChildEvent::Added(child) => {
                let id = child.id();
                let name = child.name();
                match self.add_child(Arc::clone(child)) {
                    Ok(_) => {}
                    Err(MonitorError::AlreadyMonitored { .. }) if self.has_child(id) => {}
                    Err(MonitorError::AlreadyMonitored { .. }) => self.report(
                        IssueId::DuplicateMonitor,
                        format!("{name} joined {} but is already monitored elsewhere", self.name),
                    ),
                    Err(e) => self.report(
                        IssueId::MonitorCreationFailure,
                        format!("cannot monitor {name}: {e}"),
                    ),
                }
            }
            ChildEvent::Removed(child) => {
                self.remove_child(child.id());
            }
        }
    }

    fn on_element_event(&self, event: &ElementEvent) {
        let Some(_gate) = self.enter() else { return };
        match event {
            ElementEvent::StateChanged { old, new } => {
                debug!(bin = %self.name, %old, %new, "state changed");
                if new.is_playing_capable() {
                    self.start_position_timer();
                } else {
                    self.stop_position_timer();
                }
                self.forward(ScenarioEvent::StateReached {
                    element: self.name.clone(),
                    state: *new,
                });
                if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
                    parent.child_state_changed();
                }
            }
            ElementEvent::Error { message } => {
                self.report(IssueId::ErrorOnBus, message.clone());
                self.forward(ScenarioEvent::Error {
                    element: self.name.clone(),
                    message: message.clone(),
                });
            }
            ElementEvent::Warning { message } => self.report(IssueId::WarningOnBus, message.clone()),
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

    fn start_position_timer(&self) {
        let config = self.ctx.config();
        if self.stateless || self.parent.is_some() || !config.report_positions {
            return;
        }
        let mut task = self.position_task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let weak = self.self_weak.clone();
        *task = Some(self.ctx.scheduler().schedule_repeating(
            &format!("{}-position", self.name),
            config.position_interval,
            Box::new(move || {
                if let Some(monitor) = weak.upgrade() {
                    monitor.report_position();
                }
            }),
        ));
        debug!(bin = %self.name, interval = ?config.position_interval, "position timer started");
    }

    fn stop_position_timer(&self) {
        if self.position_task.lock().take().is_some() {
            debug!(bin = %self.name, "position timer stopped");
        }
    }

    /// One position sample. Skips silently when no position is available.
    pub(crate) fn report_position(&self) {
        let Some(_gate) = self.enter() else { return };
        let Some(position) = self.element.query_position() else {
            trace!(bin = %self.name, "position unavailable");
            return;
        };
        let duration = self.element.query_duration();
        let sample = PositionReport {
            reporter: self.name.clone(),
            position,
            duration,
        };
        info!(target: "pipewatch::position", "{sample}");

        if let Some(duration) = duration.filter(|d| position > *d) {
            self.report(
                IssueId::QueryPositionSuperiorDuration,
                format!("position {position} > duration {duration}"),
            );
        }
        if let Some(runner) = self.ctx.runner() {
            runner.publish_position(sample);
        }
        self.positions.fetch_add(1, Ordering::Relaxed);

        let scenario = self.inner.lock().scenario.clone();
        if let Some(scenario) = scenario {
            scenario.on_position(position);
        }
    }

    /// Children whose committed state is not `target`.
    fn lagging_children(&self, target: State) -> Vec<String> {
        self.bin
            .children()
            .iter()
            .filter(|c| c.current_state() != target)
            .map(|c| format!("{} ({})", c.name(), c.current_state()))
            .collect()
    }

    /// Failed children that are leaves here. A failed child container
    /// with its own monitor has already reported.
    fn failure_culprits<'a>(&self, failed: &[&'a ChildStateResult]) -> Vec<&'a ChildStateResult> {
        let inner = self.inner.lock();
        failed
            .iter()
            .copied()
            .filter(|f| {
                !inner
                    .children
                    .iter()
                    .any(|c| c.id() == f.id && c.as_bin().is_some_and(|b| !b.is_stateless()))
            })
            .collect()
    }

    fn verify_transition(&self, transition: StateTransition, outcome: &StateChangeOutcome) {
        let failed: Vec<&ChildStateResult> = outcome
            .children
            .iter()
            .filter(|c| c.result == StateChangeReturn::Failure)
            .collect();

        if !failed.is_empty() {
            let culprits = self.failure_culprits(&failed);
            if culprits.is_empty() {
                debug!(bin = %self.name, %transition, "failure already reported by a nested monitor");
                return;
            }
            let names = culprits
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if outcome.result == StateChangeReturn::Failure {
                self.report(
                    IssueId::StateChangeFailure,
                    format!("{transition} failed: {names} could not change state"),
                );
            } else {
                self.report(
                    IssueId::StateChangeChildFailure,
                    format!("{transition} returned {} while {names} failed", outcome.result),
                );
            }
            return;
        }
        if outcome.result == StateChangeReturn::Failure {
            self.report(IssueId::StateChangeFailure, format!("{transition} failed"));
            return;
        }

        if self.element.current_state() != transition.to {
            debug!(bin = %self.name, %transition, "transition superseded, skipping check");
            return;
        }
        if self.lagging_children(transition.to).is_empty() {
            trace!(bin = %self.name, %transition, "children consistent");
            return;
        }
        self.defer_consistency_check(transition);
    }

    /// Hands the bounded wait for lagging children to the scheduler, so
    /// the caller of `set_state` gets its result back at once.
    fn defer_consistency_check(&self, transition: StateTransition) {
        let weak = self.self_weak.clone();
        let handle = self.ctx.scheduler().spawn_once(
            &format!("{}-consistency", self.name),
            Box::new(move || {
                let Some(monitor) = weak.upgrade() else { return };
                let Some(_gate) = monitor.enter() else { return };
                monitor.await_consistency(transition);
            }),
        );

        let mut pending = self.consistency_check.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        trace!(bin = %self.name, %transition, "consistency check deferred");
        *pending = Some(handle);
    }

    /// Waits until every child reached `transition.to`, the container
    /// moved on, or the consistency window closed.
    fn await_consistency(&self, transition: StateTransition) {
        let timeout = self.ctx.config().consistency_timeout;
        let deadline = Instant::now() + timeout;
        let mut epoch = self.epoch.lock();
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            if self.element.current_state() != transition.to {
                debug!(bin = %self.name, %transition, "transition superseded, skipping check");
                return;
            }
            if self.lagging_children(transition.to).is_empty() {
                trace!(bin = %self.name, %transition, "children consistent");
                return;
            }
            if self.settled.wait_until(&mut epoch, deadline).timed_out() {
                drop(epoch);
                if self.cancel.is_cancelled() || self.element.current_state() != transition.to {
                    return;
                }
                let lagging = self.lagging_children(transition.to);
                if !lagging.is_empty() {
                    self.report(
                        IssueId::StateChangeTimeout,
                        format!(
                            "{transition}: {} not in {} after {timeout:?}",
                            lagging.join(", "),
                            transition.to,
                        ),
                    );
                }
                return;
            }
        }
    }
}

/// Interceptor installed on the wrapped container.
struct StateGuard {
    monitor: Weak<BinMonitor>,
}

impl StateInterceptor for StateGuard {
    fn before_change(&self, transition: StateTransition) -> InterceptDecision {
        if let Some(monitor) = self.monitor.upgrade() {
            if let Some(_gate) = monitor.enter() {
                trace!(bin = %monitor.name, %transition, "state change requested");
            }
        }
        InterceptDecision::Proceed
    }

    fn after_change(&self, transition: StateTransition, outcome: &StateChangeOutcome) {
        let Some(monitor) = self.monitor.upgrade() else { return };
        let Some(_gate) = monitor.enter() else { return };
        monitor.verify_transition(transition, outcome);
    }
}

impl ScenarioTarget for BinMonitor {
    fn target_name(&self) -> String {
        self.name.clone()
    }

    fn pipeline(&self) -> Arc<dyn Element> {
        Arc::clone(&self.element)
    }

    fn resolve_element(&self, name: &str) -> Option<Arc<dyn Element>> {
        if self.name == name {
            return Some(Arc::clone(&self.element));
        }
        find_in_graph(&self.bin, name)
    }
}

/// Searches the live graph, including containers wrapped as leaves.
fn find_in_graph(bin: &Arc<dyn Bin>, name: &str) -> Option<Arc<dyn Element>> {
    for child in bin.children() {
        if child.name() == name {
            return Some(child);
        }
        if let Some(found) = Arc::clone(&child)
            .as_bin()
            .and_then(|nested| find_in_graph(&nested, name))
        {
            return Some(found);
        }
    }
    None
}

impl Drop for BinMonitor {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for BinMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinMonitor")
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("stateless", &self.stateless)
            .field("children", &self.child_count())
            .field("attached", &self.is_attached())
            .finish()
    }
}
