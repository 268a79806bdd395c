//! Common monitor interface and the factory choosing between variants.

use std::fmt;
use std::sync::{Arc, Weak};

use pipewatch_graph::{Element, ElementId};
use pipewatch_report::{Report, Runner};
use pipewatch_scenario::Scenario;
use tracing::warn;

use crate::bin::BinMonitor;
use crate::config::MonitorConfig;
use crate::element::ElementMonitor;
use crate::error::{MonitorError, Result};
use crate::schedule::Scheduler;

/// What every monitor of a tree shares: the runner, the scheduler for
/// timers and the configuration.
#[derive(Clone)]
pub struct MonitorContext {
    runner: Weak<Runner>,
    scheduler: Arc<dyn Scheduler>,
    config: MonitorConfig,
}

impl MonitorContext {
    /// Creates a context. The runner is held weakly.
    pub fn new(runner: &Arc<Runner>, scheduler: Arc<dyn Scheduler>, config: MonitorConfig) -> Self {
        Self {
            runner: Arc::downgrade(runner),
            scheduler,
            config,
        }
    }

    /// The runner, while it is alive.
    pub fn runner(&self) -> Option<Arc<Runner>> {
        self.runner.upgrade()
    }

    /// Scheduler used for position timers.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Tree configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub(crate) fn submit(&self, report: Report) {
        match self.runner() {
            Some(runner) => runner.report(report),
            None => warn!(issue = %report.issue, reporter = %report.reporter, "runner gone, dropping report"),
        }
    }
}

impl fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorContext")
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .finish()
    }
}

/// A monitor of either kind.
#[derive(Debug, Clone)]
pub enum MonitorHandle {
    /// Wraps a leaf.
    Element(Arc<ElementMonitor>),
    /// Wraps a container.
    Bin(Arc<BinMonitor>),
}

impl MonitorHandle {
    /// Identity of the wrapped element.
    pub fn id(&self) -> ElementId {
        self.element().id()
    }

    /// Name of the wrapped element.
    pub fn name(&self) -> &str {
        match self {
            MonitorHandle::Element(m) => m.name(),
            MonitorHandle::Bin(m) => m.name(),
        }
    }

    /// The wrapped element.
    pub fn element(&self) -> &Arc<dyn Element> {
        match self {
            MonitorHandle::Element(m) => m.element(),
            MonitorHandle::Bin(m) => m.element(),
        }
    }

    /// Cancels subscriptions and timers, recursively.
    pub fn detach(&self) {
        match self {
            MonitorHandle::Element(m) => m.detach(),
            MonitorHandle::Bin(m) => m.detach(),
        }
    }

    /// False once detached.
    pub fn is_attached(&self) -> bool {
        match self {
            MonitorHandle::Element(m) => m.is_attached(),
            MonitorHandle::Bin(m) => m.is_attached(),
        }
    }

    /// Hands the tree's scenario to this monitor (and its descendants).
    pub fn set_scenario(&self, scenario: Option<Arc<Scenario>>) {
        match self {
            MonitorHandle::Element(m) => m.set_scenario(scenario),
            MonitorHandle::Bin(m) => m.set_scenario(scenario),
        }
    }

    /// Scenario currently held.
    pub fn scenario(&self) -> Option<Arc<Scenario>> {
        match self {
            MonitorHandle::Element(m) => m.scenario(),
            MonitorHandle::Bin(m) => m.scenario(),
        }
    }

    /// Number of notifications this monitor has handled.
    pub fn callbacks_fired(&self) -> u64 {
        match self {
            MonitorHandle::Element(m) => m.callbacks_fired(),
            MonitorHandle::Bin(m) => m.callbacks_fired(),
        }
    }

    /// The bin monitor, for container children.
    pub fn as_bin(&self) -> Option<&Arc<BinMonitor>> {
        match self {
            MonitorHandle::Bin(m) => Some(m),
            MonitorHandle::Element(_) => None,
        }
    }
}

/// Wraps `element` as a [`BinMonitor`] when it is a container the
/// runner's policy lets the tree recurse into at `depth`, and as an
/// [`ElementMonitor`] otherwise.
pub(crate) fn create_monitor(
    element: Arc<dyn Element>,
    ctx: &MonitorContext,
    parent: Option<&BinMonitor>,
    depth: usize,
) -> Result<MonitorHandle> {
    let runner = ctx.runner().ok_or(MonitorError::RunnerGone)?;
    let name = element.name();
    match Arc::clone(&element).as_bin() {
        Some(bin) if runner.policy().should_recurse(&name, depth) => {
            BinMonitor::create(bin, ctx, parent, depth).map(MonitorHandle::Bin)
        }
        _ => ElementMonitor::create(element, ctx, parent).map(MonitorHandle::Element),
    }
}
