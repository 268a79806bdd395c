//! # Integration Tests
//!
//! Monitor trees over simulated pipelines: structural sync under churn,
//! teardown, state-consistency checks, position sampling and scenario
//! propagation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use pipewatch_graph::sim::{SimBin, SimElement, TransitionMode};
use pipewatch_graph::{
    Bin, ChildEvent, ClockTime, Element, ElementHandler, ElementId, Event, GraphError,
    InterceptDecision, PropertyValue, State, StateChangeOutcome, StateChangeReturn,
    StateInterceptor, StateTransition, Subscription,
};
use pipewatch_monitor::{
    BinMonitor, ElementMonitor, ManualScheduler, MonitorConfig, MonitorContext, MonitorError,
    MonitorHandle, TokioScheduler,
};
use pipewatch_report::{IssueId, MonitorPolicy, RecursePolicy, ReportLevel, Runner, RunnerConfig};
use pipewatch_scenario::{Scenario, ScenarioEvent};

// ============================================================================
// Fixtures
// ============================================================================

/// `pipeline[ src ! dec[ parse ! decoder ] ! sink ]`
struct Graph {
    pipeline: Arc<SimBin>,
    src: Arc<SimElement>,
    dec: Arc<SimBin>,
    parse: Arc<SimElement>,
    decoder: Arc<SimElement>,
    sink: Arc<SimElement>,
}

fn graph() -> Graph {
    let pipeline = SimBin::new("pipeline");
    let src = SimElement::new("src");
    let dec = SimBin::new("dec");
    let parse = SimElement::new("parse");
    let decoder = SimElement::new("decoder");
    let sink = SimElement::new("sink");

    dec.add(parse.clone()).unwrap();
    dec.add(decoder.clone()).unwrap();
    pipeline.add(src.clone()).unwrap();
    pipeline.add(dec.clone()).unwrap();
    pipeline.add(sink.clone()).unwrap();

    Graph {
        pipeline,
        src,
        dec,
        parse,
        decoder,
        sink,
    }
}

struct Harness {
    runner: Arc<Runner>,
    scheduler: Arc<ManualScheduler>,
    ctx: MonitorContext,
}

fn harness_with(policy: MonitorPolicy) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let runner = Runner::new(RunnerConfig {
        policy,
        ..RunnerConfig::default()
    });
    let scheduler = ManualScheduler::new();
    let config = MonitorConfig::new().with_consistency_timeout(Duration::from_millis(200));
    let ctx = MonitorContext::new(&runner, scheduler.clone(), config);
    Harness {
        runner,
        scheduler,
        ctx,
    }
}

fn harness() -> Harness {
    harness_with(MonitorPolicy::default())
}

fn stateless() -> MonitorPolicy {
    MonitorPolicy::new(true, RecursePolicy::Always, &[]).unwrap()
}

fn state_reports(runner: &Runner) -> usize {
    [
        IssueId::StateChangeFailure,
        IssueId::StateChangeChildFailure,
        IssueId::StateChangeTimeout,
    ]
    .iter()
    .map(|issue| runner.reports_for(*issue).len())
    .sum()
}

/// Every monitor below `monitor`, depth first.
fn descendants(monitor: &BinMonitor) -> Vec<MonitorHandle> {
    let mut all = Vec::new();
    for child in monitor.children() {
        if let Some(bin) = child.as_bin() {
            all.extend(descendants(bin));
        }
        all.push(child);
    }
    all
}

struct Noop;

impl StateInterceptor for Noop {
    fn before_change(&self, _transition: StateTransition) -> InterceptDecision {
        InterceptDecision::Proceed
    }

    fn after_change(&self, _transition: StateTransition, _outcome: &StateChangeOutcome) {}
}

/// Leaf that leaves its container and joins it again the first time
/// something connects to its events, i.e. while its monitor is being built.
#[derive(Debug)]
struct Rejoining {
    inner: Arc<SimElement>,
    container: Weak<SimBin>,
    this: Weak<Rejoining>,
    rejoined: AtomicBool,
}

impl Rejoining {
    fn new(name: &str, container: &Arc<SimBin>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            inner: SimElement::new(name),
            container: Arc::downgrade(container),
            this: this.clone(),
            rejoined: AtomicBool::new(false),
        })
    }

    fn rejoined(&self) -> bool {
        self.rejoined.load(Ordering::SeqCst)
    }
}

impl Element for Rejoining {
    fn id(&self) -> ElementId {
        self.inner.id()
    }

    fn name(&self) -> String {
        self.inner.name()
    }

    fn current_state(&self) -> State {
        self.inner.current_state()
    }

    fn set_state(&self, target: State) -> StateChangeReturn {
        self.inner.set_state(target)
    }

    fn query_position(&self) -> Option<ClockTime> {
        self.inner.query_position()
    }

    fn query_duration(&self) -> Option<ClockTime> {
        self.inner.query_duration()
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        self.inner.property(name)
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> pipewatch_graph::Result<()> {
        self.inner.set_property(name, value)
    }

    fn send_event(&self, event: Event) -> bool {
        self.inner.send_event(event)
    }

    fn connect_events(&self, handler: ElementHandler) -> Subscription {
        let subscription = self.inner.connect_events(handler);
        if !self.rejoined.swap(true, Ordering::SeqCst) {
            if let (Some(container), Some(this)) = (self.container.upgrade(), self.this.upgrade()) {
                container.remove(self.id()).unwrap();
                container.add(this).unwrap();
            }
        }
        subscription
    }

    fn as_bin(self: Arc<Self>) -> Option<Arc<dyn Bin>> {
        None
    }
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_wraps_every_existing_child() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let ids: Vec<_> = monitor.children().iter().map(MonitorHandle::id).collect();
    assert_eq!(ids, vec![g.src.id(), g.dec.id(), g.sink.id()]);

    let dec = monitor.child(g.dec.id()).unwrap();
    let dec = dec.as_bin().expect("nested container gets a bin monitor");
    assert_eq!(dec.depth(), 1);
    assert_eq!(dec.child_count(), 2);
    assert!(dec.has_child(g.parse.id()));
    assert!(dec.has_child(g.decoder.id()));

    assert_eq!(h.runner.monitor_count(), 6);
    assert!(g.pipeline.has_interceptor());
    assert!(g.dec.has_interceptor());
}

#[test]
fn test_double_wrap_is_refused() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let err = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyMonitored { .. }));
    // the first tree is untouched
    assert_eq!(g.pipeline.child_handler_count(), 1);
    assert_eq!(h.runner.monitor_count(), 6);
}

#[test]
fn test_leaf_is_not_a_bin() {
    let h = harness();
    let err = BinMonitor::for_element(SimElement::new("lonely"), &h.ctx).unwrap_err();
    assert!(matches!(err, MonitorError::NotABin(name) if name == "lonely"));
}

#[test]
fn test_failed_construction_rolls_back() {
    let g = graph();
    let h = harness();
    let _held = g.dec.install_interceptor(Arc::new(Noop)).unwrap();

    let err = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap_err();
    assert!(matches!(
        err,
        MonitorError::Graph(GraphError::InterceptorInstalled(_))
    ));

    assert_eq!(h.runner.monitor_count(), 0);
    assert_eq!(g.pipeline.child_handler_count(), 0);
    assert_eq!(g.pipeline.handler_count(), 0);
    assert!(!g.pipeline.has_interceptor());
    assert_eq!(g.src.handler_count(), 0);
    assert_eq!(g.dec.child_handler_count(), 0);
    assert_eq!(g.dec.handler_count(), 0);
}

#[test]
fn test_recurse_never_wraps_nested_bins_as_leaves() {
    let g = graph();
    let h = harness_with(MonitorPolicy::new(false, RecursePolicy::Never, &[]).unwrap());
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let dec = monitor.child(g.dec.id()).unwrap();
    assert!(matches!(dec, MonitorHandle::Element(_)));
    assert_eq!(h.runner.monitor_count(), 4);
    assert!(!g.dec.has_interceptor());
}

#[test]
fn test_opaque_bins_are_leaves() {
    let g = graph();
    let h = harness_with(
        MonitorPolicy::new(false, RecursePolicy::Always, &["^dec$".to_string()]).unwrap(),
    );
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    assert!(monitor.child(g.dec.id()).unwrap().as_bin().is_none());
    assert!(monitor.find_monitor("decoder").is_none());
}

// ============================================================================
// Dynamic child synchronization
// ============================================================================

#[test]
fn test_added_child_gets_exactly_one_monitor() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let extra = SimElement::new("extra");
    g.pipeline.add(extra.clone()).unwrap();

    assert_eq!(monitor.child_count(), 4);
    assert!(monitor.has_child(extra.id()));
    assert_eq!(extra.handler_count(), 1);
    assert!(h.runner.reports().is_empty());
}

#[test]
fn test_added_bin_is_wrapped_recursively() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let late = SimBin::new("late");
    late.add(SimElement::new("inner")).unwrap();
    g.dec.add(late.clone()).unwrap();

    let found = monitor.find_monitor("inner").unwrap();
    assert!(found.is_attached());
    assert_eq!(monitor.find_monitor("late").unwrap().as_bin().unwrap().depth(), 2);
}

#[test]
fn test_add_then_remove_leaves_no_monitor() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let flaky = SimElement::new("flaky");
    g.pipeline.add(flaky.clone()).unwrap();
    g.pipeline.remove(flaky.id()).unwrap();

    assert_eq!(monitor.child_count(), 3);
    assert!(!h.runner.is_monitored(flaky.id()));
    assert_eq!(flaky.handler_count(), 0);
}

#[test]
fn test_child_removed_before_wrap_completes() {
    let g = graph();
    let h = harness();

    // connected first, so it runs before the monitor sees the addition
    let weak = Arc::downgrade(&g.pipeline);
    let _remover = g.pipeline.connect_children(Arc::new(move |event: &ChildEvent| {
        if let ChildEvent::Added(child) = event {
            if child.name() == "flaky" {
                if let Some(bin) = weak.upgrade() {
                    bin.remove(child.id()).unwrap();
                }
            }
        }
    }));
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let flaky = SimElement::new("flaky");
    g.pipeline.add(flaky.clone()).unwrap();

    assert!(!g.pipeline.contains(flaky.id()));
    assert_eq!(monitor.child_count(), 3);
    assert!(!h.runner.is_monitored(flaky.id()));
    assert_eq!(flaky.handler_count(), 0);
}

#[test]
fn test_removing_child_detaches_its_monitor() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let dec = monitor.child(g.dec.id()).unwrap();
    let grandchildren = dec.as_bin().unwrap().children();
    g.pipeline.remove(g.dec.id()).unwrap();

    assert!(!dec.is_attached());
    assert!(grandchildren.iter().all(|c| !c.is_attached()));
    assert_eq!(monitor.child_count(), 2);
    assert_eq!(g.dec.child_handler_count(), 0);
    assert_eq!(g.dec.handler_count(), 0);
    assert!(!g.dec.has_interceptor());
    assert_eq!(g.decoder.handler_count(), 0);
    assert!(!h.runner.is_monitored(g.decoder.id()));
}

#[test]
fn test_duplicate_child_is_reported() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let stray = SimElement::new("stray");
    let _elsewhere = ElementMonitor::new(stray.clone(), &h.ctx).unwrap();
    g.pipeline.add(stray.clone()).unwrap();

    assert!(!monitor.has_child(stray.id()));
    let reports = h.runner.reports_for(IssueId::DuplicateMonitor);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].level, ReportLevel::Warning);
}

#[test]
fn test_existing_duplicate_does_not_abort_construction() {
    let g = graph();
    let h = harness();
    let _elsewhere = ElementMonitor::new(g.sink.clone(), &h.ctx).unwrap();

    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    assert_eq!(monitor.child_count(), 2);
    assert!(!monitor.has_child(g.sink.id()));
    assert_eq!(h.runner.reports_for(IssueId::DuplicateMonitor).len(), 1);
}

#[test]
fn test_unwrappable_child_is_reported() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let guarded = SimBin::new("guarded");
    let _held = guarded.install_interceptor(Arc::new(Noop)).unwrap();
    g.pipeline.add(guarded.clone()).unwrap();

    assert!(!monitor.has_child(guarded.id()));
    assert_eq!(
        h.runner.reports_for(IssueId::MonitorCreationFailure).len(),
        1
    );
    assert!(!h.runner.is_monitored(guarded.id()));
}

#[test]
fn test_concurrent_churn_keeps_tree_in_sync() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let pipeline = Arc::clone(&g.pipeline);
            thread::spawn(move || {
                for i in 0..50 {
                    let element = SimElement::new(format!("churn-{w}-{i}"));
                    pipeline.add(element.clone()).unwrap();
                    if i % 2 == 0 {
                        pipeline.remove(element.id()).unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let live: Vec<_> = g.pipeline.children().iter().map(|c| c.id()).collect();
    assert_eq!(monitor.child_count(), live.len());
    assert!(live.iter().all(|id| monitor.has_child(*id)));
    assert_eq!(h.runner.monitor_count(), 1 + live.len() + 2);
    assert!(h.runner.reports_for(IssueId::DuplicateMonitor).is_empty());
}

#[test]
fn test_child_rejoining_while_wrapped_gets_one_monitor() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    let rejoining = Rejoining::new("rejoining", &g.pipeline);
    g.pipeline.add(rejoining.clone()).unwrap();

    assert!(rejoining.rejoined());
    assert!(g.pipeline.contains(rejoining.id()));
    assert!(monitor.has_child(rejoining.id()));
    assert_eq!(monitor.child_count(), 4);
    assert_eq!(rejoining.inner.handler_count(), 1);
    assert!(h.runner.reports_for(IssueId::DuplicateMonitor).is_empty());
    assert!(h.runner.reports().is_empty());
}

#[test]
fn test_existing_child_rejoining_during_construction_gets_one_monitor() {
    let g = graph();
    let h = harness();
    let rejoining = Rejoining::new("rejoining", &g.pipeline);
    g.pipeline.add(rejoining.clone()).unwrap();

    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    assert!(rejoining.rejoined());
    assert!(g.pipeline.contains(rejoining.id()));
    assert!(monitor.has_child(rejoining.id()));
    assert_eq!(monitor.child_count(), 4);
    assert_eq!(rejoining.inner.handler_count(), 1);
    assert!(h.runner.reports_for(IssueId::DuplicateMonitor).is_empty());
    assert!(h.runner.reports().is_empty());
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_detach_stops_every_callback() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    let all = descendants(&monitor);

    g.src.post_warning("before");
    assert_eq!(h.runner.reports().len(), 1);

    monitor.detach();
    let before: Vec<u64> = all.iter().map(MonitorHandle::callbacks_fired).collect();
    let root_before = monitor.callbacks_fired();

    g.src.post_warning("after");
    g.decoder.post_error("after");
    g.dec.post_error("after");
    g.pipeline.set_state(State::Playing);
    g.pipeline.add(SimElement::new("late")).unwrap();
    h.scheduler.tick();

    let after: Vec<u64> = all.iter().map(MonitorHandle::callbacks_fired).collect();
    assert_eq!(before, after);
    assert_eq!(monitor.callbacks_fired(), root_before);
    assert_eq!(h.runner.reports().len(), 1);
    assert!(all.iter().all(|c| !c.is_attached()));
    assert_eq!(monitor.child_count(), 0);
    assert_eq!(h.runner.monitor_count(), 0);
}

#[test]
fn test_drop_releases_subscriptions() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    g.pipeline.set_state(State::Paused);
    assert_eq!(h.scheduler.active_tasks(), 1);

    drop(monitor);

    assert_eq!(g.pipeline.child_handler_count(), 0);
    assert_eq!(g.pipeline.handler_count(), 0);
    assert!(!g.pipeline.has_interceptor());
    assert!(!g.dec.has_interceptor());
    assert_eq!(g.sink.handler_count(), 0);
    assert_eq!(g.parse.handler_count(), 0);
    assert_eq!(h.scheduler.active_tasks(), 0);
    assert_eq!(h.runner.monitor_count(), 0);
}

// ============================================================================
// State-change interception
// ============================================================================

#[test]
fn test_consistent_transition_reports_nothing() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.pipeline.set_state(State::Playing);
    g.pipeline.set_state(State::Null);
    assert!(h.runner.reports().is_empty());
}

#[test]
fn test_child_failure_reports_once() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.sink.fail_transitions_to(Some(State::Paused));
    g.pipeline.set_state(State::Paused);

    assert_eq!(state_reports(&h.runner), 1);
    let report = &h.runner.reports_for(IssueId::StateChangeFailure)[0];
    assert_eq!(report.reporter, "pipeline");
    assert!(report.message.contains("sink"));
}

#[test]
fn test_success_despite_child_failure_reports_once() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.pipeline.set_ignore_child_failures(true);
    g.src.fail_transitions_to(Some(State::Paused));
    g.pipeline.set_state(State::Paused);

    assert_eq!(state_reports(&h.runner), 1);
    assert_eq!(
        h.runner.reports_for(IssueId::StateChangeChildFailure).len(),
        1
    );
}

#[test]
fn test_nested_failure_reported_by_nearest_bin() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.decoder.fail_transitions_to(Some(State::Paused));
    g.pipeline.set_state(State::Paused);

    assert_eq!(state_reports(&h.runner), 1);
    assert_eq!(h.runner.reports()[0].reporter, "dec");
}

#[test]
fn test_stalled_child_times_out() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.sink.set_transition_mode(TransitionMode::Stalled);
    let started = Instant::now();
    assert_eq!(g.pipeline.set_state(State::Paused), StateChangeReturn::Async);

    // set_state does not wait out the window
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(state_reports(&h.runner), 0);
    assert_eq!(h.scheduler.pending_tasks(), 1);

    assert_eq!(h.scheduler.run_pending(), 1);
    assert_eq!(state_reports(&h.runner), 1);
    let report = &h.runner.reports_for(IssueId::StateChangeTimeout)[0];
    assert!(report.message.contains("sink"));
}

#[test]
fn test_detach_cancels_pending_consistency_check() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.sink.set_transition_mode(TransitionMode::Stalled);
    g.pipeline.set_state(State::Paused);
    assert_eq!(h.scheduler.pending_tasks(), 1);

    monitor.detach();
    assert_eq!(h.scheduler.pending_tasks(), 0);
    assert_eq!(h.scheduler.run_pending(), 0);
    assert_eq!(state_reports(&h.runner), 0);
}

#[test]
fn test_superseded_transition_is_not_checked() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.sink.set_transition_mode(TransitionMode::Stalled);
    g.pipeline.set_state(State::Paused);
    g.sink.set_transition_mode(TransitionMode::Immediate);
    g.pipeline.set_state(State::Ready);

    h.scheduler.run_pending();
    assert_eq!(state_reports(&h.runner), 0);
}

#[test]
fn test_slow_child_within_window_is_fine() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.sink
        .set_transition_mode(TransitionMode::Delayed(Duration::from_millis(20)));
    g.pipeline.set_state(State::Paused);
    assert_eq!(h.scheduler.pending_tasks(), 1);

    h.scheduler.run_pending();
    assert_eq!(g.sink.current_state(), State::Paused);
    assert_eq!(state_reports(&h.runner), 0);
}

#[test]
fn test_stateless_never_reports_state_issues() {
    let g = graph();
    let h = harness_with(stateless());
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    assert!(monitor.is_stateless());
    assert!(!g.pipeline.has_interceptor());

    g.sink.fail_transitions_to(Some(State::Paused));
    g.pipeline.set_state(State::Paused);
    g.pipeline.set_ignore_child_failures(true);
    g.pipeline.set_state(State::Paused);
    g.src.set_transition_mode(TransitionMode::Stalled);
    g.pipeline.set_state(State::Playing);

    assert_eq!(h.scheduler.pending_tasks(), 0);
    assert_eq!(state_reports(&h.runner), 0);
}

// ============================================================================
// Issues from elements
// ============================================================================

#[test]
fn test_bus_messages_travel_up_to_runner() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.decoder.post_error("decode failed");
    g.sink.post_warning("late buffer");

    let errors = h.runner.reports_for(IssueId::ErrorOnBus);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reporter, "decoder");
    assert_eq!(errors[0].element, Some(g.decoder.id()));
    assert_eq!(errors[0].level, ReportLevel::Critical);

    let warnings = h.runner.reports_for(IssueId::WarningOnBus);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].reporter, "sink");
}

// ============================================================================
// Position reporting
// ============================================================================

#[test]
fn test_position_timer_follows_state() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    let mut rx = h.runner.subscribe_positions();

    assert_eq!(h.scheduler.active_tasks(), 0);
    g.pipeline.set_state(State::Playing);
    // only the root samples
    assert_eq!(h.scheduler.active_tasks(), 1);

    assert_eq!(h.scheduler.tick(), 1);
    assert_eq!(monitor.positions_reported(), 1);
    let sample = rx.try_recv().unwrap();
    assert_eq!(sample.reporter, "pipeline");

    g.pipeline.set_state(State::Ready);
    assert!(!monitor.has_position_timer());
    assert_eq!(h.scheduler.tick(), 0);
}

#[test]
fn test_position_unavailable_produces_no_report() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    let mut rx = h.runner.subscribe_positions();

    g.pipeline.set_position_available(false);
    g.pipeline.set_state(State::Paused);
    assert_eq!(h.scheduler.tick(), 1);
    assert_eq!(h.scheduler.tick(), 1);

    assert_eq!(monitor.positions_reported(), 0);
    assert!(rx.try_recv().is_err());
    assert!(h.runner.reports().is_empty());
}

#[test]
fn test_position_beyond_duration_is_reported() {
    let g = graph();
    let h = harness();
    let _monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.pipeline.set_duration(Some(ClockTime::from_seconds(1)));
    g.pipeline.set_state(State::Paused);
    g.pipeline.send_event(Event::Seek {
        start: ClockTime::from_seconds(5),
        flush: true,
    });
    h.scheduler.tick();

    let reports = h.runner.reports_for(IssueId::QueryPositionSuperiorDuration);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].level, ReportLevel::Warning);
}

#[test]
fn test_stateless_root_has_no_timer() {
    let g = graph();
    let h = harness_with(stateless());
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();

    g.pipeline.set_state(State::Playing);
    assert!(!monitor.has_position_timer());
    assert_eq!(h.scheduler.active_tasks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_scheduler_drives_positions() {
    let g = graph();
    let runner = Runner::new(RunnerConfig::default());
    let scheduler = Arc::new(TokioScheduler::current().unwrap());
    let config = MonitorConfig::new().with_position_interval(Duration::from_millis(10));
    let ctx = MonitorContext::new(&runner, scheduler, config);
    let monitor = BinMonitor::new(g.pipeline.clone(), &ctx).unwrap();
    let mut rx = runner.subscribe_positions();

    g.pipeline.set_state(State::Playing);
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(monitor.positions_reported() >= 2);
    assert_eq!(rx.recv().await.unwrap().reporter, "pipeline");

    monitor.detach();
    let after = monitor.positions_reported();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(monitor.positions_reported(), after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_consistency_check_reports_after_set_state_returns() {
    let g = graph();
    let runner = Runner::new(RunnerConfig::default());
    let scheduler = Arc::new(TokioScheduler::current().unwrap());
    let config = MonitorConfig::new()
        .with_consistency_timeout(Duration::from_millis(300))
        .with_report_positions(false);
    let ctx = MonitorContext::new(&runner, scheduler, config);
    let _monitor = BinMonitor::new(g.pipeline.clone(), &ctx).unwrap();

    g.sink.set_transition_mode(TransitionMode::Stalled);
    let started = Instant::now();
    assert_eq!(g.pipeline.set_state(State::Paused), StateChangeReturn::Async);
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(runner.reports_for(IssueId::StateChangeTimeout).is_empty());

    let deadline = Instant::now() + Duration::from_secs(3);
    while runner.reports_for(IssueId::StateChangeTimeout).is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(runner.reports_for(IssueId::StateChangeTimeout).len(), 1);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

// ============================================================================
// Scenario integration
// ============================================================================

#[test]
fn test_scenario_reaches_existing_and_new_children() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    let scenario = Scenario::parse("propagation", "eos", &h.runner).unwrap();

    monitor.attach_scenario(Arc::clone(&scenario));
    assert!(scenario.has_target());
    for handle in descendants(&monitor) {
        assert!(Arc::ptr_eq(&handle.scenario().unwrap(), &scenario));
    }

    g.dec.add(SimElement::new("late")).unwrap();
    let late_bin = SimBin::new("late-bin");
    late_bin.add(SimElement::new("inner")).unwrap();
    g.pipeline.add(late_bin).unwrap();

    for name in ["late", "late-bin", "inner"] {
        let handle = monitor.find_monitor(name).unwrap();
        assert!(Arc::ptr_eq(&handle.scenario().unwrap(), &scenario));
    }
    assert!(scenario.events().contains(&ScenarioEvent::ChildAdded {
        parent: "dec".into(),
        child: "late".into(),
    }));

    monitor.detach_scenario();
    assert!(!scenario.has_target());
    assert!(descendants(&monitor).iter().all(|h| h.scenario().is_none()));
}

#[test]
fn test_scenario_actions_resolve_nested_elements() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    let scenario = Scenario::parse(
        "nested",
        "set-property, target-element-name=decoder, property-name=mode, property-value=fast\n\
         check-state, state=playing, target-element-name=parse\n\
         stop",
        &h.runner,
    )
    .unwrap();
    monitor.attach_scenario(Arc::clone(&scenario));

    g.pipeline.set_state(State::Playing);

    assert!(scenario.is_done());
    assert_eq!(
        g.decoder.property("mode"),
        Some(PropertyValue::Str("fast".into()))
    );
    assert!(h.runner.reports().is_empty());
}

#[test]
fn test_timed_scenario_runs_on_position_ticks() {
    let g = graph();
    let h = harness();
    let monitor = BinMonitor::new(g.pipeline.clone(), &h.ctx).unwrap();
    let scenario = Scenario::parse("timed", "eos, playback-time=0", &h.runner).unwrap();
    monitor.attach_scenario(Arc::clone(&scenario));

    g.pipeline.set_state(State::Playing);
    assert_eq!(scenario.pending_actions(), 1);

    h.scheduler.tick();
    assert!(scenario.is_done());
    assert!(g.pipeline.received_events().contains(&Event::Eos));
    assert!(scenario.events().contains(&ScenarioEvent::Eos {
        element: "pipeline".into()
    }));
}
