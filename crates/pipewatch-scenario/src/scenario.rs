//! Scenario execution.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pipewatch_graph::{ClockTime, Element, Event, PropertyValue, State, StateChangeReturn};
use pipewatch_report::{IssueId, Runner};
use tracing::{debug, info, warn};

use crate::action::{parse_scenario, Action, ActionKind};
use crate::error::{Result, ScenarioError};

/// Upper bound on the lifecycle history kept by a scenario.
const MAX_EVENTS: usize = 4096;

/// What a scenario executes against.
///
/// Implemented by the monitor wrapping the top-level container.
pub trait ScenarioTarget: Send + Sync {
    /// Name of the target pipeline.
    fn target_name(&self) -> String;

    /// The pipeline itself.
    fn pipeline(&self) -> Arc<dyn Element>;

    /// Finds a live element by name anywhere below the pipeline.
    fn resolve_element(&self, name: &str) -> Option<Arc<dyn Element>>;
}

/// Lifecycle notification forwarded by the monitor tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioEvent {
    /// An element committed a state.
    StateReached {
        /// Element name
        element: String,
        /// New state
        state: State,
    },
    /// An element posted an error.
    Error {
        /// Element name
        element: String,
        /// Error text
        message: String,
    },
    /// A container gained a child.
    ChildAdded {
        /// Container name
        parent: String,
        /// Child name
        child: String,
    },
    /// A container lost a child.
    ChildRemoved {
        /// Container name
        parent: String,
        /// Child name
        child: String,
    },
    /// A property was written.
    PropertyChanged {
        /// Element name
        element: String,
        /// Property name
        name: String,
    },
    /// End of stream.
    Eos {
        /// Element name
        element: String,
    },
}

impl fmt::Display for ScenarioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioEvent::StateReached { element, state } => write!(f, "{element} reached {state}"),
            ScenarioEvent::Error { element, message } => write!(f, "{element} error: {message}"),
            ScenarioEvent::ChildAdded { parent, child } => write!(f, "{child} added to {parent}"),
            ScenarioEvent::ChildRemoved { parent, child } => {
                write!(f, "{child} removed from {parent}")
            }
            ScenarioEvent::PropertyChanged { element, name } => write!(f, "{element}.{name} changed"),
            ScenarioEvent::Eos { element } => write!(f, "{element} eos"),
        }
    }
}

enum Outcome {
    Done,
    CheckFailed(String),
}

struct TargetSlot {
    name: String,
    target: Weak<dyn ScenarioTarget>,
}

#[derive(Default)]
struct ScenarioState {
    pending: VecDeque<Action>,
    executed: usize,
    target: Option<TargetSlot>,
    playing: bool,
    position: Option<ClockTime>,
    stopped: bool,
    events: VecDeque<ScenarioEvent>,
}

impl ScenarioState {
    fn next_ready(&self) -> bool {
        if self.stopped || !self.playing {
            return false;
        }
        match self.pending.front() {
            None => false,
            Some(action) => match (action.playback_time, self.position) {
                (None, _) => true,
                (Some(at), Some(position)) => at <= position,
                (Some(_), None) => false,
            },
        }
    }
}

/// A scripted sequence of timed actions run against a pipeline.
///
/// Shared by every monitor of a tree. Only the monitor the scenario was
/// attached to acts as its [`ScenarioTarget`]; the others forward their
/// lifecycle events through [`notify`](Self::notify).
pub struct Scenario {
    name: String,
    description: BTreeMap<String, PropertyValue>,
    runner: Weak<Runner>,
    state: Mutex<ScenarioState>,
    executing: AtomicBool,
}

impl Scenario {
    /// Parses scenario text.
    pub fn parse(name: impl Into<String>, text: &str, runner: &Arc<Runner>) -> Result<Arc<Self>> {
        let parsed = parse_scenario(text)?;
        let name = name.into();
        info!(scenario = %name, actions = parsed.actions.len(), "scenario loaded");
        Ok(Arc::new(Self {
            name,
            description: parsed.description,
            runner: Arc::downgrade(runner),
            state: Mutex::new(ScenarioState {
                pending: parsed.actions.into(),
                ..ScenarioState::default()
            }),
            executing: AtomicBool::new(false),
        }))
    }

    /// Loads a scenario file. The file stem names the scenario.
    pub fn load(path: impl AsRef<Path>, runner: &Arc<Runner>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scenario".to_string());
        Self::parse(name, &text, runner)
    }

    /// Scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields of the `description` line.
    pub fn description(&self) -> &BTreeMap<String, PropertyValue> {
        &self.description
    }

    /// Makes `target` the pipeline actions run against.
    pub fn attach_target(&self, target: Weak<dyn ScenarioTarget>) {
        let name = match target.upgrade() {
            Some(t) => t.target_name(),
            None => return,
        };
        debug!(scenario = %self.name, target = %name, "target attached");
        self.state.lock().target = Some(TargetSlot { name, target });
    }

    /// Forgets the target.
    pub fn detach_target(&self) {
        self.state.lock().target = None;
    }

    /// True while a live target is attached.
    pub fn has_target(&self) -> bool {
        self.state
            .lock()
            .target
            .as_ref()
            .is_some_and(|t| t.target.strong_count() > 0)
    }

    /// Records a lifecycle event. Reaching PLAYING on the target runs the
    /// actions that have no playback time.
    pub fn notify(&self, event: ScenarioEvent) {
        {
            let mut state = self.state.lock();
            if let ScenarioEvent::StateReached { element, state: reached } = &event {
                if state.target.as_ref().is_some_and(|t| &t.name == element) {
                    state.playing = *reached == State::Playing;
                }
            }
            if state.events.len() == MAX_EVENTS {
                state.events.pop_front();
            }
            state.events.push_back(event);
        }
        self.run_ready();
    }

    /// Advances stream time and runs every action now due.
    pub fn on_position(&self, position: ClockTime) {
        self.state.lock().position = Some(position);
        self.run_ready();
    }

    /// Actions not yet executed.
    pub fn pending_actions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Actions executed so far.
    pub fn executed_actions(&self) -> usize {
        self.state.lock().executed
    }

    /// True when every action ran or a `stop` action was executed.
    pub fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.stopped || state.pending.is_empty()
    }

    /// Lifecycle events seen so far, oldest first.
    pub fn events(&self) -> Vec<ScenarioEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    /// Ends the scenario, reporting actions that never ran. Returns their
    /// count.
    pub fn finish(&self) -> usize {
        let left = {
            let mut state = self.state.lock();
            state.target = None;
            state.stopped = true;
            state.pending.len()
        };
        if left > 0 {
            self.report(
                IssueId::ScenarioNotEnded,
                format!("{left} actions were not executed"),
            );
        }
        left
    }

    fn report(&self, issue: IssueId, message: String) {
        match self.runner.upgrade() {
            Some(runner) => runner.report_issue(issue, &self.name, message),
            None => warn!(scenario = %self.name, %issue, "runner gone, dropping report"),
        }
    }

    /// Pops and executes due actions. Re-entrant calls (an action whose
    /// effect notifies back into the scenario) return immediately; the
    /// outer loop picks up what became due.
    fn run_ready(&self) {
        loop {
            if self
                .executing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            loop {
                let next = {
                    let mut state = self.state.lock();
                    if !state.next_ready() {
                        None
                    } else {
                        let target = state.target.as_ref().and_then(|t| t.target.upgrade());
                        match target {
                            Some(target) => state.pending.pop_front().map(|a| (a, target)),
                            None => None,
                        }
                    }
                };
                let Some((action, target)) = next else { break };
                self.execute(&action, target.as_ref());
            }
            self.executing.store(false, Ordering::Release);

            let ready = {
                let state = self.state.lock();
                state.next_ready() && state.target.is_some()
            };
            if !ready {
                return;
            }
        }
    }

    fn execute(&self, action: &Action, target: &dyn ScenarioTarget) {
        debug!(scenario = %self.name, %action, "executing action");
        let result = self.apply(&action.kind, target);
        {
            let mut state = self.state.lock();
            state.executed += 1;
            if matches!(action.kind, ActionKind::Stop) {
                state.stopped = true;
            }
        }
        match result {
            Ok(Outcome::Done) => {}
            Ok(Outcome::CheckFailed(message)) => self.report(
                IssueId::ScenarioActionExecutionIssue,
                format!("{action} (line {}): {message}", action.line),
            ),
            Err(e) => self.report(
                IssueId::ScenarioActionExecutionError,
                format!("{action} (line {}): {e}", action.line),
            ),
        }
    }

    fn element(target: &dyn ScenarioTarget, name: &str) -> Result<Arc<dyn Element>> {
        target
            .resolve_element(name)
            .ok_or_else(|| ScenarioError::ElementNotFound(name.to_string()))
    }

    fn apply(&self, kind: &ActionKind, target: &dyn ScenarioTarget) -> Result<Outcome> {
        match kind {
            ActionKind::Seek { start, flush } => {
                let handled = target.pipeline().send_event(Event::Seek {
                    start: *start,
                    flush: *flush,
                });
                if !handled {
                    return Err(ScenarioError::Rejected(format!("seek to {start} not handled")));
                }
                self.state.lock().position = Some(*start);
            }
            ActionKind::SetState { state } => {
                if target.pipeline().set_state(*state) == StateChangeReturn::Failure {
                    return Err(ScenarioError::Rejected(format!(
                        "pipeline refused to go to {state}"
                    )));
                }
            }
            ActionKind::SetProperty {
                target: name,
                property,
                value,
            } => {
                Self::element(target, name)?.set_property(property, value.clone())?;
            }
            ActionKind::Eos => {
                if !target.pipeline().send_event(Event::Eos) {
                    return Err(ScenarioError::Rejected("eos not handled".into()));
                }
            }
            ActionKind::CheckState { state, target: name } => {
                let element = match name {
                    Some(name) => Self::element(target, name)?,
                    None => target.pipeline(),
                };
                let current = element.current_state();
                if current != *state {
                    return Ok(Outcome::CheckFailed(format!(
                        "{} is {current}, expected {state}",
                        element.name()
                    )));
                }
            }
            ActionKind::CheckProperty {
                target: name,
                property,
                value,
            } => {
                let element = Self::element(target, name)?;
                match element.property(property) {
                    Some(actual) if values_match(&actual, value) => {}
                    Some(actual) => {
                        return Ok(Outcome::CheckFailed(format!(
                            "{name}.{property} is {actual}, expected {value}"
                        )))
                    }
                    None => {
                        return Ok(Outcome::CheckFailed(format!("{name} has no property {property}")))
                    }
                }
            }
            ActionKind::Stop => info!(scenario = %self.name, "stop requested"),
        }
        Ok(Outcome::Done)
    }
}

fn values_match(actual: &PropertyValue, expected: &PropertyValue) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => actual == expected || actual.to_string() == expected.to_string(),
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("pending", &state.pending.len())
            .field("executed", &state.executed)
            .field("playing", &state.playing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewatch_graph::sim::{SimBin, SimElement};
    use pipewatch_graph::Bin;
    use pipewatch_report::{ReportLevel, RunnerConfig};

    struct Target(Arc<SimBin>);

    impl ScenarioTarget for Target {
        fn target_name(&self) -> String {
            self.0.name()
        }

        fn pipeline(&self) -> Arc<dyn Element> {
            Arc::clone(&self.0).as_element()
        }

        fn resolve_element(&self, name: &str) -> Option<Arc<dyn Element>> {
            self.0.child_by_name(name)
        }
    }

    fn setup(text: &str) -> (Arc<Runner>, Arc<Scenario>, Arc<Target>, Arc<SimBin>) {
        let runner = Runner::new(RunnerConfig::default());
        let scenario = Scenario::parse("test", text, &runner).unwrap();
        let pipeline = SimBin::new("pipeline");
        pipeline.add(SimElement::new("sink")).unwrap();
        let target = Arc::new(Target(Arc::clone(&pipeline)));
        let weak: Weak<dyn ScenarioTarget> = Arc::downgrade(&target) as Weak<dyn ScenarioTarget>;
        scenario.attach_target(weak);
        (runner, scenario, target, pipeline)
    }

    fn playing(scenario: &Scenario) {
        scenario.notify(ScenarioEvent::StateReached {
            element: "pipeline".into(),
            state: State::Playing,
        });
    }

    #[test]
    fn test_untimed_actions_wait_for_playing() {
        let (runner, scenario, _target, pipeline) =
            setup("set-property, target-element-name=sink, property-name=volume, property-value=3");

        scenario.on_position(ClockTime::from_seconds(5));
        assert_eq!(scenario.pending_actions(), 1);

        playing(&scenario);
        assert!(scenario.is_done());
        assert_eq!(
            pipeline.child_by_name("sink").unwrap().property("volume"),
            Some(PropertyValue::Int(3))
        );
        assert!(runner.reports().is_empty());
    }

    #[test]
    fn test_timed_actions_run_in_order() {
        let (_runner, scenario, _target, _pipeline) = setup(
            "check-state, state=null, playback-time=1\n\
             check-state, state=null, playback-time=0.5\n\
             stop, playback-time=2",
        );
        playing(&scenario);
        scenario.on_position(ClockTime::from_mseconds(600));
        // file order: the 0.5s action waits behind the 1s one
        assert_eq!(scenario.executed_actions(), 0);

        scenario.on_position(ClockTime::from_mseconds(1100));
        assert_eq!(scenario.executed_actions(), 2);

        scenario.on_position(ClockTime::from_seconds(3));
        assert!(scenario.is_done());
    }

    #[test]
    fn test_failed_check_reports_issue() {
        let (runner, scenario, _target, _pipeline) = setup("check-state, state=paused");
        playing(&scenario);

        let reports = runner.reports_for(IssueId::ScenarioActionExecutionIssue);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].level, ReportLevel::Issue);
        assert!(reports[0].message.contains("expected paused"));
    }

    #[test]
    fn test_unknown_element_reports_error() {
        let (runner, scenario, _target, _pipeline) =
            setup("set-property, target-element-name=ghost, property-name=x, property-value=1");
        playing(&scenario);

        assert_eq!(
            runner.reports_for(IssueId::ScenarioActionExecutionError).len(),
            1
        );
        assert_eq!(scenario.pending_actions(), 0);
    }

    #[test]
    fn test_set_state_reenters_scenario() {
        let (runner, scenario, _target, pipeline) = setup(
            "set-state, state=paused\n\
             check-state, state=paused",
        );
        pipeline.set_state(State::Playing);
        playing(&scenario);

        // the set-state action notifies nothing here, so the check runs right after
        assert_eq!(pipeline.current_state(), State::Paused);
        assert!(scenario.is_done());
        assert!(runner.reports().is_empty());
    }

    #[test]
    fn test_finish_reports_not_ended() {
        let (runner, scenario, _target, _pipeline) = setup("eos\nstop, playback-time=10");
        playing(&scenario);
        assert_eq!(scenario.finish(), 1);

        let reports = runner.reports_for(IssueId::ScenarioNotEnded);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].level, ReportLevel::Critical);
    }

    #[test]
    fn test_no_target_runs_nothing() {
        let runner = Runner::new(RunnerConfig::default());
        let scenario = Scenario::parse("orphan", "eos", &runner).unwrap();
        playing(&scenario);
        assert_eq!(scenario.pending_actions(), 1);
        assert_eq!(scenario.events().len(), 1);
    }
}
