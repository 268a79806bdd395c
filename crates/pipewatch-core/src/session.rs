//! The validation session facade.
//!
//! A [`Session`] owns one [`Runner`], the monitor tree over a pipeline and
//! the optional scenario, and drives the run until a stop condition holds.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipewatch_graph::{Bin, ElementEvent, State, StateChangeReturn, Subscription};
use pipewatch_monitor::{BinMonitor, MonitorContext, Scheduler};
use pipewatch_report::{Report, ReportLevel, Runner};
use pipewatch_scenario::Scenario;
use serde::Serialize;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ValidateConfig;
use crate::Result;

/// How often [`Session::run`] checks its stop conditions.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Limits for [`Session::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLimits {
    /// Stop successfully after this long.
    pub duration: Option<Duration>,
    /// Give up after this long.
    pub timeout: Option<Duration>,
}

impl RunLimits {
    /// No limits: run until fatal, end of stream or scenario completion.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: None,
            timeout: None,
        }
    }

    /// Sets the run duration.
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// A report latched the runner's fatal flag.
    Fatal,
    /// Every scenario action ran, or the scenario stopped itself.
    ScenarioDone,
    /// The pipeline posted end of stream.
    Eos,
    /// The requested duration elapsed.
    DurationReached,
    /// The timeout elapsed first.
    TimedOut,
    /// The pipeline refused to start.
    StartFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Fatal => "fatal issue reported",
            StopReason::ScenarioDone => "scenario done",
            StopReason::Eos => "end of stream",
            StopReason::DurationReached => "duration reached",
            StopReason::TimedOut => "timed out",
            StopReason::StartFailed => "pipeline failed to start",
        };
        f.write_str(text)
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// Runner identity.
    pub run_id: String,
    /// Everything reported, in arrival order.
    pub reports: Vec<Report>,
    /// Scenario actions left unexecuted.
    pub actions_not_executed: usize,
    /// Whether a fatal report was seen.
    pub fatal: bool,
    /// Process exit code: non-zero when a critical was reported.
    pub exit_code: i32,
}

impl Summary {
    /// Number of reports at `level`.
    pub fn count(&self, level: ReportLevel) -> usize {
        self.reports.iter().filter(|r| r.level == level).count()
    }
}

/// A pipeline under validation.
///
/// # Example
///
/// ```rust
/// use pipewatch_core::{Session, ValidateConfig};
/// use pipewatch_graph::sim::parse_launch;
/// use pipewatch_monitor::ManualScheduler;
///
/// let pipeline = parse_launch("src ! sink")?;
/// let session = Session::new(ValidateConfig::default(), pipeline, ManualScheduler::new())?;
///
/// session.play();
/// let summary = session.finish();
/// assert_eq!(summary.exit_code, 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Session {
    config: ValidateConfig,
    pipeline: Arc<dyn Bin>,
    runner: Arc<Runner>,
    monitor: Arc<BinMonitor>,
    scenario: Option<Arc<Scenario>>,
    eos: Arc<AtomicBool>,
    _eos_watch: Subscription,
    finished: AtomicBool,
}

impl Session {
    /// Builds the runner and monitor tree over `pipeline`, and loads the
    /// configured scenario.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The runner policy is invalid
    /// - The pipeline is already monitored or cannot be intercepted
    /// - The scenario file cannot be read or parsed
    pub fn new(
        config: ValidateConfig,
        pipeline: Arc<dyn Bin>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        let runner = Runner::new(config.runner.to_runner_config()?);
        let ctx = MonitorContext::new(&runner, scheduler, config.monitor.to_monitor_config());
        let monitor = BinMonitor::new(Arc::clone(&pipeline), &ctx)?;

        let scenario = match &config.scenario.path {
            Some(path) => {
                let scenario = Scenario::load(path, &runner)?;
                monitor.attach_scenario(Arc::clone(&scenario));
                Some(scenario)
            }
            None => None,
        };

        let eos = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&eos);
        let eos_watch = pipeline.connect_events(Arc::new(move |event: &ElementEvent| {
            if matches!(event, ElementEvent::Eos) {
                flag.store(true, Ordering::Release);
            }
        }));

        info!(
            run = %runner.id(),
            pipeline = %monitor.name(),
            scenario = scenario.as_ref().map(|s| s.name()).unwrap_or("-"),
            "session created"
        );

        Ok(Self {
            config,
            pipeline,
            runner,
            monitor,
            scenario,
            eos,
            _eos_watch: eos_watch,
            finished: AtomicBool::new(false),
        })
    }

    /// Replaces the scenario with one parsed from `text`.
    pub fn load_scenario_str(&mut self, name: &str, text: &str) -> Result<()> {
        let scenario = Scenario::parse(name, text, &self.runner)?;
        self.monitor.attach_scenario(Arc::clone(&scenario));
        if let Some(previous) = self.scenario.replace(scenario) {
            previous.detach_target();
        }
        Ok(())
    }

    /// Session configuration.
    pub fn config(&self) -> &ValidateConfig {
        &self.config
    }

    /// The runner collecting reports.
    pub fn runner(&self) -> &Arc<Runner> {
        &self.runner
    }

    /// Root of the monitor tree.
    pub fn monitor(&self) -> &Arc<BinMonitor> {
        &self.monitor
    }

    /// The monitored pipeline.
    pub fn pipeline(&self) -> &Arc<dyn Bin> {
        &self.pipeline
    }

    /// Loaded scenario, if any.
    pub fn scenario(&self) -> Option<&Arc<Scenario>> {
        self.scenario.as_ref()
    }

    /// Sets the pipeline to PLAYING.
    pub fn play(&self) -> StateChangeReturn {
        let result = self.pipeline.set_state(State::Playing);
        debug!(pipeline = %self.monitor.name(), %result, "play requested");
        result
    }

    /// Sets the pipeline to NULL.
    pub fn stop(&self) -> StateChangeReturn {
        self.pipeline.set_state(State::Null)
    }

    /// First stop condition that holds, ignoring time limits.
    pub fn stop_condition(&self) -> Option<StopReason> {
        if self.runner.is_fatal() {
            Some(StopReason::Fatal)
        } else if self.eos.load(Ordering::Acquire) {
            Some(StopReason::Eos)
        } else if self.scenario.as_ref().is_some_and(|s| s.is_done()) {
            Some(StopReason::ScenarioDone)
        } else {
            None
        }
    }

    /// Plays the pipeline and waits for a stop condition or a limit.
    ///
    /// Without a scenario or limits this returns only on a fatal report
    /// or end of stream.
    pub async fn run(&self, limits: RunLimits) -> StopReason {
        if self.play() == StateChangeReturn::Failure {
            warn!(pipeline = %self.monitor.name(), "pipeline refused to play");
            return StopReason::StartFailed;
        }

        let started = Instant::now();
        let mut ticker = time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Some(reason) = self.stop_condition() {
                info!(%reason, "run stopped");
                return reason;
            }
            let elapsed = started.elapsed();
            if limits.duration.is_some_and(|d| elapsed >= d) {
                info!(?elapsed, "run duration reached");
                return StopReason::DurationReached;
            }
            if limits.timeout.is_some_and(|t| elapsed >= t) {
                warn!(?elapsed, "run timed out");
                return StopReason::TimedOut;
            }
        }
    }

    /// Stops the pipeline, closes the scenario and detaches the monitor
    /// tree. Safe to call more than once.
    pub fn finish(&self) -> Summary {
        let mut actions_not_executed = 0;
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.stop();
            actions_not_executed = self.scenario.as_ref().map_or(0, |s| s.finish());
            self.monitor.detach_scenario();
            self.monitor.detach();
        } else if let Some(scenario) = &self.scenario {
            actions_not_executed = scenario.pending_actions();
        }

        let summary = Summary {
            run_id: self.runner.id().to_string(),
            reports: self.runner.reports(),
            actions_not_executed,
            fatal: self.runner.is_fatal(),
            exit_code: self.runner.exit_code(),
        };
        info!(
            run = %summary.run_id,
            reports = summary.reports.len(),
            exit_code = summary.exit_code,
            "session finished"
        );
        summary
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("run", &self.runner.id())
            .field("monitor", &self.monitor)
            .field("scenario", &self.scenario.as_ref().map(|s| s.name()))
            .finish()
    }
}
