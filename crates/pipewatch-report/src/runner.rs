//! The runner: collects reports from the whole monitor tree.

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use pipewatch_graph::ElementId;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::issue::{IssueId, ReportLevel};
use crate::policy::MonitorPolicy;
use crate::report::{FatalFlags, PositionReport, Report};

/// Capacity of the position broadcast channel.
const POSITION_CHANNEL_CAPACITY: usize = 256;

/// Runner configuration.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Levels that latch the fatal flag.
    pub fatal: FatalFlags,
    /// Monitor-creation policy.
    pub policy: MonitorPolicy,
}

/// Central collector for validation reports.
///
/// Monitors hold the runner weakly and push [`Report`]s into it. The
/// runner also keeps the registry of monitored elements, used to refuse
/// wrapping the same element twice, and fans out [`PositionReport`]s.
#[derive(Debug)]
pub struct Runner {
    id: Uuid,
    config: RunnerConfig,
    started: Instant,
    reports: Mutex<Vec<Report>>,
    monitored: Mutex<HashSet<ElementId>>,
    positions: broadcast::Sender<PositionReport>,
    fatal: AtomicBool,
}

impl Runner {
    /// Creates a runner.
    pub fn new(config: RunnerConfig) -> Arc<Self> {
        let (positions, _) = broadcast::channel(POSITION_CHANNEL_CAPACITY);
        let runner = Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            started: Instant::now(),
            reports: Mutex::new(Vec::new()),
            monitored: Mutex::new(HashSet::new()),
            positions,
            fatal: AtomicBool::new(false),
        });
        info!(run = %runner.id, "runner created");
        runner
    }

    /// Unique id of this run.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Monitor-creation policy.
    pub fn policy(&self) -> &MonitorPolicy {
        &self.config.policy
    }

    /// Records a report, stamping it with the time since the run started.
    pub fn report(&self, mut report: Report) {
        report.timestamp = self.started.elapsed();

        match report.level {
            ReportLevel::Critical => error!(
                issue = %report.issue, reporter = %report.reporter,
                "{}", report.message
            ),
            ReportLevel::Warning => warn!(
                issue = %report.issue, reporter = %report.reporter,
                "{}", report.message
            ),
            ReportLevel::Issue => info!(
                issue = %report.issue, reporter = %report.reporter,
                "{}", report.message
            ),
            ReportLevel::Ignore => {}
        }

        if self.config.fatal.is_fatal(report.level) && !self.fatal.swap(true, Ordering::AcqRel) {
            error!(issue = %report.issue, "fatal report received, run should stop");
        }
        self.reports.lock().push(report);
    }

    /// Shorthand for [`report`](Self::report) with a fresh [`Report`].
    pub fn report_issue(&self, issue: IssueId, reporter: &str, message: impl Into<String>) {
        self.report(Report::new(issue, reporter, message));
    }

    /// All reports so far, oldest first.
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Reports for one issue.
    pub fn reports_for(&self, issue: IssueId) -> Vec<Report> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.issue == issue)
            .cloned()
            .collect()
    }

    /// Number of reports at exactly `level`.
    pub fn count_level(&self, level: ReportLevel) -> usize {
        self.reports.lock().iter().filter(|r| r.level == level).count()
    }

    /// True once a fatal report was received.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// Process exit code: non-zero when any critical was reported.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.count_level(ReportLevel::Critical) > 0)
    }

    /// Claims `id` for a new monitor. Returns false if already monitored.
    pub fn register_monitor(&self, id: ElementId) -> bool {
        self.monitored.lock().insert(id)
    }

    /// Releases a claim made by [`register_monitor`](Self::register_monitor).
    pub fn unregister_monitor(&self, id: ElementId) {
        self.monitored.lock().remove(&id);
    }

    /// True if some monitor currently wraps `id`.
    pub fn is_monitored(&self, id: ElementId) -> bool {
        self.monitored.lock().contains(&id)
    }

    /// Number of live monitors.
    pub fn monitor_count(&self) -> usize {
        self.monitored.lock().len()
    }

    /// Publishes a position sample. Never blocks.
    pub fn publish_position(&self, report: PositionReport) {
        // No receivers is fine
        let _ = self.positions.send(report);
    }

    /// Subscribes to position samples.
    pub fn subscribe_positions(&self) -> broadcast::Receiver<PositionReport> {
        self.positions.subscribe()
    }

    /// Writes every report followed by per-level totals.
    pub fn print_summary(&self, out: &mut impl Write) -> io::Result<()> {
        let reports = self.reports();
        writeln!(out, "\n==== Got {} issues ====", reports.len())?;
        for report in &reports {
            write!(out, "{report}")?;
            writeln!(out)?;
        }
        for level in [ReportLevel::Critical, ReportLevel::Warning, ReportLevel::Issue] {
            writeln!(
                out,
                "{:>10} : {}",
                level.name(),
                reports.iter().filter(|r| r.level == level).count()
            )?;
        }
        Ok(())
    }
}
