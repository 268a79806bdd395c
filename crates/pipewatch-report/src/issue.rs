//! # Issue Catalog
//!
//! Every problem a monitor can report has a stable [`IssueId`] with a
//! default [`ReportLevel`], a one-line summary, an optional longer
//! description and the [`ReportArea`] it belongs to.
//!
//! | Family | Examples |
//! |--------|----------|
//! | buffer | `buffer::before-segment`, `buffer::after-eos` |
//! | caps | `caps::is-missing-field` |
//! | event | `event::newsegment-not-pushed`, `event::seek-not-handled` |
//! | state | `state::change-failure`, `state::child-failure`, `state::timeout` |
//! | monitor | `monitor::duplicate`, `monitor::creation-failure` |
//! | query | `query::position-superior-duration` |
//! | scenario | `scenario::not-ended`, `scenario::execution-error` |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a report. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    /// Must be fixed.
    Critical,
    /// Should be fixed.
    Warning,
    /// Worth a look.
    Issue,
    /// Recorded but never counted.
    Ignore,
}

impl ReportLevel {
    /// Lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            ReportLevel::Critical => "critical",
            ReportLevel::Warning => "warning",
            ReportLevel::Issue => "issue",
            ReportLevel::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Functional area an issue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportArea {
    /// Event handling.
    Event,
    /// Buffer flow.
    Buffer,
    /// Queries.
    Query,
    /// Caps negotiation.
    Caps,
    /// Seeking.
    Seek,
    /// State changes.
    State,
    /// Monitor tree structure.
    Structure,
    /// Output file checks.
    FileCheck,
    /// Errors while running.
    RunError,
    /// Scenario execution.
    Scenario,
    /// Anything else.
    Other,
}

impl ReportArea {
    /// Kebab-case name.
    pub const fn name(self) -> &'static str {
        match self {
            ReportArea::Event => "event",
            ReportArea::Buffer => "buffer",
            ReportArea::Query => "query",
            ReportArea::Caps => "caps",
            ReportArea::Seek => "seek",
            ReportArea::State => "state",
            ReportArea::Structure => "structure",
            ReportArea::FileCheck => "file-check",
            ReportArea::RunError => "run-error",
            ReportArea::Scenario => "scenario",
            ReportArea::Other => "other",
        }
    }
}

impl fmt::Display for ReportArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Issue {
    /// Identity
    pub id: IssueId,
    /// Default severity
    pub default_level: ReportLevel,
    /// Area
    pub area: ReportArea,
    /// One-line summary
    pub summary: &'static str,
    /// Longer explanation
    pub description: Option<&'static str>,
}

macro_rules! issues {
    ($( $variant:ident => ($key:literal, $level:ident, $area:ident, $summary:literal, $desc:expr) ),+ $(,)?) => {
        /// Stable identity of every reportable issue.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum IssueId {
            $(
                #[doc = $summary]
                $variant,
            )+
        }

        impl IssueId {
            /// Every known issue, in catalog order.
            pub const ALL: &'static [IssueId] = &[$(IssueId::$variant),+];

            /// Stable string key, e.g. `state::change-failure`.
            pub const fn key(self) -> &'static str {
                match self {
                    $(IssueId::$variant => $key,)+
                }
            }

            /// Full catalog entry.
            pub const fn issue(self) -> Issue {
                match self {
                    $(IssueId::$variant => Issue {
                        id: IssueId::$variant,
                        default_level: ReportLevel::$level,
                        area: ReportArea::$area,
                        summary: $summary,
                        description: $desc,
                    },)+
                }
            }
        }
    };
}

issues! {
    BufferBeforeSegment => ("buffer::before-segment", Warning, Buffer,
        "buffer was received before a segment",
        Some("in push mode, a segment event must be received before a buffer")),
    BufferIsOutOfSegment => ("buffer::is-out-of-segment", Issue, Buffer,
        "buffer is out of the segment range",
        Some("buffer being pushed is out of the current segment's start-stop range, so it is going to be discarded downstream without any use")),
    BufferTimestampOutOfReceivedRange => ("buffer::timestamp-out-of-received-range", Warning, Buffer,
        "buffer timestamp is out of the received buffer timestamps' range",
        Some("a buffer leaving an element should have its timestamps in the range of the received buffers timestamps")),
    FirstBufferRunningTimeIsNotZero => ("buffer::first-buffer-running-time-is-not-zero", Warning, Buffer,
        "first buffer's running time isn't 0",
        Some("the first buffer's received running time is expected to be 0")),
    WrongFlowReturn => ("buffer::wrong-flow-return", Critical, Buffer,
        "flow return from pad push doesn't match expected value",
        Some("flow return from a 1:1 sink/src pad element is as simple as returning what downstream returned; elements with multiple src pads should combine flow returns")),
    BufferAfterEos => ("buffer::after-eos", Issue, Buffer,
        "buffer was received after EOS",
        Some("a pad shouldn't receive any more buffers after it gets EOS")),
    CapsIsMissingField => ("caps::is-missing-field", Issue, Caps,
        "caps is missing a required field for its type",
        Some("some caps types are expected to contain a set of basic fields, e.g. raw video should have width, height, framerate and pixel-aspect-ratio")),
    CapsFieldHasBadType => ("caps::field-has-bad-type", Warning, Caps,
        "caps field has an unexpected type",
        Some("some common caps fields should always use the same expected types")),
    CapsExpectedFieldNotFound => ("caps::expected-field-not-found", Warning, Caps,
        "caps expected field wasn't present",
        Some("fields set on a sink pad caps should be propagated downstream when it makes sense to do so")),
    GetCapsNotProxyingFields => ("caps::get-caps-not-proxying-fields", Critical, Caps,
        "getcaps function isn't proxying downstream fields correctly",
        Some("elements should set downstream caps restrictions on their caps when replying to upstream caps queries")),
    CapsFieldUnexpectedValue => ("caps::field-unexpected-value", Critical, Caps,
        "a field in caps has an unexpected value",
        Some("fields set on a sink pad should be propagated downstream via set caps")),
    EventNewsegmentNotPushed => ("event::newsegment-not-pushed", Warning, Event,
        "new segment event wasn't propagated downstream",
        Some("segments received from upstream should be pushed downstream")),
    SerializedEventWasntPushedInTime => ("event::serialized-event-wasnt-pushed-in-time", Warning, Event,
        "a serialized event received should be pushed in the same 'time' as it was received",
        Some("serialized events should be pushed in the same order they are received and serialized with buffers")),
    EventHasWrongSeqnum => ("event::has-wrong-seqnum", Issue, Event,
        "events that are part of the same pipeline 'operation' should have the same seqnum",
        Some("when events/messages are created from another event/message, they should carry the original seqnum")),
    EventSerializedOutOfOrder => ("event::serialized-out-of-order", Warning, Event,
        "a serialized event received should be pushed in the same order as it was received",
        Some("serialized events should be pushed in the same order they are received")),
    EventNewSegmentMismatch => ("event::new-segment-mismatch", Warning, Event,
        "a new segment event has different value than the received one",
        Some("when receiving a new segment, an element should push an equivalent segment downstream")),
    EventFlushStartUnexpected => ("event::flush-start-unexpected", Warning, Event,
        "received an unexpected flush start event", None),
    EventFlushStopUnexpected => ("event::flush-stop-unexpected", Warning, Event,
        "received an unexpected flush stop event", None),
    EventCapsDuplicate => ("event::caps-duplicate", Warning, Event,
        "received the same caps twice", None),
    EventSeekNotHandled => ("event::seek-not-handled", Critical, Seek,
        "seek event wasn't handled", None),
    EventSeekResultPositionWrong => ("event::seek-result-position-wrong", Critical, Seek,
        "position after a seek is wrong", None),
    StateChangeFailure => ("state::change-failure", Critical, State,
        "state change failed", None),
    StateChangeChildFailure => ("state::child-failure", Critical, State,
        "container reported success while a child failed its state change",
        Some("a container must not report a successful state change when one of its children failed the same transition")),
    StateChangeTimeout => ("state::timeout", Critical, State,
        "children did not reach the requested state in time",
        Some("after a container state change every child is expected to settle on the requested state within the consistency window")),
    DuplicateMonitor => ("monitor::duplicate", Warning, Structure,
        "element is already monitored",
        Some("a child appeared that is already wrapped by another monitor")),
    MonitorCreationFailure => ("monitor::creation-failure", Critical, Structure,
        "could not create a monitor for a new child", None),
    FileSizeIsZero => ("file-check::size-is-zero", Critical, FileCheck,
        "resulting file size is 0", None),
    FileSizeIncorrect => ("file-check::size-incorrect", Warning, FileCheck,
        "resulting file size wasn't within the expected values", None),
    FileDurationIncorrect => ("file-check::duration-incorrect", Warning, FileCheck,
        "resulting file duration wasn't within the expected values", None),
    FileSeekableIncorrect => ("file-check::seekable-incorrect", Warning, FileCheck,
        "resulting file wasn't seekable or not seekable as expected", None),
    FileProfileIncorrect => ("file-check::profile-incorrect", Critical, FileCheck,
        "resulting file stream profiles didn't match expected values", None),
    FileNotFound => ("file-check::not-found", Critical, FileCheck,
        "resulting file could not be found for testing", None),
    FileCheckFailure => ("file-check::check-failure", Critical, FileCheck,
        "an error occured while checking the file for conformance", None),
    FilePlaybackStartFailure => ("file-check::playback-start-failure", Critical, FileCheck,
        "an error occured while starting playback of the test file", None),
    FilePlaybackError => ("file-check::playback-error", Critical, FileCheck,
        "an error during playback of the file", None),
    FileNoStreamId => ("file-check::no-stream-id", Warning, FileCheck,
        "the discoverer found a stream that had no stream ID", None),
    AllocationFailure => ("run-error::allocation-failure", Critical, RunError,
        "a memory allocation failed during the run", None),
    MissingPlugin => ("run-error::missing-plugin", Critical, RunError,
        "a plugin is missing and prevented the run", None),
    WarningOnBus => ("run-error::warning-on-bus", Warning, RunError,
        "we got a WARNING message on the bus", None),
    ErrorOnBus => ("run-error::error-on-bus", Critical, RunError,
        "we got an ERROR message on the bus", None),
    QueryPositionSuperiorDuration => ("query::position-superior-duration", Warning, Query,
        "query position reported a value superior than what query duration returned", None),
    QueryPositionOutOfSegment => ("query::position-out-of-segment", Warning, Query,
        "query position reported a value outside of the current expected segment", None),
    ScenarioNotEnded => ("scenario::not-ended", Critical, Scenario,
        "all the actions were not executed before the program stopped", None),
    ScenarioActionExecutionError => ("scenario::execution-error", Critical, Scenario,
        "the execution of an action did not properly happen", None),
    ScenarioActionExecutionIssue => ("scenario::execution-issue", Issue, Scenario,
        "an issue happened during the execution of a scenario", None),
    LogWarning => ("run-error::log-warning", Warning, Other,
        "we got a log warning", None),
    LogCritical => ("run-error::log-critical", Warning, Other,
        "we got a log critical issue", None),
    LogIssue => ("run-error::log-issue", Issue, Other,
        "we got a log issue", None),
}

impl IssueId {
    /// Looks an issue up by its string key.
    pub fn from_key(key: &str) -> Option<IssueId> {
        Self::ALL.iter().copied().find(|id| id.key() == key)
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
