//! # Trace Event Model
//!
//! Defines the wire-level vocabulary shared by every `frametrace` component: the
//! three event shapes the trace viewer understands (duration begin, duration end,
//! instant) plus the small value types they carry.
//!
//! The model is deliberately serialization-agnostic. The exporter in the main
//! crate maps each variant onto a flat JSON record; nothing here knows about JSON.
//!
//! ## Key Types
//!
//! - [`TraceEvent`] - Closed sum of the three event shapes
//! - [`Timestamp`] - Wall-clock instant in nanoseconds since the Unix epoch
//! - [`Tid`] / [`Pid`] - Logical thread id and process id stamped on every event
//! - [`ArgValue`] / [`Args`] - Metadata attached to begin events
//!
//! ## Ordering
//!
//! For a given [`Tid`], begin and end events must be well-nested and their
//! timestamps non-decreasing. Nothing is promised across different thread ids.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Identity Types
// ============================================================================

/// Logical thread id (1, 2, 3, ...)
///
/// Assigned densely in first-seen order by the session coordinator. This is NOT
/// the OS thread id; the trace viewer only needs distinct small numbers per track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// Process id of the running process.
    #[must_use]
    pub fn current() -> Self {
        Pid(std::process::id())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

// ============================================================================
// Time
// ============================================================================

/// Timestamp in nanoseconds since the Unix epoch
///
/// Nanoseconds are the native unit everywhere inside the workspace; conversion
/// to the viewer's microseconds happens only at serialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time.
    ///
    /// A clock set before the epoch reads as zero.
    #[must_use]
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        Timestamp(nanos)
    }

    /// Timestamp `offset` after this one (saturating).
    #[must_use]
    pub fn offset_by(self, offset: Duration) -> Self {
        let nanos = u64::try_from(offset.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later.
    #[must_use]
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Convert to microseconds, the trace viewer's unit.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_micros(self) -> f64 {
        self.0 as f64 / 1_000.0
    }
}

impl fmt::Display for Timestamp {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0 as f64 / 1_000_000_000.0)
    }
}

// ============================================================================
// Categories and Metadata
// ============================================================================

/// Free-form event category, used by the viewer for filtering and coloring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Category(Cow<'static, str>);

impl Category {
    /// Test-level spans: profiled regions, test items, setup/teardown phases.
    pub const TEST: Category = Category(Cow::Borrowed("test"));
    /// Spans describing the harness' own work (session, collection, reporting).
    pub const HARNESS: Category = Category(Cow::Borrowed("pytest"));
    /// Call frames rendered from a recorded call tree.
    pub const RUNTIME: Category = Category(Cow::Borrowed("runtime"));

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single metadata value attached to a begin event.
///
/// Only primitives and string lists are representable in the output. Anything
/// richer must be turned into its display string before it gets here.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Float(f64),
    List(Vec<String>),
}

impl ArgValue {
    /// Coerce any displayable value to a string argument.
    pub fn display(value: &impl fmt::Display) -> Self {
        ArgValue::Str(value.to_string())
    }

    /// Coerce every item of `values` to its display string.
    pub fn display_list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        ArgValue::List(values.into_iter().map(|v| v.to_string()).collect())
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Str(s.to_owned())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Str(s)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        ArgValue::Int(i64::from(v))
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(v: Vec<String>) -> Self {
        ArgValue::List(v)
    }
}

/// Event arguments. Semantically unordered; a `BTreeMap` keeps output stable.
pub type Args = BTreeMap<String, ArgValue>;

// ============================================================================
// Events
// ============================================================================

/// Phase character identifying the event shape on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `B`: opens a duration on a thread.
    Begin,
    /// `E`: closes the innermost open duration on the same thread.
    End,
    /// `i`: a point in time with no duration.
    Instant,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Begin => "B",
            Phase::End => "E",
            Phase::Instant => "i",
        }
    }
}

/// How tall the viewer draws an instant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstantScope {
    /// Spans the whole timeline.
    Global,
    /// Spans every thread of the process.
    Process,
    /// Confined to the emitting thread's track.
    #[default]
    Thread,
}

impl InstantScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            InstantScope::Global => "g",
            InstantScope::Process => "p",
            InstantScope::Thread => "t",
        }
    }
}

/// Opens a duration on `tid`.
#[derive(Debug, Clone, PartialEq)]
pub struct BeginDuration {
    pub name: String,
    pub category: Category,
    pub timestamp: Timestamp,
    pub tid: Tid,
    pub pid: Pid,
    pub args: Args,
}

/// Closes the innermost open duration on `tid`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndDuration {
    pub timestamp: Timestamp,
    pub tid: Tid,
    pub pid: Pid,
}

/// A point-in-time marker.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantEvent {
    pub name: String,
    pub timestamp: Timestamp,
    pub tid: Tid,
    pub pid: Pid,
    pub scope: InstantScope,
}

/// One record of the Trace Event Format.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    BeginDuration(BeginDuration),
    EndDuration(EndDuration),
    Instant(InstantEvent),
}

impl TraceEvent {
    /// Begin event without arguments.
    pub fn begin(
        name: impl Into<String>,
        category: Category,
        timestamp: Timestamp,
        pid: Pid,
        tid: Tid,
    ) -> Self {
        Self::begin_with_args(name, category, timestamp, pid, tid, Args::new())
    }

    pub fn begin_with_args(
        name: impl Into<String>,
        category: Category,
        timestamp: Timestamp,
        pid: Pid,
        tid: Tid,
        args: Args,
    ) -> Self {
        TraceEvent::BeginDuration(BeginDuration {
            name: name.into(),
            category,
            timestamp,
            tid,
            pid,
            args,
        })
    }

    #[must_use]
    pub fn end(timestamp: Timestamp, pid: Pid, tid: Tid) -> Self {
        TraceEvent::EndDuration(EndDuration { timestamp, tid, pid })
    }

    pub fn instant(
        name: impl Into<String>,
        timestamp: Timestamp,
        pid: Pid,
        tid: Tid,
        scope: InstantScope,
    ) -> Self {
        TraceEvent::Instant(InstantEvent {
            name: name.into(),
            timestamp,
            tid,
            pid,
            scope,
        })
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            TraceEvent::BeginDuration(_) => Phase::Begin,
            TraceEvent::EndDuration(_) => Phase::End,
            TraceEvent::Instant(_) => Phase::Instant,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        match self {
            TraceEvent::BeginDuration(e) => e.timestamp,
            TraceEvent::EndDuration(e) => e.timestamp,
            TraceEvent::Instant(e) => e.timestamp,
        }
    }

    #[must_use]
    pub fn tid(&self) -> Tid {
        match self {
            TraceEvent::BeginDuration(e) => e.tid,
            TraceEvent::EndDuration(e) => e.tid,
            TraceEvent::Instant(e) => e.tid,
        }
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        match self {
            TraceEvent::BeginDuration(e) => e.pid,
            TraceEvent::EndDuration(e) => e.pid,
            TraceEvent::Instant(e) => e.pid,
        }
    }

    /// Name of a begin or instant event; end events are anonymous.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            TraceEvent::BeginDuration(e) => Some(&e.name),
            TraceEvent::EndDuration(_) => None,
            TraceEvent::Instant(e) => Some(&e.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversions() {
        let ts = Timestamp(1_500_000_000);
        assert_eq!(ts.as_micros(), 1_500_000.0);
        assert_eq!(ts.to_string(), "1.500000s");
        assert_eq!(
            ts.offset_by(Duration::from_micros(3)),
            Timestamp(1_500_003_000)
        );
        assert_eq!(Timestamp(10).since(Timestamp(20)), Duration::ZERO);
    }

    #[test]
    fn test_phase_and_scope_wire_values() {
        assert_eq!(Phase::Begin.as_str(), "B");
        assert_eq!(Phase::End.as_str(), "E");
        assert_eq!(Phase::Instant.as_str(), "i");
        assert_eq!(InstantScope::default().as_str(), "t");
        assert_eq!(InstantScope::Global.as_str(), "g");
    }

    #[test]
    fn test_event_accessors() {
        let begin = TraceEvent::begin("work", Category::RUNTIME, Timestamp(5), Pid(7), Tid(2));
        assert_eq!(begin.phase(), Phase::Begin);
        assert_eq!(begin.name(), Some("work"));
        assert_eq!(begin.tid(), Tid(2));
        assert_eq!(begin.pid(), Pid(7));

        let end = TraceEvent::end(Timestamp(9), Pid(7), Tid(2));
        assert_eq!(end.name(), None);
        assert_eq!(end.timestamp(), Timestamp(9));
    }

    #[test]
    fn test_display_coercion() {
        assert_eq!(ArgValue::display(&42), ArgValue::Str("42".to_string()));
        assert_eq!(
            ArgValue::display_list([1.5, 2.0]),
            ArgValue::List(vec!["1.5".to_string(), "2".to_string()])
        );
    }
}
