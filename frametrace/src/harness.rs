//! Test-run lifecycle tracing
//!
//! [`TestRunTracer`] turns the notifications a test harness sends while it
//! runs into trace events, and profiles the parts of the run that execute user
//! code (test bodies and fixture setup). A typical run looks like:
//!
//! ```text
//! pytest session                                   cat=pytest
//! ├── Start Collection                             cat=pytest
//! │   └── i [Item Collected] tests/test_a.py::test_one
//! └── tests/test_a.py::test_one                    cat=test
//!     ├── tmp_path          (profiled fixture setup)
//!     ├── setup             (report start..stop)
//!     ├── call              (profiled test body)
//!     ├── pytest make report                       cat=pytest
//!     └── teardown          (report start..stop)
//! ```
//!
//! Everything lands in one [`TraceCollector`], written out when the session
//! finishes if an output path is configured.

use crate::config::TraceConfig;
use crate::domain::{ConfigError, CorrelationError, FrameError, Tid, Timestamp};
use crate::export::{TraceCollector, TraceEventExporter};
use crate::profiling::{Profiler, Recorder, RecordingMode};
use anyhow::Context;
use frametrace_common::{ArgValue, Args, Category, InstantScope, TraceEvent};
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SESSION_SPAN: &str = "pytest session";
const COLLECTION_SPAN: &str = "Start Collection";
const MAKE_REPORT_SPAN: &str = "pytest make report";
const CALL_REGION: &str = "call";

/// Where a test is defined, as reported by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestLocation {
    pub file_name: String,
    pub line_number: Option<u32>,
    pub test_name: String,
}

impl TestLocation {
    pub fn new(
        file_name: impl Into<String>,
        line_number: Option<u32>,
        test_name: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            line_number,
            test_name: test_name.into(),
        }
    }

    fn to_args(&self) -> Args {
        let mut args = Args::new();
        args.insert("file_name".to_string(), ArgValue::from(self.file_name.as_str()));
        args.insert("test_name".to_string(), ArgValue::from(self.test_name.as_str()));
        if let Some(line) = self.line_number {
            args.insert("line_number".to_string(), ArgValue::display(&line));
        }
        args
    }
}

/// Phase of a single test's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPhase {
    Setup,
    Call,
    Teardown,
}

impl ReportPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReportPhase::Setup => "setup",
            ReportPhase::Call => "call",
            ReportPhase::Teardown => "teardown",
        }
    }
}

impl fmt::Display for ReportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome report of one test phase, with the harness' own timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseReport {
    pub when: ReportPhase,
    pub start: Timestamp,
    pub stop: Timestamp,
}

/// A fixture about to be set up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureDef {
    pub argname: String,
    pub argnames: Vec<String>,
    pub baseid: String,
    /// Parameter values, already turned into display strings.
    pub params: Vec<String>,
    pub scope: String,
}

impl FixtureDef {
    pub fn new(argname: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            argname: argname.into(),
            scope: scope.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_argnames<I, S>(mut self, argnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argnames = argnames.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_baseid(mut self, baseid: impl Into<String>) -> Self {
        self.baseid = baseid.into();
        self
    }

    /// Parameter values of any displayable type.
    #[must_use]
    pub fn with_params<I, T>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        self.params = params.into_iter().map(|p| p.to_string()).collect();
        self
    }

    fn to_args(&self) -> Args {
        let mut args = Args::new();
        args.insert("argnames".to_string(), ArgValue::List(self.argnames.clone()));
        args.insert("baseid".to_string(), ArgValue::from(self.baseid.as_str()));
        let params = if self.params.is_empty() {
            ArgValue::from("")
        } else {
            ArgValue::List(self.params.clone())
        };
        args.insert("params".to_string(), params);
        args.insert("scope".to_string(), ArgValue::from(self.scope.as_str()));
        args
    }
}

/// Lifecycle spans that are opened by one notification and closed by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleSpan {
    Session,
    Collection,
    Test,
}

impl LifecycleSpan {
    fn as_str(self) -> &'static str {
        match self {
            LifecycleSpan::Session => "session",
            LifecycleSpan::Collection => "collection",
            LifecycleSpan::Test => "test",
        }
    }
}

/// Pushes an end event when dropped, so a span closes on unwind too.
struct SpanEnd<'a, R: Recorder> {
    profiler: &'a Profiler<R>,
    collector: &'a TraceCollector,
    tid: Tid,
}

impl<R: Recorder> Drop for SpanEnd<'_, R> {
    fn drop(&mut self) {
        let now = self.profiler.now_on(self.tid);
        self.collector
            .push(TraceEvent::end(now, self.profiler.pid(), self.tid));
    }
}

/// Traces one test run.
pub struct TestRunTracer<R: Recorder> {
    profiler: Profiler<R>,
    collector: TraceCollector,
    exporter: TraceEventExporter,
    config: TraceConfig,
    open_spans: Mutex<HashMap<Tid, Vec<LifecycleSpan>>>,
}

impl<R: Recorder> TestRunTracer<R> {
    /// Validate `config` and set up a tracer around `recorder`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the configuration is unusable.
    pub fn new(recorder: R, config: TraceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let profiler = config.profiler(recorder);
        let collector = TraceCollector::new();
        collector.attach(&profiler);
        Ok(Self {
            profiler,
            collector,
            exporter: TraceEventExporter::new(),
            config,
            open_spans: Mutex::new(HashMap::new()),
        })
    }

    /// The profiler shared with anything else that opens regions during the
    /// run, such as wrapped route handlers.
    pub fn profiler(&self) -> &Profiler<R> {
        &self.profiler
    }

    pub fn collector(&self) -> &TraceCollector {
        &self.collector
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    fn open_spans(&self) -> MutexGuard<'_, HashMap<Tid, Vec<LifecycleSpan>>> {
        self.open_spans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, span: LifecycleSpan, name: &str, category: Category, args: Args) {
        let tid = self.profiler.current_tid();
        self.open_spans().entry(tid).or_default().push(span);
        self.collector.push(TraceEvent::begin_with_args(
            name,
            category,
            self.profiler.now_on(tid),
            self.profiler.pid(),
            tid,
            args,
        ));
    }

    fn close(&self, span: LifecycleSpan) -> Result<(), CorrelationError> {
        let tid = self.profiler.current_tid();
        {
            let mut open_spans = self.open_spans();
            let stack = open_spans.entry(tid).or_default();
            match stack.last().copied() {
                Some(open) if open == span => {
                    stack.pop();
                }
                Some(open) => {
                    return Err(CorrelationError::MismatchedSpan {
                        what: span.as_str(),
                        open: open.as_str(),
                        tid,
                    })
                }
                None => {
                    return Err(CorrelationError::MissingCorrelationData {
                        what: span.as_str(),
                        thread: tid.to_string(),
                    })
                }
            }
        }
        self.collector
            .push(TraceEvent::end(self.profiler.now_on(tid), self.profiler.pid(), tid));
        Ok(())
    }

    // ========================================================================
    // Session and collection
    // ========================================================================

    pub fn session_start(&self) {
        self.open(LifecycleSpan::Session, SESSION_SPAN, Category::HARNESS, Args::new());
    }

    /// Close the session span and, if an output path is configured, write
    /// the trace. Returns the number of events written.
    ///
    /// # Errors
    /// Fails if no session was started on this thread or the trace file
    /// cannot be written.
    pub fn session_finish(&self) -> anyhow::Result<Option<usize>> {
        self.close(LifecycleSpan::Session)?;
        let Some(path) = self.config.output() else {
            debug!(
                "No output path configured, keeping {} events in memory",
                self.collector.len()
            );
            return Ok(None);
        };
        let written = self
            .collector
            .write(&self.exporter, path)
            .with_context(|| format!("Failed to persist the trace to {}", path.display()))?;
        info!("Trace of {written} events written to {}", path.display());
        Ok(Some(written))
    }

    pub fn collection_start(&self) {
        self.open(LifecycleSpan::Collection, COLLECTION_SPAN, Category::HARNESS, Args::new());
    }

    pub fn item_collected(&self, node_id: &str) {
        let tid = self.profiler.current_tid();
        self.collector.push(TraceEvent::instant(
            format!("[Item Collected] {node_id}"),
            self.profiler.now_on(tid),
            self.profiler.pid(),
            tid,
            InstantScope::Thread,
        ));
    }

    /// # Errors
    /// Fails if collection was not started on this thread.
    pub fn collection_finish(&self) -> Result<(), CorrelationError> {
        self.close(LifecycleSpan::Collection)
    }

    // ========================================================================
    // Test running
    // ========================================================================

    pub fn test_start(&self, node_id: &str, location: &TestLocation) {
        self.open(LifecycleSpan::Test, node_id, Category::TEST, location.to_args());
    }

    /// # Errors
    /// Fails if no test was started on this thread.
    pub fn test_finish(&self) -> Result<(), CorrelationError> {
        self.close(LifecycleSpan::Test)
    }

    /// Record a setup or teardown phase with the report's own timing. The
    /// call phase is covered by [`run_test_call`](Self::run_test_call).
    pub fn phase_report(&self, report: &PhaseReport) {
        if report.when == ReportPhase::Call {
            return;
        }
        let pid = self.profiler.pid();
        let tid = self.profiler.current_tid();
        self.collector.push(TraceEvent::begin(
            report.when.as_str(),
            Category::TEST,
            report.start,
            pid,
            tid,
        ));
        self.collector.push(TraceEvent::end(report.stop, pid, tid));
    }

    /// Run a test body inside a profiled region named `call`.
    ///
    /// # Errors
    /// Returns [`FrameError`] if the body's captured call tree is malformed.
    /// The region's bracket events are recorded either way.
    pub fn run_test_call<T>(&self, is_async: bool, f: impl FnOnce() -> T) -> Result<T, FrameError> {
        let mode = RecordingMode::from_async(is_async);
        self.profiler.profile(CALL_REGION, mode, Args::new(), f)
    }

    /// Run report generation inside a `pytest make report` span.
    pub fn make_report<T>(&self, f: impl FnOnce() -> T) -> T {
        let tid = self.profiler.current_tid();
        self.collector.push(TraceEvent::begin(
            MAKE_REPORT_SPAN,
            Category::HARNESS,
            self.profiler.now_on(tid),
            self.profiler.pid(),
            tid,
        ));
        let _end = SpanEnd {
            profiler: &self.profiler,
            collector: &self.collector,
            tid,
        };
        f()
    }

    /// Run a fixture's setup inside a profiled region named after it.
    ///
    /// # Errors
    /// Returns [`FrameError`] if the setup's captured call tree is malformed.
    pub fn fixture_setup<T>(
        &self,
        fixture: &FixtureDef,
        f: impl FnOnce() -> T,
    ) -> Result<T, FrameError> {
        self.profiler.profile(
            fixture.argname.as_str(),
            RecordingMode::Sync,
            fixture.to_args(),
            f,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CallFrame, CallTree};
    use crate::profiling::ReplayRecorder;
    use std::time::Duration;

    fn tracer() -> TestRunTracer<ReplayRecorder> {
        TestRunTracer::new(ReplayRecorder::default(), TraceConfig::new()).unwrap()
    }

    fn shape(events: &[TraceEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                TraceEvent::BeginDuration(b) => format!("B {}", b.name),
                TraceEvent::EndDuration(_) => "E".to_string(),
                TraceEvent::Instant(i) => format!("i {}", i.name),
            })
            .collect()
    }

    #[test]
    fn test_full_lifecycle_event_sequence() {
        let tracer = tracer();
        let node = "tests/test_a.py::test_one";
        let t0 = Timestamp::now();

        tracer.session_start();
        tracer.collection_start();
        tracer.item_collected(node);
        tracer.collection_finish().unwrap();
        tracer.test_start(node, &TestLocation::new("tests/test_a.py", Some(3), "test_one"));
        tracer.phase_report(&PhaseReport {
            when: ReportPhase::Setup,
            start: t0,
            stop: t0.offset_by(Duration::from_micros(5)),
        });
        tracer.run_test_call(false, || {}).unwrap();
        tracer.make_report(|| {});
        tracer.phase_report(&PhaseReport {
            when: ReportPhase::Call,
            start: t0,
            stop: t0,
        });
        tracer.phase_report(&PhaseReport {
            when: ReportPhase::Teardown,
            start: t0,
            stop: t0,
        });
        tracer.test_finish().unwrap();
        assert_eq!(tracer.session_finish().unwrap(), None);

        assert_eq!(
            shape(&tracer.collector().snapshot()),
            [
                "B pytest session",
                "B Start Collection",
                &format!("i [Item Collected] {node}"),
                "E",
                &format!("B {node}"),
                "B setup",
                "E",
                "B call",
                "E",
                "B [dumping frames]",
                "E",
                "B pytest make report",
                "E",
                "B teardown",
                "E",
                "E",
                "E",
            ]
        );
    }

    #[test]
    fn test_start_carries_location_args() {
        let tracer = tracer();
        tracer.test_start("t.py::f", &TestLocation::new("t.py", Some(12), "f"));
        tracer.test_start("t.py::g", &TestLocation::new("t.py", None, "g"));

        let events = tracer.collector().snapshot();
        let TraceEvent::BeginDuration(first) = &events[0] else {
            panic!("expected a begin event");
        };
        assert_eq!(first.category, Category::TEST);
        assert_eq!(first.args["file_name"], ArgValue::from("t.py"));
        assert_eq!(first.args["test_name"], ArgValue::from("f"));
        assert_eq!(first.args["line_number"], ArgValue::from("12"));

        let TraceEvent::BeginDuration(second) = &events[1] else {
            panic!("expected a begin event");
        };
        assert!(!second.args.contains_key("line_number"));
    }

    #[test]
    fn test_phase_report_uses_report_times() {
        let tracer = tracer();
        let start = Timestamp(1_000);
        let stop = Timestamp(9_000);
        tracer.phase_report(&PhaseReport {
            when: ReportPhase::Teardown,
            start,
            stop,
        });

        let events = tracer.collector().snapshot();
        assert_eq!(events[0].timestamp(), start);
        assert_eq!(events[1].timestamp(), stop);
    }

    #[test]
    fn test_fixture_args() {
        let tracer = tracer();
        let plain = FixtureDef::new("tmp_path", "function")
            .with_argnames(["tmp_path_factory"])
            .with_baseid("tests");
        let parametrized = FixtureDef::new("backend", "module").with_params([1.5, 2.0]);

        tracer.fixture_setup(&plain, || {}).unwrap();
        tracer.fixture_setup(&parametrized, || {}).unwrap();

        let events = tracer.collector().snapshot();
        let TraceEvent::BeginDuration(first) = &events[0] else {
            panic!("expected a begin event");
        };
        assert_eq!(first.name, "tmp_path");
        assert_eq!(first.category, Category::TEST);
        assert_eq!(
            first.args["argnames"],
            ArgValue::List(vec!["tmp_path_factory".to_string()])
        );
        assert_eq!(first.args["baseid"], ArgValue::from("tests"));
        assert_eq!(first.args["params"], ArgValue::from(""));
        assert_eq!(first.args["scope"], ArgValue::from("function"));

        let TraceEvent::BeginDuration(second) = &events[4] else {
            panic!("expected a begin event");
        };
        assert_eq!(second.name, "backend");
        assert_eq!(
            second.args["params"],
            ArgValue::List(vec!["1.5".to_string(), "2".to_string()])
        );
    }

    #[test]
    fn test_closing_unopened_span_fails() {
        let tracer = tracer();
        assert!(matches!(
            tracer.test_finish(),
            Err(CorrelationError::MissingCorrelationData { what: "test", .. })
        ));
        assert!(tracer.session_finish().is_err());
        assert!(tracer.collector().is_empty());
    }

    #[test]
    fn test_closing_wrong_span_fails() {
        let tracer = tracer();
        tracer.session_start();
        tracer.collection_start();
        assert!(matches!(
            tracer.test_finish(),
            Err(CorrelationError::MismatchedSpan {
                what: "test",
                open: "collection",
                ..
            })
        ));
        assert!(tracer.collection_finish().is_ok());
    }

    #[test]
    fn test_spans_are_tracked_per_thread() {
        let tracer = tracer();
        tracer.test_start("t.py::f", &TestLocation::new("t.py", None, "f"));

        let other =
            std::thread::scope(|scope| scope.spawn(|| tracer.test_finish()).join().unwrap());

        assert!(matches!(
            other,
            Err(CorrelationError::MissingCorrelationData { .. })
        ));
        assert!(tracer.test_finish().is_ok());
    }

    #[test]
    fn test_make_report_closes_on_panic() {
        let tracer = tracer();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracer.make_report(|| panic!("report hook failed"));
        }));
        assert!(result.is_err());
        assert_eq!(shape(&tracer.collector().snapshot()), ["B pytest make report", "E"]);
    }

    #[test]
    fn test_session_finish_writes_configured_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let config = TraceConfig::new().with_output(&path);
        let tracer = TestRunTracer::new(ReplayRecorder::default(), config).unwrap();

        tracer.session_start();
        tracer.run_test_call(true, || {}).unwrap();
        let written = tracer.session_finish().unwrap();

        assert_eq!(written, Some(6));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 6);
        assert_eq!(json[0]["name"], "pytest session");
        assert_eq!(json[0]["cat"], "pytest");
    }

    #[test]
    fn test_directory_output_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = TraceConfig::new().with_output(dir.path());
        let result = TestRunTracer::new(ReplayRecorder::default(), config);
        assert!(matches!(result, Err(ConfigError::OutputIsDirectory(_))));
    }

    #[test]
    fn test_malformed_call_capture_is_returned() {
        let broken = CallTree::new(
            CallFrame::new("broken")
                .with_interval(Duration::from_millis(4), Duration::from_millis(1)),
        );
        let tracer = TestRunTracer::new(ReplayRecorder::new([broken]), TraceConfig::new()).unwrap();

        let result = tracer.run_test_call(false, || 7);

        assert!(matches!(result, Err(FrameError::InvertedInterval { .. })));
        assert_eq!(tracer.collector().len(), 4);
    }

    #[test]
    fn test_lifecycle_stamps_follow_region_end() {
        // A capture claiming more time than has passed on the wall clock.
        let slow = CallTree::new(
            CallFrame::new("slow").with_interval(Duration::ZERO, Duration::from_millis(50)),
        );
        let tracer = TestRunTracer::new(ReplayRecorder::new([slow]), TraceConfig::new()).unwrap();

        tracer.test_start("t.py::f", &TestLocation::new("t.py", None, "f"));
        tracer.run_test_call(false, || {}).unwrap();
        tracer.make_report(|| {});
        tracer.test_finish().unwrap();

        let events = tracer.collector().snapshot();
        assert!(events
            .windows(2)
            .all(|pair| pair[0].timestamp() <= pair[1].timestamp()));
        let region_start = events[1].timestamp();
        let test_end = events[events.len() - 1].timestamp();
        assert!(test_end >= region_start.offset_by(Duration::from_millis(50)));
    }
}
