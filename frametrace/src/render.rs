//! Call tree → trace event rendering
//!
//! Walks the surviving roots of a filtered [`CallTree`] depth-first and emits one
//! `B` event when a frame is entered and one `E` event when it is left. Because
//! the walk is depth-first, the events of one thread are nested exactly like the
//! frames were.
//!
//! ```text
//! root [0ms..4ms]                 B root      @ start+0ms
//! └── work [1ms..3ms]     ──►     B work      @ start+1ms
//!                                 E           @ start+3ms
//!                                 E           @ start+4ms
//! ```
//!
//! Synthetic frames are bookkeeping nodes inserted by the recorder (the tree
//! root, await markers, self-time leaves). They emit nothing, but their children
//! are rendered as if they hung directly off the synthetic frame's parent.

use crate::domain::{FrameError, FrameId, Pid, Tid, Timestamp};
use crate::frame::{filter_excluded, CallTree, ExclusionRules};
use frametrace_common::{ArgValue, Args, Category, TraceEvent};
use std::collections::BTreeSet;

/// Await marker recorded while a coroutine is suspended.
pub const AWAIT_FRAME: &str = "[await]";
/// Leaf holding a frame's own time when a profiler splits it out.
pub const SELF_TIME_FRAME: &str = "[self]";
/// Time spent outside the profiled context.
pub const OUT_OF_CONTEXT_FRAME: &str = "[out-of-context]";

/// Names of frames that exist only for the recorder's bookkeeping.
///
/// Supplied by the recorder (see [`Recorder::synthetic_frames`]) since the set
/// depends on how that recorder builds its trees.
///
/// [`Recorder::synthetic_frames`]: crate::profiling::Recorder::synthetic_frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticFrames(BTreeSet<String>);

impl SyntheticFrames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into());
        self
    }

    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.0.contains(identifier)
    }
}

impl Default for SyntheticFrames {
    fn default() -> Self {
        Self::new([AWAIT_FRAME, SELF_TIME_FRAME, OUT_OF_CONTEXT_FRAME])
    }
}

enum Visit {
    Enter(FrameId),
    Exit(FrameId),
}

/// Turns captured call trees into `B`/`E` event sequences.
#[derive(Debug, Clone)]
pub struct Renderer {
    synthetic: SyntheticFrames,
    pid: Pid,
}

impl Renderer {
    /// Renderer stamping events with the current process id.
    #[must_use]
    pub fn new(synthetic: SyntheticFrames) -> Self {
        Self {
            synthetic,
            pid: Pid::current(),
        }
    }

    #[must_use]
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = pid;
        self
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn synthetic_frames(&self) -> &SyntheticFrames {
        &self.synthetic
    }

    /// Filter `tree` with `rules`, then render what survives.
    ///
    /// # Errors
    /// Propagates [`FrameError`] from a malformed tree.
    pub fn render_filtered(
        &self,
        tree: &mut CallTree,
        rules: &ExclusionRules,
        start: Timestamp,
        tid: Tid,
    ) -> Result<Vec<TraceEvent>, FrameError> {
        let roots = filter_excluded(tree, rules)?;
        self.render(tree, &roots, start, tid)
    }

    /// Render `roots` left to right.
    ///
    /// Frame offsets are added to `start`. Each emitted timestamp is clamped to
    /// be no earlier than the previous one, so a recorder with jittery clocks
    /// cannot produce a non-monotonic track.
    ///
    /// # Errors
    /// - [`FrameError::UnknownFrame`] for a dangling frame id
    /// - [`FrameError::InvertedInterval`] for a frame closing before it opens
    pub fn render(
        &self,
        tree: &CallTree,
        roots: &[FrameId],
        start: Timestamp,
        tid: Tid,
    ) -> Result<Vec<TraceEvent>, FrameError> {
        let mut events = Vec::new();
        let mut last = start;
        let mut stack: Vec<Visit> = roots.iter().rev().map(|id| Visit::Enter(*id)).collect();

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    let frame = tree.get(id)?;
                    if frame.close_offset() < frame.open_offset() {
                        return Err(FrameError::InvertedInterval {
                            identifier: frame.identifier().to_string(),
                            open: frame.open_offset(),
                            close: frame.close_offset(),
                        });
                    }
                    stack.push(Visit::Exit(id));
                    stack.extend(frame.children().iter().rev().map(|c| Visit::Enter(*c)));

                    if self.synthetic.contains(frame.identifier()) {
                        continue;
                    }
                    last = last.max(start.offset_by(frame.open_offset()));
                    let mut args = Args::new();
                    let file = frame.file_path().unwrap_or("");
                    args.insert("file".to_string(), ArgValue::from(file));
                    args.insert("line".to_string(), ArgValue::from(frame.line().unwrap_or(0)));
                    args.insert("name".to_string(), ArgValue::from(frame.identifier()));
                    events.push(TraceEvent::begin_with_args(
                        frame.identifier(),
                        Category::RUNTIME,
                        last,
                        self.pid,
                        tid,
                        args,
                    ));
                }
                Visit::Exit(id) => {
                    let frame = tree.get(id)?;
                    if self.synthetic.contains(frame.identifier()) {
                        continue;
                    }
                    last = last.max(start.offset_by(frame.close_offset()));
                    events.push(TraceEvent::end(last, self.pid, tid));
                }
            }
        }
        Ok(events)
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(SyntheticFrames::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CallFrame;
    use frametrace_common::Phase;
    use std::time::Duration;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn frame(name: &str, open: u64, close: u64) -> CallFrame {
        CallFrame::new(name)
            .with_location(format!("src/{name}.rs"), Some(7))
            .with_interval(ms(open), ms(close))
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

    fn renderer() -> Renderer {
        Renderer::default().with_pid(Pid(1))
    }

    #[test]
    fn test_render_nested_frames_with_offsets() {
        let mut tree = CallTree::new(frame("root", 0, 4));
        let work = tree.add_child(tree.root(), frame("work", 1, 3)).unwrap();
        tree.add_child(work, frame("leaf", 1, 2)).unwrap();

        let start = Timestamp(1_000_000_000);
        let events = renderer()
            .render(&tree, &[tree.root()], start, Tid(3))
            .unwrap();

        assert_eq!(shape(&events), ["B root", "B work", "B leaf", "E", "E", "E"]);
        let stamps: Vec<Timestamp> = events.iter().map(TraceEvent::timestamp).collect();
        assert_eq!(
            stamps,
            [0, 1, 1, 2, 3, 4].map(|m| start.offset_by(ms(m)))
        );
        assert!(events.iter().all(|e| e.tid() == Tid(3)));
    }

    #[test]
    fn test_begin_args_carry_location() {
        let tree = CallTree::new(frame("root", 0, 1));
        let events = renderer()
            .render(&tree, &[tree.root()], Timestamp(0), Tid(1))
            .unwrap();
        let TraceEvent::BeginDuration(begin) = &events[0] else {
            panic!("expected a begin event");
        };
        assert_eq!(begin.category, Category::RUNTIME);
        assert_eq!(begin.args["file"], ArgValue::from("src/root.rs"));
        assert_eq!(begin.args["line"], ArgValue::Int(7));
        assert_eq!(begin.args["name"], ArgValue::from("root"));
    }

    #[test]
    fn test_missing_location_defaults() {
        let tree = CallTree::new(CallFrame::new("anon"));
        let events = renderer()
            .render(&tree, &[tree.root()], Timestamp(0), Tid(1))
            .unwrap();
        let TraceEvent::BeginDuration(begin) = &events[0] else {
            panic!("expected a begin event");
        };
        assert_eq!(begin.args["file"], ArgValue::from(""));
        assert_eq!(begin.args["line"], ArgValue::Int(0));
    }

    #[test]
    fn test_synthetic_frames_pass_through() {
        let mut tree = CallTree::new(frame("[root]", 0, 5));
        let outer = tree.add_child(tree.root(), frame("outer", 0, 5)).unwrap();
        let awaiting = tree.add_child(outer, frame(AWAIT_FRAME, 1, 4)).unwrap();
        tree.add_child(awaiting, frame("resumed", 2, 3)).unwrap();

        let renderer = Renderer::new(SyntheticFrames::default().with("[root]")).with_pid(Pid(1));
        let events = renderer
            .render(&tree, &[tree.root()], Timestamp(0), Tid(1))
            .unwrap();

        assert_eq!(shape(&events), ["B outer", "B resumed", "E", "E"]);
    }

    #[test]
    fn test_multiple_roots_render_in_order() {
        let mut tree = CallTree::new(frame("harness", 0, 10));
        let a = tree.add_child(tree.root(), frame("a", 0, 4)).unwrap();
        let b = tree.add_child(tree.root(), frame("b", 5, 9)).unwrap();

        let events = renderer().render(&tree, &[a, b], Timestamp(0), Tid(1)).unwrap();
        assert_eq!(shape(&events), ["B a", "E", "B b", "E"]);
    }

    #[test]
    fn test_excluded_frame_is_hoisted_before_rendering() {
        let mut tree = CallTree::new(frame("root", 0, 6));
        let internal = tree
            .add_child(
                tree.root(),
                CallFrame::new("pytest_internal")
                    .with_location("/opt/harness/runner.rs", Some(1))
                    .with_interval(ms(1), ms(5)),
            )
            .unwrap();
        tree.add_child(internal, frame("user_code", 2, 4)).unwrap();

        let events = renderer()
            .render_filtered(
                &mut tree,
                &ExclusionRules::new(["/opt/harness"]),
                Timestamp(0),
                Tid(1),
            )
            .unwrap();
        assert_eq!(shape(&events), ["B root", "B user_code", "E", "E"]);
    }

    #[test]
    fn test_output_is_well_nested_and_monotonic() {
        let mut tree = CallTree::new(frame("root", 0, 100));
        let mut parent = tree.root();
        for depth in 1..20u64 {
            let id = tree
                .add_child(parent, frame(&format!("d{depth}"), depth, 100 - depth))
                .unwrap();
            tree.add_child(parent, frame(&format!("s{depth}"), 100 - depth, 100 - depth))
                .unwrap();
            parent = id;
        }

        let events = renderer()
            .render(&tree, &[tree.root()], Timestamp(0), Tid(1))
            .unwrap();

        let mut depth = 0i64;
        let mut last = Timestamp(0);
        for event in &events {
            match event.phase() {
                Phase::Begin => depth += 1,
                Phase::End => depth -= 1,
                Phase::Instant => {}
            }
            assert!(depth >= 0);
            assert!(event.timestamp() >= last);
            last = event.timestamp();
        }
        assert_eq!(depth, 0);
    }

    #[test]
    fn test_inverted_interval_is_fatal() {
        let tree = CallTree::new(frame("broken", 5, 2));
        let err = renderer()
            .render(&tree, &[tree.root()], Timestamp(0), Tid(1))
            .unwrap_err();
        assert!(matches!(err, FrameError::InvertedInterval { .. }));
    }

    #[test]
    fn test_no_roots_renders_nothing() {
        let tree = CallTree::new(frame("root", 0, 1));
        let events = renderer().render(&tree, &[], Timestamp(0), Tid(1)).unwrap();
        assert!(events.is_empty());
    }
}
