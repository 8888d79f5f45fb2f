//! # Captured Call Trees
//!
//! A recorder hands the coordinator one [`CallTree`] per profiled region. The
//! tree is an arena: frames live in a `Vec` and refer to each other through
//! [`FrameId`] indices, so `parent` and `children` are plain index fields rather
//! than owning pointers.
//!
//! ```text
//! frames: [ root, a, b, c ]          root (0)
//!                                     ├── a (1)
//!                                     │   └── c (3)
//!                                     └── b (2)
//! ```
//!
//! Children order is call order and is never sorted. Hoisting (see [`filter`])
//! rewires index lists in place; detached frames keep their arena slot but are
//! no longer reachable from the root.

pub mod filter;
pub mod snapshot;

pub use filter::{filter_excluded, hoist, ExclusionRules};
pub use snapshot::FrameSnapshot;

use crate::domain::{FrameError, FrameId};
use std::time::Duration;

/// One node of a captured call tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    identifier: String,
    file_path: Option<String>,
    line: Option<u32>,
    open_offset: Duration,
    close_offset: Duration,
    parent: Option<FrameId>,
    children: Vec<FrameId>,
}

impl CallFrame {
    /// A frame with no location and a zero-length interval.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            file_path: None,
            line: None,
            open_offset: Duration::ZERO,
            close_offset: Duration::ZERO,
            parent: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_location(mut self, file_path: impl Into<String>, line: Option<u32>) -> Self {
        self.file_path = Some(file_path.into());
        self.line = line;
        self
    }

    /// Set the interval, relative to the start of the recording session.
    #[must_use]
    pub fn with_interval(mut self, open_offset: Duration, close_offset: Duration) -> Self {
        self.open_offset = open_offset;
        self.close_offset = close_offset;
        self
    }

    /// Opaque label of the frame; rendered as the event name.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[must_use]
    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }

    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.line
    }

    #[must_use]
    pub fn open_offset(&self) -> Duration {
        self.open_offset
    }

    #[must_use]
    pub fn close_offset(&self) -> Duration {
        self.close_offset
    }

    /// `None` for the tree root and for frames detached by hoisting.
    #[must_use]
    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[FrameId] {
        &self.children
    }
}

/// Arena-backed, single-rooted call tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CallTree {
    frames: Vec<CallFrame>,
    root: FrameId,
}

impl CallTree {
    /// Create a tree holding only `root`.
    #[must_use]
    pub fn new(mut root: CallFrame) -> Self {
        root.parent = None;
        root.children.clear();
        Self {
            frames: vec![root],
            root: FrameId(0),
        }
    }

    #[must_use]
    pub fn root(&self) -> FrameId {
        self.root
    }

    /// Number of arena slots, including detached frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append `frame` as the last child of `parent`.
    ///
    /// # Errors
    /// Returns [`FrameError::UnknownFrame`] if `parent` is not in this tree.
    pub fn add_child(
        &mut self,
        parent: FrameId,
        mut frame: CallFrame,
    ) -> Result<FrameId, FrameError> {
        self.get(parent)?;
        let id = FrameId(self.frames.len());
        frame.parent = Some(parent);
        frame.children.clear();
        self.frames.push(frame);
        self.frames[parent.0].children.push(id);
        Ok(id)
    }

    /// Look up a frame.
    ///
    /// # Errors
    /// Returns [`FrameError::UnknownFrame`] if `id` is not in this tree.
    pub fn get(&self, id: FrameId) -> Result<&CallFrame, FrameError> {
        self.frames.get(id.0).ok_or(FrameError::UnknownFrame(id))
    }

    pub(crate) fn get_mut(&mut self, id: FrameId) -> Result<&mut CallFrame, FrameError> {
        self.frames.get_mut(id.0).ok_or(FrameError::UnknownFrame(id))
    }

    /// Record when a still-open frame closed.
    pub(crate) fn close(&mut self, id: FrameId, close_offset: Duration) -> Result<(), FrameError> {
        self.get_mut(id)?.close_offset = close_offset;
        Ok(())
    }

    /// Identifiers of every frame reachable from `roots`, in depth-first pre-order.
    ///
    /// # Errors
    /// Returns [`FrameError::UnknownFrame`] if a root or child id is dangling.
    pub fn preorder(&self, roots: &[FrameId]) -> Result<Vec<FrameId>, FrameError> {
        let mut order = Vec::new();
        let mut stack: Vec<FrameId> = roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let frame = self.get(id)?;
            order.push(id);
            stack.extend(frame.children.iter().rev().copied());
        }
        Ok(order)
    }

    /// Latest close offset of any frame reachable from the root.
    #[must_use]
    pub fn span_end(&self) -> Duration {
        self.preorder(&[self.root])
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.frames.get(id.0))
            .map(CallFrame::close_offset)
            .max()
            .unwrap_or_default()
    }
}
