//! Domain types providing compile-time safety and self-documentation
//!
//! The identity and time types stamped on trace events live in
//! `frametrace-common` and are re-exported here, so the rest of the crate can
//! name everything through `crate::domain`.

use std::fmt;

pub use frametrace_common::{Pid, Tid, Timestamp};

/// Index of a frame inside a [`CallTree`](crate::frame::CallTree) arena.
///
/// Stable for the lifetime of the tree: hoisting detaches frames but never
/// moves or frees arena slots, so an id never starts pointing at another frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub(crate) usize);

impl FrameId {
    /// Position of the frame in its arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame#{}", self.0)
    }
}
