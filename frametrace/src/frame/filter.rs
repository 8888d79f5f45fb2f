//! Harness frame removal ("hoisting").
//!
//! Frames whose source file lives under one of the harness' own installation
//! directories say nothing about the code under test. They are excised from the
//! tree and their children take their place:
//!
//! ```text
//! root                         root
//! ├── a                        ├── a
//! ├── runner.rs::call   ──►    ├── user_fn_1
//! │   ├── user_fn_1            ├── user_fn_2
//! │   └── user_fn_2            └── b
//! └── b
//! ```
//!
//! The root itself cannot be hoisted (it has no parent to receive its
//! children). When the root is excluded, its children become separate roots.

use super::{CallFrame, CallTree};
use crate::domain::{FrameError, FrameId};
use log::debug;
use std::path::{Path, PathBuf};

/// Directory prefixes whose frames are removed from captured trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionRules {
    prefixes: Vec<PathBuf>,
}

impl ExclusionRules {
    /// Build rules from directory prefixes. Empty prefixes are ignored, since an
    /// empty path would otherwise contain every file.
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut rules = Self::default();
        for prefix in prefixes {
            rules.push(prefix);
        }
        rules
    }

    pub fn push(&mut self, prefix: impl Into<PathBuf>) {
        let prefix = prefix.into();
        if !prefix.as_os_str().is_empty() {
            self.prefixes.push(prefix);
        }
    }

    #[must_use]
    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// True when the frame's file lives under one of the prefixes.
    ///
    /// Matching is per path component: `/opt/harness` contains
    /// `/opt/harness/runner.rs` but not `/opt/harness2/runner.rs`. A frame
    /// without a file path never matches.
    #[must_use]
    pub fn is_excluded(&self, frame: &CallFrame) -> bool {
        match frame.file_path() {
            Some(file) if !file.is_empty() => {
                let file = Path::new(file);
                self.prefixes.iter().any(|prefix| file.starts_with(prefix))
            }
            _ => false,
        }
    }
}

/// Remove `id` from its parent, splicing its children in at the index it held.
///
/// Afterwards `id` is detached: no parent, no children.
///
/// # Errors
/// - [`FrameError::RootCannotBeHoisted`] if `id` has no parent
/// - [`FrameError::UnknownFrame`] / [`FrameError::NotAChild`] if the tree is
///   malformed; the tree is left untouched in that case
pub fn hoist(tree: &mut CallTree, id: FrameId) -> Result<(), FrameError> {
    let frame = tree.get(id)?;
    let Some(parent) = frame.parent else {
        return Err(FrameError::RootCannotBeHoisted {
            identifier: frame.identifier.clone(),
        });
    };
    for child in &frame.children {
        tree.get(*child)?;
    }
    let position = tree
        .get(parent)?
        .children
        .iter()
        .position(|c| *c == id)
        .ok_or(FrameError::NotAChild { parent, child: id })?;

    let frame = tree.get_mut(id)?;
    frame.parent = None;
    let children = std::mem::take(&mut frame.children);
    for child in &children {
        tree.get_mut(*child)?.parent = Some(parent);
    }
    tree.get_mut(parent)?
        .children
        .splice(position..=position, children);
    Ok(())
}

/// Remove every excluded frame from `tree`, returning the surviving roots.
///
/// The walk is post-order: a frame's children are in their final shape before
/// the frame itself is judged, so one hoist moves an already-filtered subtree.
/// Usually a single root is returned; an excluded root yields its children
/// (possibly none).
///
/// The walk keeps its own stack, so tree depth is bounded by memory rather
/// than by the thread's stack.
///
/// # Errors
/// Propagates [`FrameError`] from a malformed tree.
pub fn filter_excluded(
    tree: &mut CallTree,
    rules: &ExclusionRules,
) -> Result<Vec<FrameId>, FrameError> {
    let root = tree.root();
    if rules.is_empty() {
        return Ok(vec![root]);
    }

    let mut roots = vec![root];
    let mut stack = vec![Visit::Enter(root)];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(id) => {
                stack.push(Visit::Exit(id));
                let children = &tree.get(id)?.children;
                stack.extend(children.iter().rev().map(|c| Visit::Enter(*c)));
            }
            Visit::Exit(id) => {
                let frame = tree.get(id)?;
                if !rules.is_excluded(frame) {
                    continue;
                }
                if frame.parent.is_some() {
                    hoist(tree, id)?;
                    continue;
                }
                let frame = tree.get_mut(id)?;
                roots = std::mem::take(&mut frame.children);
                for orphan in &roots {
                    tree.get_mut(*orphan)?.parent = None;
                }
            }
        }
    }
    debug!("Frame filter kept {} root(s)", roots.len());
    Ok(roots)
}

enum Visit {
    Enter(FrameId),
    Exit(FrameId),
}
