//! JSON form of a captured call tree.
//!
//! Recorders running out of process hand their capture over as nested JSON:
//!
//! ```json
//! {
//!   "identifier": "main",
//!   "file_path": "src/main.rs",
//!   "line": 3,
//!   "open_offset_ns": 0,
//!   "close_offset_ns": 2500000,
//!   "children": [ ... ]
//! }
//! ```
//!
//! Offsets are nanoseconds since the recording started. Captures of deep
//! recursion nest just as deeply, so parsing grows its stack on demand and
//! dropping a snapshot walks it with an explicit stack.

use super::{CallFrame, CallTree};
use crate::domain::{ConfigError, FrameId};
use serde::{Deserialize, Serialize};
use serde_json::Deserializer;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub open_offset_ns: u64,
    pub close_offset_ns: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FrameSnapshot>,
}

impl FrameSnapshot {
    /// Parse a snapshot file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or is not a snapshot.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::SnapshotUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&content).map_err(|source| ConfigError::SnapshotInvalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a snapshot of any nesting depth.
    ///
    /// # Errors
    /// Returns the parser's error for malformed JSON or a missing field.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut parser = Deserializer::from_str(json);
        parser.disable_recursion_limit();
        let snapshot = Self::deserialize(serde_stacker::Deserializer::new(&mut parser))?;
        parser.end()?;
        Ok(snapshot)
    }

    fn to_frame(&self) -> CallFrame {
        let mut frame = CallFrame::new(self.identifier.clone()).with_interval(
            Duration::from_nanos(self.open_offset_ns),
            Duration::from_nanos(self.close_offset_ns),
        );
        if let Some(file) = &self.file_path {
            frame = frame.with_location(file.clone(), self.line);
        }
        frame
    }

    /// Build the arena form of this snapshot.
    #[must_use]
    pub fn to_tree(&self) -> CallTree {
        let mut tree = CallTree::new(self.to_frame());
        let mut pending: Vec<(FrameId, &FrameSnapshot)> = vec![(tree.root(), self)];
        while let Some((parent, snapshot)) = pending.pop() {
            for child in &snapshot.children {
                // Parents are always inserted before their children.
                if let Ok(id) = tree.add_child(parent, child.to_frame()) {
                    pending.push((id, child));
                }
            }
        }
        tree
    }
}

impl Drop for FrameSnapshot {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut snapshot) = pending.pop() {
            pending.append(&mut snapshot.children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_snapshot() {
        let json = r#"{
            "identifier": "main",
            "file_path": "src/main.rs",
            "line": 3,
            "open_offset_ns": 0,
            "close_offset_ns": 3000,
            "children": [
                {"identifier": "a", "open_offset_ns": 0, "close_offset_ns": 1000},
                {"identifier": "b", "open_offset_ns": 1000, "close_offset_ns": 3000,
                 "children": [
                    {"identifier": "c", "open_offset_ns": 1500, "close_offset_ns": 2000}
                 ]}
            ]
        }"#;
        let snapshot = FrameSnapshot::from_json(json).unwrap();
        let tree = snapshot.to_tree();

        let order: Vec<String> = tree
            .preorder(&[tree.root()])
            .unwrap()
            .into_iter()
            .map(|id| tree.get(id).unwrap().identifier().to_string())
            .collect();
        assert_eq!(order, ["main", "a", "b", "c"]);

        let root = tree.get(tree.root()).unwrap();
        assert_eq!(root.file_path(), Some("src/main.rs"));
        assert_eq!(root.line(), Some(3));
        assert_eq!(tree.span_end(), Duration::from_nanos(3000));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = FrameSnapshot::from_file("/nonexistent/snapshot.json").unwrap_err();
        assert!(matches!(err, ConfigError::SnapshotUnreadable { .. }));
    }

    fn nested_json(depth: usize) -> String {
        let mut json = String::new();
        for level in 0..depth {
            if level > 0 {
                json.push_str(r#","children":["#);
            }
            json.push_str(&format!(
                r#"{{"identifier":"f{level}","open_offset_ns":{level},"close_offset_ns":{}"#,
                2 * depth - level
            ));
        }
        json.push('}');
        for _ in 1..depth {
            json.push_str("]}");
        }
        json
    }

    #[test]
    fn test_deeply_nested_snapshot_parses_and_converts() {
        const DEPTH: usize = 20_000;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.json");
        std::fs::write(&path, nested_json(DEPTH)).unwrap();

        let snapshot = FrameSnapshot::from_file(&path).unwrap();
        let tree = snapshot.to_tree();
        drop(snapshot);

        assert_eq!(tree.len(), DEPTH);
        let order = tree.preorder(&[tree.root()]).unwrap();
        let deepest = tree.get(order[DEPTH - 1]).unwrap();
        assert_eq!(deepest.identifier(), format!("f{}", DEPTH - 1));
        assert_eq!(tree.span_end(), Duration::from_nanos(2 * DEPTH as u64));
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let json = r#"{"identifier": "main", "open_offset_ns": 0, "close_offset_ns": 1} x"#;
        assert!(FrameSnapshot::from_json(json).is_err());
    }
}
