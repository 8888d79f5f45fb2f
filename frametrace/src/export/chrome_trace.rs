//! Trace Event Format writer
//!
//! Output is a bare JSON array of flat records, loadable by Perfetto and
//! `chrome://tracing`:
//!
//! ```text
//! [
//!   {"name":"call","cat":"test","ph":"B","ts":1700000000000.0,"pid":42,"tid":1,"args":{...}},
//!   {"ph":"E","ts":1700000000512.5,"pid":42,"tid":1},
//!   {"name":"[Item Collected] t.py::a","ph":"i","ts":1700000000600.0,"pid":42,"tid":1,"s":"t"}
//! ]
//! ```
//!
//! Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview

use crate::domain::ExportError;
use frametrace_common::{ArgValue, Args, TraceEvent};
use log::{debug, info};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One record on the wire
#[derive(Debug, Serialize)]
struct WireEvent<'a> {
    /// Begin and instant events only
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    /// Begin events only
    #[serde(skip_serializing_if = "Option::is_none")]
    cat: Option<&'a str>,
    /// "B" = begin, "E" = end, "i" = instant
    ph: &'static str,
    /// Timestamp in microseconds
    ts: f64,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Map<String, JsonValue>>,
    /// Instant scope: "g", "p" or "t"
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<&'static str>,
}

impl<'a> WireEvent<'a> {
    fn from_event(event: &'a TraceEvent) -> Self {
        let mut wire = WireEvent {
            name: event.name(),
            cat: None,
            ph: event.phase().as_str(),
            ts: event.timestamp().as_micros(),
            pid: event.pid().0,
            tid: event.tid().0,
            args: None,
            s: None,
        };
        match event {
            TraceEvent::BeginDuration(begin) => {
                wire.cat = Some(begin.category.as_str());
                if !begin.args.is_empty() {
                    wire.args = Some(args_to_json(&begin.args));
                }
            }
            TraceEvent::Instant(instant) => wire.s = Some(instant.scope.as_str()),
            TraceEvent::EndDuration(_) => {}
        }
        wire
    }
}

/// Map event arguments onto JSON values.
///
/// JSON has no representation for NaN or infinities; such floats are written
/// as their display string instead of failing the whole export.
fn args_to_json(args: &Args) -> Map<String, JsonValue> {
    args.iter()
        .map(|(key, value)| {
            let json = match value {
                ArgValue::Str(s) => JsonValue::from(s.as_str()),
                ArgValue::Int(i) => JsonValue::from(*i),
                ArgValue::Float(f) => serde_json::Number::from_f64(*f).map_or_else(
                    || {
                        debug!("Argument '{key}' = {f} is not finite, writing it as a string");
                        JsonValue::String(f.to_string())
                    },
                    JsonValue::Number,
                ),
                ArgValue::List(items) => items.iter().map(String::as_str).collect(),
            };
            (key.clone(), json)
        })
        .collect()
}

/// Serializes [`TraceEvent`]s to the Trace Event Format.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceEventExporter;

impl TraceEventExporter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Export `events` to any writer (file, stdout, buffer, etc.)
    ///
    /// # Example
    /// ```
    /// use frametrace::export::TraceEventExporter;
    /// use frametrace_common::{Pid, Tid, Timestamp, TraceEvent};
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let events = [TraceEvent::end(Timestamp(2_000), Pid(1), Tid(1))];
    /// let mut buffer = Vec::new();
    /// TraceEventExporter::new().export(&events, &mut buffer)?;
    /// assert_eq!(
    ///     String::from_utf8(buffer)?,
    ///     r#"[{"ph":"E","ts":2.0,"pid":1,"tid":1}]"#
    /// );
    /// # Ok(())
    /// # }
    /// # example().unwrap();
    /// ```
    ///
    /// # Errors
    /// Returns [`ExportError`] if serialization or the underlying writer fails.
    pub fn export<W: Write>(&self, events: &[TraceEvent], writer: W) -> Result<(), ExportError> {
        let wire: Vec<WireEvent<'_>> = events.iter().map(WireEvent::from_event).collect();
        let mut writer = BufWriter::new(writer);
        serde_json::to_writer(&mut writer, &wire)?;
        writer.flush()?;
        Ok(())
    }

    /// Create (or truncate) `path` and export `events` into it.
    ///
    /// # Errors
    /// Returns [`ExportError::WriteFailed`] if the file cannot be created,
    /// and any error of [`export`](Self::export).
    pub fn write_to_path(&self, events: &[TraceEvent], path: &Path) -> Result<(), ExportError> {
        let file = File::create(path).map_err(|source| ExportError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        self.export(events, file)?;
        info!("Wrote {} trace events to {}", events.len(), path.display());
        Ok(())
    }
}
