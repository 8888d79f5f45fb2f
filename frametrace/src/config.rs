//! Run configuration
//!
//! Everything a traced run needs to know before it starts: where the trace
//! goes, which frames are harness noise, and which frame names are recorder
//! bookkeeping. Built from the command line or programmatically.

use crate::domain::ConfigError;
use crate::frame::ExclusionRules;
use crate::profiling::{Profiler, Recorder};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct TraceConfig {
    output: Option<PathBuf>,
    exclusions: ExclusionRules,
    extra_synthetic: Vec<String>,
}

impl TraceConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the trace to `path` when the run finishes. Without an output
    /// path, events are kept in memory only.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_exclusions(mut self, exclusions: ExclusionRules) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Treat frames named `name` as bookkeeping, on top of the recorder's own.
    #[must_use]
    pub fn with_synthetic_frame(mut self, name: impl Into<String>) -> Self {
        self.extra_synthetic.push(name.into());
        self
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn exclusions(&self) -> &ExclusionRules {
        &self.exclusions
    }

    pub fn extra_synthetic(&self) -> &[String] {
        &self.extra_synthetic
    }

    /// Check the configuration before any work starts.
    ///
    /// # Errors
    /// Returns [`ConfigError::OutputIsDirectory`] if the output path names an
    /// existing directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.output {
            Some(path) if path.is_dir() => Err(ConfigError::OutputIsDirectory(path.clone())),
            _ => Ok(()),
        }
    }

    /// Build a profiler around `recorder` using these exclusions and
    /// synthetic frame names.
    pub fn profiler<R: Recorder>(&self, recorder: R) -> Profiler<R> {
        let synthetic = self
            .extra_synthetic
            .iter()
            .fold(recorder.synthetic_frames(), |set, name| set.with(name.as_str()));
        Profiler::new(recorder, self.exclusions.clone()).with_synthetic_frames(synthetic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::ReplayRecorder;
    use crate::render::AWAIT_FRAME;

    #[test]
    fn test_default_has_no_output() {
        let config = TraceConfig::new();
        assert!(config.output().is_none());
        assert!(config.exclusions().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_directory_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = TraceConfig::new().with_output(dir.path());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutputIsDirectory(ref p) if p == dir.path()));
        assert!(err.to_string().starts_with("The provided path must not be a directory"));
    }

    #[test]
    fn test_missing_file_output_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let config = TraceConfig::new().with_output(dir.path().join("trace.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profiler_merges_synthetic_names() {
        let config = TraceConfig::new().with_synthetic_frame("<module>");
        let profiler = config.profiler(ReplayRecorder::default());
        let synthetic = profiler.synthetic_frames();
        assert!(synthetic.contains("<module>"));
        assert!(synthetic.contains(AWAIT_FRAME));
    }
}
