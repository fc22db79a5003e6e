use std::path::{Path, PathBuf};

/// Errors that escape an analysis run.
///
/// Per-frame problems never show up here; see [`FrameAnomaly`].
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("trace unreadable: {}: {reason}", path.display())]
    TraceUnreadable { path: PathBuf, reason: String },
}

impl AnalysisError {
    pub fn unreadable(path: &Path, reason: impl ToString) -> Self {
        AnalysisError::TraceUnreadable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// A frame that cannot be placed on the timeline. The frame is dropped and
/// the run carries on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameAnomaly {
    #[error("frame has no capture timestamp")]
    MissingTimestamp,

    #[error("frame timestamp is not finite: {0}")]
    NonFiniteTimestamp(f64),
}
