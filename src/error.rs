use std::fmt;

/// The worker stage a failure occurred in. Mirrors the state machine in
/// `spec.md` §4.1: `Queued → Preparing → Uploading → Analyzing → Matching →
/// Writing → Organizing → Done | Failed | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Preparing,
    Uploading,
    Analyzing,
    Matching,
    Writing,
    Organizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Preparing => "Preparing",
            Stage::Uploading => "Uploading",
            Stage::Analyzing => "Analyzing",
            Stage::Matching => "Matching",
            Stage::Writing => "Writing",
            Stage::Organizing => "Organizing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageErrorKind {
    #[error("preparation failed: {0}")]
    Preparation(String),

    #[error("compression could not meet the size cap: {0}")]
    Compression(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("analysis request to {endpoint} ({version}) failed: {message}")]
    Analysis {
        endpoint: String,
        version: String,
        message: String,
    },

    #[error("metadata write failed: {0}")]
    Metadata(String),

    #[error("organization failed: {0}")]
    Organization(String),

    #[error("processing cancelled by user")]
    Cancellation,
}

/// A stage-tagged error. `WorkerResult::error` is this error's `Display`
/// string, so it serializes cleanly into the `imageProcessed` event payload.
/// Cancellation is special-cased to the literal `"Processing cancelled by
/// user"` (`spec.md` §4.2/§7), with no stage-bracket prefix: every other
/// failure mode renders as `"[{stage}] {source}"`.
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub source: StageErrorKind,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cancellation() {
            write!(f, "Processing cancelled by user")
        } else {
            write!(f, "[{}] {}", self.stage, self.source)
        }
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl StageError {
    pub fn new(stage: Stage, source: StageErrorKind) -> Self {
        Self { stage, source }
    }

    pub fn cancelled(stage: Stage) -> Self {
        Self {
            stage,
            source: StageErrorKind::Cancellation,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.source, StageErrorKind::Cancellation)
    }
}

pub type StageResult<T> = Result<T, StageError>;
