//! Error kinds for the verification pipelines.
//!
//! Every expected per-request outcome (no face, low quality, no match, limit
//! reached, failed liveness, failed save) is a variant here, returned as a
//! value. None of them are fatal to the process.

use thiserror::Error;

/// User-facing liveness failure text. Clients match on this string verbatim.
pub const LIVENESS_FAILURE_MESSAGE: &str =
    "Unable to verify Liveness and we detected less than 3 blinks";

/// Rejected input to a landmark extractor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LandmarkError {
    #[error("invalid input image: {0}")]
    InvalidInput(String),
}

/// A landmark set the blink counter cannot interpret.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlinkError {
    #[error("malformed landmark set: expected {expected} points, got {actual}")]
    MalformedLandmarks { expected: usize, actual: usize },
    #[error("degenerate eye geometry: {0}")]
    DegenerateEye(String),
}

/// Which liveness path produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessMethod {
    TrustShortcut,
    FullRecount,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LivenessError {
    #[error("frame count ({frames}) does not match landmark count ({landmarks})")]
    LengthMismatch { frames: usize, landmarks: usize },
    #[error("no frames supplied for liveness verification")]
    NoFrames,
    #[error(transparent)]
    InvalidFrame(#[from] LandmarkError),
    #[error("{}", LIVENESS_FAILURE_MESSAGE)]
    Failed {
        method: LivenessMethod,
        /// Blinks counted server-side (full recount path only).
        blinks: Option<usize>,
    },
}

/// Failure talking to an external store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(String),
    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

/// Failure inside a detection / quality / embedding model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model not loaded: {0}")]
    NotLoaded(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttendanceError {
    #[error("invalid input: {0}")]
    InputValidation(String),
    #[error("no face detected: {0}")]
    Detection(String),
    #[error("face quality too low: score {score:.2} below minimum {minimum:.2}")]
    Quality { score: f32, minimum: f32 },
    #[error("face not recognized: best confidence {best:.2} below threshold {threshold:.2}")]
    Recognition { best: f32, threshold: f32 },
    #[error("daily attendance limit reached for {user_id}: {count} of {limit} records today")]
    Eligibility {
        user_id: String,
        count: usize,
        limit: usize,
    },
    #[error("{}", LIVENESS_FAILURE_MESSAGE)]
    Liveness {
        method: LivenessMethod,
        blinks: Option<usize>,
    },
    #[error("failed to save attendance record: {0}")]
    Persistence(#[source] StoreError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl AttendanceError {
    /// Stable machine-readable code surfaced alongside the message.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AttendanceError::InputValidation(_) => "input_validation",
            AttendanceError::Detection(_) => "detection_failed",
            AttendanceError::Quality { .. } => "quality_failed",
            AttendanceError::Recognition { .. } => "recognition_failed",
            AttendanceError::Eligibility { .. } => "eligibility_failed",
            AttendanceError::Liveness { .. } => "liveness_failed",
            AttendanceError::Persistence(_) => "persistence_failed",
            AttendanceError::Store(_) => "store_unavailable",
            AttendanceError::Model(_) => "model_failure",
        }
    }
}

impl From<LivenessError> for AttendanceError {
    fn from(err: LivenessError) -> Self {
        match err {
            LivenessError::Failed { method, blinks } => AttendanceError::Liveness { method, blinks },
            other => AttendanceError::InputValidation(other.to_string()),
        }
    }
}
