//! rollcall-core — Attendance verification pipelines.
//!
//! A subject is marked present only after face recognition against the
//! enrolled gallery and a blink-challenge liveness check. The class-photo
//! path marks many subjects from one image, trusting recognition alone.
//!
//! Models and stores are reached through the traits in [`ports`] and
//! [`landmarks`]; the pipelines themselves do no I/O beyond the final
//! attendance save.

pub mod blink;
pub mod class;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod gallery;
pub mod landmarks;
pub mod liveness;
pub mod mark;
pub mod ports;
pub mod recognition;
pub mod record;
pub mod recorder;
pub mod response;
pub mod types;

pub use blink::{BlinkCounter, EyeState};
pub use class::{ClassAttendanceOrchestrator, ClassAttendanceReport, ClassAttendanceRequest};
pub use config::{EyeLayout, PipelineConfig};
pub use error::{
    AttendanceError, BlinkError, LandmarkError, LivenessError, LivenessMethod, ModelError,
    StoreError, LIVENESS_FAILURE_MESSAGE,
};
pub use gallery::{CosineMatcher, Gallery, MatchResult, Matcher};
pub use landmarks::LandmarkExtractor;
pub use liveness::{LivenessOutcome, LivenessService, LivenessVerifier};
pub use mark::{MarkAttendance, MarkRequest};
pub use ports::{
    AttendanceStore, Clock, EmbeddingExtractor, FaceDetector, KnownEmbeddingsStore,
    QualityAssessor, StoredEmbedding, SystemClock, UserStore,
};
pub use recognition::{RecognitionGate, RecognitionOutcome, RecognitionRequest};
pub use record::{AttendanceRecord, DateRange, IndividualAttendanceResult, Stage, User};
pub use recorder::{AttendanceRecorder, RecordRequest};
pub use response::PipelineResponse;
pub use types::{
    BoundingBox, Detection, EligibilityDecision, Embedding, FaceLandmarkSet, QualityReport,
    RecognitionResult,
};
