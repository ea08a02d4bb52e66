//! rollcall-models — ONNX-backed implementations of the rollcall-core model traits.

pub mod detector;
pub mod landmarker;
pub mod quality;
pub mod recognizer;
mod tensor;

pub use detector::{DetectorError, ScrfdDetector};
pub use landmarker::{FaceLandmarker, LandmarkModelError};
pub use quality::HeuristicQualityAssessor;
pub use recognizer::{FaceRecognizer, RecognizerError};
