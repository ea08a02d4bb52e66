//! Collaborator interfaces consumed by the pipelines.
//!
//! Models (detector, quality, embedding) take `&mut self` where the backing
//! runtime needs exclusive access per call. Stores are shared across
//! requests and take `&self`.

use crate::error::{ModelError, StoreError};
use crate::record::{AttendanceRecord, DateRange, User};
use crate::types::{Detection, Embedding, QualityReport};
use chrono::NaiveDateTime;
use image::RgbImage;

/// Finds faces in an RGB image.
pub trait FaceDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Detection, ModelError>;
}

/// Scores a single face crop.
pub trait QualityAssessor {
    fn assess(&self, face: &RgbImage) -> Result<QualityReport, ModelError>;
}

/// Produces an identity embedding for a single face crop.
pub trait EmbeddingExtractor {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ModelError>;
}

/// One raw entry from the known-embeddings store, before shape normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub user_id: String,
    pub payload: serde_json::Value,
}

/// Source of enrolled embeddings. Entries may arrive in any of the
/// historical payload shapes; see [`crate::gallery`].
pub trait KnownEmbeddingsStore: Send + Sync {
    fn get_all(&self) -> Result<Vec<StoredEmbedding>, StoreError>;
}

pub trait UserStore: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<User>, StoreError>;
}

pub trait AttendanceStore: Send + Sync {
    fn add(&self, record: &AttendanceRecord) -> Result<(), StoreError>;

    fn history(&self, user_id: &str, range: &DateRange) -> Result<Vec<AttendanceRecord>, StoreError>;

    fn count(&self, user_id: &str, range: &DateRange) -> Result<usize, StoreError> {
        Ok(self.history(user_id, range)?.len())
    }
}

/// Wall-clock source for stamping records.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}
