//! Hand-written collaborators for pipeline tests.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use image::{DynamicImage, RgbImage};
use rollcall_core::{
    AttendanceRecord, AttendanceStore, BoundingBox, Clock, DateRange, Detection, Embedding,
    EmbeddingExtractor, FaceDetector, FaceLandmarkSet, KnownEmbeddingsStore, LandmarkError,
    LandmarkExtractor, ModelError, QualityAssessor, QualityReport, StoreError, StoredEmbedding,
    User, UserStore,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn now() -> NaiveDateTime {
    today().and_hms_opt(9, 30, 0).unwrap()
}

pub fn frame() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::new(200, 120))
}

pub fn frames(n: usize) -> Vec<DynamicImage> {
    (0..n).map(|_| frame()).collect()
}

pub fn face(x: f32, width: f32, confidence: f32) -> BoundingBox {
    BoundingBox { x, y: 10.0, width, height: 40.0, confidence }
}

/// 68 points with both eyes drawn at the requested aspect ratio.
pub fn landmarks_with_ear(ear: f32) -> FaceLandmarkSet {
    let mut points = vec![(0.5f32, 0.5f32); 68];
    for (start, x0) in [(36usize, 0.30f32), (42, 0.60)] {
        let w = 0.1f32;
        let h = ear * w;
        points[start] = (x0, 0.4);
        points[start + 1] = (x0 + w / 3.0, 0.4 - h / 2.0);
        points[start + 2] = (x0 + 2.0 * w / 3.0, 0.4 - h / 2.0);
        points[start + 3] = (x0 + w, 0.4);
        points[start + 4] = (x0 + 2.0 * w / 3.0, 0.4 + h / 2.0);
        points[start + 5] = (x0 + w / 3.0, 0.4 + h / 2.0);
    }
    FaceLandmarkSet::new(points)
}

pub fn ear_sequence(ears: &[f32]) -> Vec<Option<FaceLandmarkSet>> {
    ears.iter().map(|&e| Some(landmarks_with_ear(e))).collect()
}

pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Returns the same boxes for every image.
pub struct MockDetector {
    pub boxes: Vec<BoundingBox>,
    pub calls: usize,
}

impl MockDetector {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes, calls: 0 }
    }
}

impl FaceDetector for MockDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Detection, ModelError> {
        self.calls += 1;
        Ok(Detection::from_boxes(self.boxes.clone()))
    }
}

/// Fixed score, optionally overridden per crop width.
pub struct MockQuality {
    pub score: f32,
    pub by_width: HashMap<u32, f32>,
}

impl MockQuality {
    pub fn new(score: f32) -> Self {
        Self { score, by_width: HashMap::new() }
    }
}

impl QualityAssessor for MockQuality {
    fn assess(&self, face: &RgbImage) -> Result<QualityReport, ModelError> {
        let score = self.by_width.get(&face.width()).copied().unwrap_or(self.score);
        Ok(QualityReport { overall_score: score })
    }
}

/// Identifies crops by their width, so results do not depend on slot order.
pub struct MockExtractor {
    pub by_width: HashMap<u32, Embedding>,
    pub calls: usize,
}

impl MockExtractor {
    pub fn new(pairs: &[(u32, Vec<f32>)]) -> Self {
        Self {
            by_width: pairs.iter().map(|(w, v)| (*w, Embedding::new(v.clone()))).collect(),
            calls: 0,
        }
    }
}

impl EmbeddingExtractor for MockExtractor {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ModelError> {
        self.calls += 1;
        self.by_width
            .get(&face.width())
            .cloned()
            .ok_or_else(|| ModelError::Inference(format!("no embedding for width {}", face.width())))
    }
}

/// Plays back a scripted landmark sequence, then `None`.
pub struct MockLandmarks {
    pub queue: VecDeque<Option<FaceLandmarkSet>>,
    pub calls: usize,
}

impl MockLandmarks {
    pub fn new(sequence: Vec<Option<FaceLandmarkSet>>) -> Self {
        Self { queue: sequence.into(), calls: 0 }
    }
}

impl LandmarkExtractor for MockLandmarks {
    fn extract(&mut self, _image: &DynamicImage) -> Result<Option<FaceLandmarkSet>, LandmarkError> {
        self.calls += 1;
        Ok(self.queue.pop_front().flatten())
    }
}

/// In-memory stand-in for all three stores.
#[derive(Default)]
pub struct MemoryStore {
    pub users: HashMap<String, User>,
    pub embeddings: Vec<StoredEmbedding>,
    pub records: Mutex<Vec<AttendanceRecord>>,
    pub fail_add_for: HashSet<String>,
    pub embeddings_unavailable: bool,
}

impl MemoryStore {
    pub fn with_embedding(mut self, user_id: &str, payload: serde_json::Value) -> Self {
        self.embeddings.push(StoredEmbedding { user_id: user_id.into(), payload });
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users.insert(user.user_id.clone(), user);
        self
    }

    pub fn failing_add_for(mut self, user_id: &str) -> Self {
        self.fail_add_for.insert(user_id.into());
        self
    }

    /// Seed `n` records for `user_id` dated today.
    pub fn with_records_today(self, user_id: &str, n: usize) -> Self {
        {
            let mut records = self.records.lock().unwrap();
            for i in 0..n {
                records.push(AttendanceRecord {
                    record_id: format!("seed-{user_id}-{i}"),
                    user_id: user_id.into(),
                    user_name: user_id.into(),
                    date: today(),
                    time: now().time(),
                    confidence: 0.9,
                    liveness_verified: true,
                    quality_score: 0.9,
                    processing_time_ms: 1,
                    verification_stage: "completed".into(),
                    session_id: "seed".into(),
                    device_info: None,
                    location: None,
                });
            }
        }
        self
    }

    pub fn saved(&self) -> Vec<AttendanceRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl KnownEmbeddingsStore for MemoryStore {
    fn get_all(&self) -> Result<Vec<StoredEmbedding>, StoreError> {
        if self.embeddings_unavailable {
            return Err(StoreError::Unavailable("embeddings offline".into()));
        }
        Ok(self.embeddings.clone())
    }
}

impl UserStore for MemoryStore {
    fn get(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(user_id).cloned())
    }
}

impl AttendanceStore for MemoryStore {
    fn add(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        if self.fail_add_for.contains(&record.user_id) {
            return Err(StoreError::Query("simulated write failure".into()));
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn history(&self, user_id: &str, range: &DateRange) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.user_id == user_id && range.contains(r.date))
            .cloned()
            .collect())
    }
}
