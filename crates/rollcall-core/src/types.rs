use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Cut this box out of `image`, clamped to the image bounds.
    ///
    /// Returns `None` when the clamped region is empty (box entirely
    /// outside the frame, or zero-sized).
    pub fn crop(&self, image: &RgbImage) -> Option<RgbImage> {
        let (w, h) = image.dimensions();
        let x0 = self.x.clamp(0.0, w as f32) as u32;
        let y0 = self.y.clamp(0.0, h as f32) as u32;
        let x1 = (self.x + self.width).clamp(0.0, w as f32) as u32;
        let y1 = (self.y + self.height).clamp(0.0, h as f32) as u32;

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
    }
}

/// Output of a face detector: every face found in one image, highest confidence first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    pub found: bool,
    pub boxes: Vec<BoundingBox>,
}

impl Detection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_boxes(mut boxes: Vec<BoundingBox>) -> Self {
        boxes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self {
            found: !boxes.is_empty(),
            boxes,
        }
    }

    /// The single most confident face, if any.
    pub fn best(&self) -> Option<&BoundingBox> {
        if !self.found {
            return None;
        }
        self.boxes.first()
    }
}

/// Quality assessment of one face crop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityReport {
    /// Combined quality in [0, 1]. Higher is better.
    pub overall_score: f32,
}

/// Face embedding vector (typically 512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes all dimensions.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Return an L2-normalized copy. Zero vectors are returned unchanged.
    pub fn normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding {
            values,
            model_version: self.model_version.clone(),
        }
    }
}

/// Facial landmarks for one frame: one normalized (x, y) point per feature.
///
/// Point order follows the extractor's layout (68-point dlib ordering by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarkSet {
    points: Vec<(f32, f32)>,
}

impl FaceLandmarkSet {
    pub fn new(points: Vec<(f32, f32)>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<(f32, f32)> {
        self.points.get(index).copied()
    }
}

/// Identity match for one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub user_id: String,
    pub user_name: String,
    /// Match confidence in [0, 1].
    pub confidence: f32,
}

impl RecognitionResult {
    /// Build a result from a raw cosine similarity, clamping into [0, 1].
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, similarity: f32) -> Self {
        let confidence = if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            confidence,
        }
    }
}

/// Whether a subject may have a new attendance record created now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub allowed: bool,
    pub reason: String,
    pub today_count: usize,
    pub daily_limit: usize,
}
