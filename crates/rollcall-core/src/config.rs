use serde::{Deserialize, Serialize};

/// Landmark indices used to compute eye openness.
///
/// Each eye is six points in EAR order: outer corner, two upper-lid points,
/// inner corner, two lower-lid points (p1..p6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyeLayout {
    /// Points every landmark set must carry.
    pub point_count: usize,
    pub left_eye: [usize; 6],
    pub right_eye: [usize; 6],
}

impl EyeLayout {
    /// The 68-point iBUG/dlib layout (eyes at 36..=41 and 42..=47).
    pub const fn dlib68() -> Self {
        Self {
            point_count: 68,
            left_eye: [36, 37, 38, 39, 40, 41],
            right_eye: [42, 43, 44, 45, 46, 47],
        }
    }
}

impl Default for EyeLayout {
    fn default() -> Self {
        Self::dlib68()
    }
}

/// Tunables for the recognition, liveness and attendance pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum match confidence for a positive identification.
    pub recognition_threshold: f32,
    /// Minimum face-crop quality score.
    pub min_quality_score: f32,
    /// Maximum attendance records per user per day.
    pub daily_limit: usize,
    /// Blinks the server-side recount must observe.
    pub min_blinks: usize,
    /// Client-reported blink count at or above which the trust shortcut applies.
    pub trust_shortcut_blinks: u32,
    /// Eye aspect ratio below which an eye counts as closed.
    pub ear_closed_threshold: f32,
    pub eye_layout: EyeLayout,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recognition_threshold: 0.5,
            min_quality_score: 0.3,
            daily_limit: 5,
            min_blinks: 3,
            trust_shortcut_blinks: 3,
            ear_closed_threshold: 0.21,
            eye_layout: EyeLayout::dlib68(),
        }
    }
}
