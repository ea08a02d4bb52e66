//! Heuristic face-crop quality scoring.
//!
//! `overall = 0.4 · size + 0.4 · sharpness + 0.2 · exposure`, each term in [0, 1]:
//! - size: shorter crop side relative to [`FULL_SIZE_PX`]
//! - sharpness: variance of the 4-neighbour Laplacian over luma, saturating at [`SHARP_VARIANCE`]
//! - exposure: 1 at mid-grey mean luma, falling linearly to 0 at black or white

use image::RgbImage;
use rollcall_core::{ModelError, QualityAssessor, QualityReport};

const FULL_SIZE_PX: f32 = 112.0;
const SHARP_VARIANCE: f32 = 400.0;
const SIZE_WEIGHT: f32 = 0.4;
const SHARPNESS_WEIGHT: f32 = 0.4;
const EXPOSURE_WEIGHT: f32 = 0.2;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicQualityAssessor;

impl HeuristicQualityAssessor {
    pub fn score(&self, crop: &RgbImage) -> f32 {
        if crop.width() == 0 || crop.height() == 0 {
            return 0.0;
        }
        let luma = luma_plane(crop);
        let (w, h) = (crop.width() as usize, crop.height() as usize);

        let size = (w.min(h) as f32 / FULL_SIZE_PX).min(1.0);
        let sharpness = (laplacian_variance(&luma, w, h) / SHARP_VARIANCE).min(1.0);
        let mean = luma.iter().sum::<f32>() / luma.len() as f32;
        let exposure = 1.0 - ((mean - 127.5).abs() / 127.5);

        (SIZE_WEIGHT * size + SHARPNESS_WEIGHT * sharpness + EXPOSURE_WEIGHT * exposure).clamp(0.0, 1.0)
    }
}

impl QualityAssessor for HeuristicQualityAssessor {
    fn assess(&self, face: &RgbImage) -> Result<QualityReport, ModelError> {
        let overall_score = self.score(face);
        tracing::trace!(overall_score, width = face.width(), height = face.height(), "quality assessed");
        Ok(QualityReport { overall_score })
    }
}

/// BT.601 luma.
fn luma_plane(image: &RgbImage) -> Vec<f32> {
    image
        .pixels()
        .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .collect()
}

fn laplacian_variance(luma: &[f32], w: usize, h: usize) -> f32 {
    if w < 3 || h < 3 {
        return 0.0;
    }
    let mut responses = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = luma[y * w + x];
            let lap = luma[(y - 1) * w + x] + luma[(y + 1) * w + x] + luma[y * w + x - 1]
                + luma[y * w + x + 1]
                - 4.0 * c;
            responses.push(lap);
        }
    }
    let n = responses.len() as f32;
    let mean = responses.iter().sum::<f32>() / n;
    responses.iter().map(|r| (r - mean) * (r - mean)).sum::<f32>() / n
}
