//! Per-frame facial landmark extraction contract.

use crate::error::LandmarkError;
use crate::types::FaceLandmarkSet;
use image::DynamicImage;

/// Extracts normalized facial landmarks from one frame.
///
/// Implementations must be stateless across calls: each frame is processed
/// on its own, with no memory of earlier frames. Invalid input (empty or
/// non-3-channel images) is an error; a frame with no face, or any internal
/// extraction failure, is `Ok(None)` so callers iterating a sequence can
/// treat it as a skipped frame.
pub trait LandmarkExtractor {
    fn extract(&mut self, image: &DynamicImage) -> Result<Option<FaceLandmarkSet>, LandmarkError>;
}

/// Reject images a landmark or face model cannot consume.
pub fn validate_frame(image: &DynamicImage) -> Result<(), LandmarkError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(LandmarkError::InvalidInput(format!(
            "empty image ({}x{})",
            image.width(),
            image.height()
        )));
    }
    let channels = image.color().channel_count();
    if channels != 3 {
        return Err(LandmarkError::InvalidInput(format!(
            "expected a 3-channel image, got {channels} channel(s) ({:?})",
            image.color()
        )));
    }
    Ok(())
}

/// Keep only points inside the unit square; anything else means the model
/// produced garbage for this frame.
pub fn normalized_or_none(points: Vec<(f32, f32)>) -> Option<FaceLandmarkSet> {
    let in_range = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
    if points.is_empty() || !points.iter().all(|&(x, y)| in_range(x) && in_range(y)) {
        return None;
    }
    Some(FaceLandmarkSet::new(points))
}
