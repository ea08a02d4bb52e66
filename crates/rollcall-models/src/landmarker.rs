//! 68-point facial landmarks via ONNX Runtime.
//!
//! Finds the most confident face with SCRFD, takes a square crop around it
//! with some margin, and runs a 68-point regressor (dlib ordering) on the
//! 112×112 crop. The regressor emits 136 values, `(x, y)` pairs normalized
//! to the crop, which are mapped back into full-frame unit coordinates.

use crate::detector::{DetectorError, ScrfdDetector};
use crate::tensor::to_nchw;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::landmarks::{normalized_or_none, validate_frame};
use rollcall_core::{BoundingBox, FaceLandmarkSet, LandmarkError, LandmarkExtractor};
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 112;
const LANDMARK_POINTS: usize = 68;
/// Fraction of the face box added on every side before cropping.
const CROP_MARGIN: f32 = 0.2;

#[derive(Error, Debug)]
pub enum LandmarkModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Square crop region in source-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropRegion {
    x: u32,
    y: u32,
    side: u32,
}

pub struct FaceLandmarker {
    detector: ScrfdDetector,
    session: Session,
}

impl FaceLandmarker {
    /// Load the landmark model; face localization reuses an SCRFD detector.
    pub fn load(model_path: &str, detector: ScrfdDetector) -> Result<Self, LandmarkModelError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded 68-point landmark model");
        Ok(Self { detector, session })
    }

    fn landmarks(&mut self, rgb: &RgbImage) -> Result<Option<FaceLandmarkSet>, LandmarkModelError> {
        let boxes = self.detector.detect_boxes(rgb)?;
        let Some(face) = boxes.first() else {
            return Ok(None);
        };
        let Some(region) = square_region(face, rgb.width(), rgb.height()) else {
            return Ok(None);
        };

        let crop = image::imageops::crop_imm(rgb, region.x, region.y, region.side, region.side).to_image();
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;

        if raw.len() < LANDMARK_POINTS * 2 {
            tracing::debug!(values = raw.len(), "landmark output too short");
            return Ok(None);
        }
        let points = to_frame_points(&raw[..LANDMARK_POINTS * 2], region, rgb.width(), rgb.height());
        Ok(normalized_or_none(points))
    }
}

impl LandmarkExtractor for FaceLandmarker {
    fn extract(&mut self, image: &DynamicImage) -> Result<Option<FaceLandmarkSet>, LandmarkError> {
        validate_frame(image)?;
        let rgb = image.to_rgb8();
        match self.landmarks(&rgb) {
            Ok(set) => Ok(set),
            Err(e) => {
                tracing::debug!(error = %e, "landmark extraction failed; treating frame as faceless");
                Ok(None)
            }
        }
    }
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(crop, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE, FilterType::Triangle);
    to_nchw(&resized, 0.0, 255.0)
}

/// Square around the face center, grown by the margin and clamped to the frame.
fn square_region(face: &BoundingBox, width: u32, height: u32) -> Option<CropRegion> {
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;
    let half = face.width.max(face.height) * (0.5 + CROP_MARGIN);
    if !(half.is_finite() && half > 0.0) {
        return None;
    }

    let max_side = width.min(height) as f32;
    let side = (half * 2.0).min(max_side);
    let x = (cx - side / 2.0).clamp(0.0, width as f32 - side);
    let y = (cy - side / 2.0).clamp(0.0, height as f32 - side);

    let side = side.floor() as u32;
    if side == 0 {
        return None;
    }
    Some(CropRegion {
        x: x.floor() as u32,
        y: y.floor() as u32,
        side,
    })
}

fn to_frame_points(raw: &[f32], region: CropRegion, width: u32, height: u32) -> Vec<(f32, f32)> {
    let side = region.side as f32;
    raw.chunks_exact(2)
        .map(|xy| {
            let x = (region.x as f32 + xy[0] * side) / width as f32;
            let y = (region.y as f32 + xy[1] * side) / height as f32;
            (x, y)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_square_region_adds_margin() {
        let region = square_region(&face(100.0, 100.0, 50.0, 40.0), 640, 480).unwrap();
        assert_eq!(region.side, 70);
        assert_eq!(region.x, 90);
        assert_eq!(region.y, 85);
    }

    #[test]
    fn test_square_region_clamps_to_frame() {
        let region = square_region(&face(0.0, 0.0, 100.0, 100.0), 120, 90).unwrap();
        assert_eq!(region.side, 90);
        assert_eq!(region.x, 5);
        assert_eq!(region.y, 0);
    }

    #[test]
    fn test_degenerate_face_has_no_region() {
        assert!(square_region(&face(10.0, 10.0, 0.0, 0.0), 100, 100).is_none());
    }

    #[test]
    fn test_points_map_back_to_frame() {
        let region = CropRegion { x: 100, y: 50, side: 100 };
        let points = to_frame_points(&[0.0, 0.0, 0.5, 1.0], region, 400, 200);
        assert_eq!(points, vec![(0.25, 0.25), (0.375, 0.75)]);
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let crop = RgbImage::from_pixel(30, 30, image::Rgb([255, 0, 51]));
        let t = preprocess(&crop);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert!((t[[0, 0, 56, 56]] - 1.0).abs() < 1e-5);
        assert!((t[[0, 2, 56, 56]] - 0.2).abs() < 1e-5);
    }
}
