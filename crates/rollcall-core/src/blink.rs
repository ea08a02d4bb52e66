//! Blink counting from per-frame landmarks.
//!
//! Eye openness is the eye aspect ratio (EAR) averaged over both eyes:
//!
//! ```text
//! EAR = (|p2 - p6| + |p3 - p5|) / (2 * |p1 - p4|)
//! ```
//!
//! A blink is counted on the closed→open edge, so any run of consecutive
//! closed frames contributes exactly one blink.

use crate::config::{EyeLayout, PipelineConfig};
use crate::error::BlinkError;
use crate::types::FaceLandmarkSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeState {
    Open,
    Closed,
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Eye aspect ratio for six points ordered p1..p6.
pub fn eye_aspect_ratio(eye: &[(f32, f32); 6]) -> Result<f32, BlinkError> {
    let horizontal = distance(eye[0], eye[3]);
    if !horizontal.is_finite() || horizontal <= f32::EPSILON {
        return Err(BlinkError::DegenerateEye(format!(
            "eye width {horizontal} is not positive"
        )));
    }
    let vertical = distance(eye[1], eye[5]) + distance(eye[2], eye[4]);
    let ear = vertical / (2.0 * horizontal);
    if !ear.is_finite() {
        return Err(BlinkError::DegenerateEye("non-finite aspect ratio".into()));
    }
    Ok(ear)
}

/// Average EAR across both eyes of one landmark set.
pub fn eye_openness(landmarks: &FaceLandmarkSet, layout: &EyeLayout) -> Result<f32, BlinkError> {
    if landmarks.len() != layout.point_count {
        return Err(BlinkError::MalformedLandmarks {
            expected: layout.point_count,
            actual: landmarks.len(),
        });
    }
    let gather = |indices: &[usize; 6]| -> Result<[(f32, f32); 6], BlinkError> {
        let mut eye = [(0.0f32, 0.0f32); 6];
        for (slot, &idx) in eye.iter_mut().zip(indices.iter()) {
            *slot = landmarks.point(idx).ok_or(BlinkError::MalformedLandmarks {
                expected: idx + 1,
                actual: landmarks.len(),
            })?;
        }
        Ok(eye)
    };

    let left = eye_aspect_ratio(&gather(&layout.left_eye)?)?;
    let right = eye_aspect_ratio(&gather(&layout.right_eye)?)?;
    Ok((left + right) / 2.0)
}

/// OPEN/CLOSED state machine producing a running blink count.
///
/// One instance belongs to one verification call. Call [`reset`](Self::reset)
/// or build a fresh counter before reusing it for another subject.
#[derive(Debug, Clone)]
pub struct BlinkCounter {
    state: EyeState,
    count: usize,
    closed_threshold: f32,
    layout: EyeLayout,
}

impl BlinkCounter {
    pub fn new(closed_threshold: f32, layout: EyeLayout) -> Self {
        Self {
            state: EyeState::Open,
            count: 0,
            closed_threshold,
            layout,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.ear_closed_threshold, config.eye_layout.clone())
    }

    pub fn reset(&mut self) {
        self.state = EyeState::Open;
        self.count = 0;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn state(&self) -> EyeState {
        self.state
    }

    /// Feed one frame. `None` (no face) leaves the state untouched.
    ///
    /// Returns `Ok(true)` iff this frame completed a blink. A malformed
    /// landmark set is an error and leaves the state untouched.
    pub fn observe(&mut self, landmarks: Option<&FaceLandmarkSet>) -> Result<bool, BlinkError> {
        let Some(landmarks) = landmarks else {
            return Ok(false);
        };
        let openness = eye_openness(landmarks, &self.layout)?;
        Ok(self.observe_openness(openness))
    }

    /// Advance the state machine with a precomputed openness score.
    pub fn observe_openness(&mut self, openness: f32) -> bool {
        let closed = openness < self.closed_threshold;
        match (self.state, closed) {
            (EyeState::Open, true) => {
                self.state = EyeState::Closed;
                false
            }
            (EyeState::Closed, false) => {
                self.state = EyeState::Open;
                self.count += 1;
                tracing::trace!(openness, count = self.count, "blink completed");
                true
            }
            _ => false,
        }
    }
}
