//! Blink-challenge liveness: the threshold verifier and the frame-level service.

use crate::blink::BlinkCounter;
use crate::config::PipelineConfig;
use crate::error::{LivenessError, LivenessMethod};
use crate::landmarks::{validate_frame, LandmarkExtractor};
use crate::types::FaceLandmarkSet;
use image::DynamicImage;
use serde::Serialize;

/// Applies the blink threshold to a landmark sequence.
pub struct LivenessVerifier {
    counter: BlinkCounter,
}

impl LivenessVerifier {
    pub fn new(counter: BlinkCounter) -> Self {
        Self { counter }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(BlinkCounter::from_config(config))
    }

    /// Blinks counted by the last [`verify`](Self::verify) call.
    pub fn blinks(&self) -> usize {
        self.counter.count()
    }

    /// Count blinks across `landmarks` and compare against `min_blinks`.
    ///
    /// Empty input is `Ok(false)`. Mismatched lengths are an error. Frames
    /// whose landmarks the counter rejects are skipped.
    pub fn verify<F>(
        &mut self,
        frames: &[F],
        landmarks: &[Option<FaceLandmarkSet>],
        min_blinks: usize,
    ) -> Result<bool, LivenessError> {
        if frames.len() != landmarks.len() {
            return Err(LivenessError::LengthMismatch {
                frames: frames.len(),
                landmarks: landmarks.len(),
            });
        }

        self.counter.reset();
        if frames.is_empty() {
            return Ok(false);
        }

        let mut skipped = 0usize;
        for (index, lm) in landmarks.iter().enumerate() {
            if let Err(err) = self.counter.observe(lm.as_ref()) {
                skipped += 1;
                tracing::debug!(frame = index, error = %err, "skipping frame in blink count");
            }
        }

        let blinks = self.counter.count();
        tracing::debug!(frames = frames.len(), skipped, blinks, min_blinks, "blink count complete");
        Ok(blinks >= min_blinks)
    }
}

/// Accepted liveness decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessOutcome {
    pub method: LivenessMethod,
    /// Server-side blink count; `None` when the trust shortcut was taken.
    pub blinks: Option<usize>,
    pub frames_with_landmarks: usize,
    pub total_frames: usize,
}

/// Turns raw frames into a liveness decision.
///
/// When the client reports at least `trust_shortcut_blinks` blinks, the
/// service only checks that some frame carries a real face and accepts the
/// claim. Otherwise it recounts blinks server-side.
pub struct LivenessService<'a> {
    extractor: &'a mut dyn LandmarkExtractor,
    config: &'a PipelineConfig,
}

impl<'a> LivenessService<'a> {
    pub fn new(extractor: &'a mut dyn LandmarkExtractor, config: &'a PipelineConfig) -> Self {
        Self { extractor, config }
    }

    pub fn verify(
        &mut self,
        frames: &[DynamicImage],
        frontend_blink_count: Option<u32>,
    ) -> Result<LivenessOutcome, LivenessError> {
        if frames.is_empty() {
            return Err(LivenessError::NoFrames);
        }
        for frame in frames {
            validate_frame(frame)?;
        }

        let landmarks = self.extract_all(frames);
        let point_count = self.config.eye_layout.point_count;
        let frames_with_landmarks = landmarks
            .iter()
            .flatten()
            .filter(|lm| lm.len() == point_count)
            .count();

        match frontend_blink_count {
            Some(reported) if reported >= self.config.trust_shortcut_blinks => {
                if frames_with_landmarks == 0 {
                    tracing::warn!(
                        reported,
                        frames = frames.len(),
                        "client blink count rejected: no frame contains a face"
                    );
                    return Err(LivenessError::Failed {
                        method: LivenessMethod::TrustShortcut,
                        blinks: None,
                    });
                }
                tracing::info!(
                    reported,
                    frames_with_landmarks,
                    "liveness accepted via client blink count"
                );
                Ok(LivenessOutcome {
                    method: LivenessMethod::TrustShortcut,
                    blinks: None,
                    frames_with_landmarks,
                    total_frames: frames.len(),
                })
            }
            _ => {
                let mut verifier = LivenessVerifier::from_config(self.config);
                let passed = verifier.verify(frames, &landmarks, self.config.min_blinks)?;
                let blinks = verifier.blinks();
                if !passed {
                    tracing::info!(blinks, min = self.config.min_blinks, "liveness recount failed");
                    return Err(LivenessError::Failed {
                        method: LivenessMethod::FullRecount,
                        blinks: Some(blinks),
                    });
                }
                tracing::info!(blinks, "liveness verified by recount");
                Ok(LivenessOutcome {
                    method: LivenessMethod::FullRecount,
                    blinks: Some(blinks),
                    frames_with_landmarks,
                    total_frames: frames.len(),
                })
            }
        }
    }

    fn extract_all(&mut self, frames: &[DynamicImage]) -> Vec<Option<FaceLandmarkSet>> {
        frames
            .iter()
            .enumerate()
            .map(|(index, frame)| match self.extractor.extract(frame) {
                Ok(lm) => lm,
                Err(err) => {
                    tracing::warn!(frame = index, error = %err, "landmark extraction rejected frame");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EyeLayout;
    use crate::error::LandmarkError;
    use image::RgbImage;
    use std::collections::VecDeque;

    fn landmarks_with_ear(ear: f32) -> FaceLandmarkSet {
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

    fn sequence(ears: &[f32]) -> Vec<Option<FaceLandmarkSet>> {
        ears.iter().map(|&e| Some(landmarks_with_ear(e))).collect()
    }

    fn verifier() -> LivenessVerifier {
        LivenessVerifier::new(BlinkCounter::new(0.2, EyeLayout::dlib68()))
    }

    struct Scripted {
        queue: VecDeque<Option<FaceLandmarkSet>>,
        calls: usize,
    }

    impl LandmarkExtractor for Scripted {
        fn extract(&mut self, _image: &DynamicImage) -> Result<Option<FaceLandmarkSet>, LandmarkError> {
            self.calls += 1;
            Ok(self.queue.pop_front().flatten())
        }
    }

    fn frames(n: usize) -> Vec<DynamicImage> {
        (0..n).map(|_| DynamicImage::ImageRgb8(RgbImage::new(8, 8))).collect()
    }

    #[test]
    fn test_verify_empty_is_false() {
        let empty: Vec<()> = vec![];
        assert_eq!(verifier().verify(&empty, &[], 3), Ok(false));
    }

    #[test]
    fn test_verify_length_mismatch_errors() {
        let lms = sequence(&[0.3, 0.1]);
        assert!(matches!(
            verifier().verify(&[(), (), ()], &lms, 3),
            Err(LivenessError::LengthMismatch { frames: 3, landmarks: 2 })
        ));
    }

    #[test]
    fn test_single_blink_below_minimum() {
        let lms = sequence(&[0.3, 0.15, 0.15, 0.3, 0.3]);
        let mut v = verifier();
        assert_eq!(v.verify(&vec![(); 5], &lms, 3), Ok(false));
        assert_eq!(v.blinks(), 1);
    }

    #[test]
    fn test_three_blinks_pass() {
        let lms = sequence(&[0.3, 0.1, 0.3, 0.1, 0.3, 0.1, 0.1, 0.3]);
        let mut v = verifier();
        assert_eq!(v.verify(&vec![(); 8], &lms, 3), Ok(true));
        assert_eq!(v.blinks(), 3);
    }

    #[test]
    fn test_corrupt_frames_skipped() {
        let mut lms = sequence(&[0.3, 0.1, 0.3, 0.1, 0.3, 0.1, 0.3]);
        lms.insert(2, Some(FaceLandmarkSet::new(vec![(0.1, 0.1); 3])));
        lms.insert(5, None);
        let mut v = verifier();
        assert_eq!(v.verify(&vec![(); lms.len()], &lms, 3), Ok(true));
    }

    #[test]
    fn test_verifier_resets_between_calls() {
        let mut v = verifier();
        let lms = sequence(&[0.3, 0.1, 0.3, 0.1, 0.3, 0.1, 0.3]);
        assert_eq!(v.verify(&vec![(); 7], &lms, 3), Ok(true));
        let lms = sequence(&[0.3, 0.1, 0.3]);
        assert_eq!(v.verify(&vec![(); 3], &lms, 3), Ok(false));
        assert_eq!(v.blinks(), 1);
    }

    #[test]
    fn test_service_requires_frames() {
        let mut ext = Scripted { queue: VecDeque::new(), calls: 0 };
        let config = PipelineConfig::default();
        let mut svc = LivenessService::new(&mut ext, &config);
        assert_eq!(svc.verify(&[], Some(5)), Err(LivenessError::NoFrames));
    }

    #[test]
    fn test_service_rejects_non_rgb_frame() {
        let mut ext = Scripted { queue: VecDeque::new(), calls: 0 };
        let config = PipelineConfig::default();
        let gray = vec![DynamicImage::ImageLuma8(image::GrayImage::new(8, 8))];
        let result = LivenessService::new(&mut ext, &config).verify(&gray, None);
        assert!(matches!(result, Err(LivenessError::InvalidFrame(_))));
        assert_eq!(ext.calls, 0);
    }

    #[test]
    fn test_failure_message_is_wire_text() {
        let mut ext = Scripted { queue: sequence(&[0.3, 0.3]).into(), calls: 0 };
        let config = PipelineConfig::default();
        let err = LivenessService::new(&mut ext, &config)
            .verify(&frames(2), None)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to verify Liveness and we detected less than 3 blinks"
        );
    }
}
