//! Single-subject recognition gate: detect, assess, match, check eligibility,
//! resolve profile. Steps run in that order and stop at the first failure.
//!
//! Eligibility runs before any liveness challenge so a subject who is over
//! the daily limit is rejected without the expensive blink capture.

use crate::config::PipelineConfig;
use crate::eligibility::check_eligibility;
use crate::error::AttendanceError;
use crate::gallery::{CosineMatcher, Gallery, Matcher};
use crate::landmarks::validate_frame;
use crate::ports::{
    AttendanceStore, Clock, EmbeddingExtractor, FaceDetector, KnownEmbeddingsStore,
    QualityAssessor, UserStore,
};
use crate::record::{Stage, User};
use crate::response::{elapsed_ms, PipelineResponse};
use crate::types::{BoundingBox, EligibilityDecision, RecognitionResult};
use image::DynamicImage;
use serde::Serialize;
use std::time::Instant;

pub struct RecognitionRequest {
    pub frame: DynamicImage,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognitionOutcome {
    pub recognition: RecognitionResult,
    pub user: User,
    /// True when the user store had no profile and a stub was substituted.
    pub profile_fallback: bool,
    pub eligibility: EligibilityDecision,
    pub quality_score: f32,
    pub face: BoundingBox,
}

pub struct RecognitionGate<'a> {
    detector: &'a mut dyn FaceDetector,
    quality: &'a dyn QualityAssessor,
    extractor: &'a mut dyn EmbeddingExtractor,
    known: &'a dyn KnownEmbeddingsStore,
    users: &'a dyn UserStore,
    attendance: &'a dyn AttendanceStore,
    clock: &'a dyn Clock,
    config: &'a PipelineConfig,
}

impl<'a> RecognitionGate<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: &'a mut dyn FaceDetector,
        quality: &'a dyn QualityAssessor,
        extractor: &'a mut dyn EmbeddingExtractor,
        known: &'a dyn KnownEmbeddingsStore,
        users: &'a dyn UserStore,
        attendance: &'a dyn AttendanceStore,
        clock: &'a dyn Clock,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            detector,
            quality,
            extractor,
            known,
            users,
            attendance,
            clock,
            config,
        }
    }

    pub fn execute(&mut self, request: &RecognitionRequest) -> PipelineResponse<RecognitionOutcome> {
        let started = Instant::now();
        let mut stage = Stage::Validation;
        let result = self.run(&request.frame, &mut stage);
        if let Err(err) = &result {
            tracing::info!(stage = %stage, reason = err.reason_code(), error = %err, "recognition gate rejected");
        }
        PipelineResponse::from_result(result, stage, elapsed_ms(started))
    }

    /// Run the gate, updating `stage` as each step starts.
    pub fn run(&mut self, frame: &DynamicImage, stage: &mut Stage) -> Result<RecognitionOutcome, AttendanceError> {
        *stage = Stage::Validation;
        validate_frame(frame).map_err(|e| AttendanceError::InputValidation(e.to_string()))?;
        let rgb = frame.to_rgb8();

        *stage = Stage::Detection;
        let detection = self.detector.detect(&rgb)?;
        let face = *detection
            .best()
            .ok_or_else(|| AttendanceError::Detection("no face found in frame".into()))?;
        let crop = face
            .crop(&rgb)
            .ok_or_else(|| AttendanceError::Detection("face box lies outside the frame".into()))?;
        tracing::debug!(faces = detection.boxes.len(), confidence = face.confidence, "face detected");

        *stage = Stage::QualityAssessment;
        let quality_score = self.quality.assess(&crop)?.overall_score;
        if quality_score < self.config.min_quality_score {
            return Err(AttendanceError::Quality {
                score: quality_score,
                minimum: self.config.min_quality_score,
            });
        }

        *stage = Stage::Recognition;
        let embedding = self.extractor.extract(&crop)?;
        let gallery = Gallery::load(self.known).map_err(AttendanceError::Store)?;
        let threshold = self.config.recognition_threshold;
        let matched = CosineMatcher.compare(&embedding, &gallery, threshold);
        let best = matched.similarity;
        let recognition = matched
            .into_recognition()
            .ok_or(AttendanceError::Recognition { best, threshold })?;
        tracing::info!(
            user_id = %recognition.user_id,
            confidence = recognition.confidence,
            "face recognized"
        );

        *stage = Stage::Eligibility;
        let today = self.clock.now().date();
        let eligibility = check_eligibility(
            self.attendance,
            &recognition.user_id,
            today,
            self.config.daily_limit,
        )
        .map_err(AttendanceError::Store)?;
        if !eligibility.allowed {
            return Err(AttendanceError::Eligibility {
                user_id: recognition.user_id.clone(),
                count: eligibility.today_count,
                limit: eligibility.daily_limit,
            });
        }

        *stage = Stage::Profile;
        let (user, profile_fallback) = self.resolve_profile(&recognition);

        *stage = Stage::Completed;

        Ok(RecognitionOutcome {
            recognition,
            user,
            profile_fallback,
            eligibility,
            quality_score,
            face,
        })
    }

    /// Look up the full profile, falling back to a stub built from the match.
    /// Never fails.
    fn resolve_profile(&self, recognition: &RecognitionResult) -> (User, bool) {
        match self.users.get(&recognition.user_id) {
            Ok(Some(user)) => (user, false),
            Ok(None) => {
                tracing::warn!(user_id = %recognition.user_id, "no profile for enrolled embedding; using stub");
                (User::stub(&recognition.user_id, &recognition.user_name), true)
            }
            Err(err) => {
                tracing::warn!(user_id = %recognition.user_id, error = %err, "profile lookup failed; using stub");
                (User::stub(&recognition.user_id, &recognition.user_name), true)
            }
        }
    }
}
