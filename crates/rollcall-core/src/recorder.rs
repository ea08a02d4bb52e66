//! Single-subject attendance recorder: liveness, then record creation and save.

use crate::config::PipelineConfig;
use crate::eligibility::check_eligibility;
use crate::error::AttendanceError;
use crate::landmarks::LandmarkExtractor;
use crate::liveness::LivenessService;
use crate::ports::{AttendanceStore, Clock};
use crate::recognition::RecognitionOutcome;
use crate::record::{new_session_id, AttendanceRecord, NewRecord, Stage};
use crate::response::{elapsed_ms, PipelineResponse};
use image::DynamicImage;
use std::time::Instant;

/// Inputs for recording one subject's attendance after recognition.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub frames: Vec<DynamicImage>,
    pub user_id: String,
    pub user_name: String,
    pub confidence: f32,
    pub quality_score: f32,
    /// Blink count reported by the client, if it ran its own challenge.
    pub frontend_blink_count: Option<u32>,
    /// Time already spent upstream (recognition gate), added to the record.
    pub prior_processing_ms: u64,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

impl RecordRequest {
    /// Build a request from a successful gate outcome.
    pub fn from_recognition(
        outcome: &RecognitionOutcome,
        frames: Vec<DynamicImage>,
        frontend_blink_count: Option<u32>,
        prior_processing_ms: u64,
    ) -> Self {
        Self {
            frames,
            user_id: outcome.user.user_id.clone(),
            user_name: outcome.user.name.clone(),
            confidence: outcome.recognition.confidence,
            quality_score: outcome.quality_score,
            frontend_blink_count,
            prior_processing_ms,
            device_info: None,
            location: None,
        }
    }
}

pub struct AttendanceRecorder<'a> {
    landmarks: &'a mut dyn LandmarkExtractor,
    attendance: &'a dyn AttendanceStore,
    clock: &'a dyn Clock,
    config: &'a PipelineConfig,
    enforce_daily_limit: bool,
}

impl<'a> AttendanceRecorder<'a> {
    pub fn new(
        landmarks: &'a mut dyn LandmarkExtractor,
        attendance: &'a dyn AttendanceStore,
        clock: &'a dyn Clock,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            landmarks,
            attendance,
            clock,
            config,
            enforce_daily_limit: false,
        }
    }

    /// Check the daily limit before the liveness challenge. Needed when the
    /// request did not come through [`crate::RecognitionGate`], which already
    /// performs this check.
    pub fn with_daily_limit(mut self) -> Self {
        self.enforce_daily_limit = true;
        self
    }

    pub fn execute(&mut self, request: &RecordRequest) -> PipelineResponse<AttendanceRecord> {
        let started = Instant::now();
        let mut stage = Stage::Validation;
        let result = self.run(request, &mut stage, started);
        let total_ms = request.prior_processing_ms.saturating_add(elapsed_ms(started));
        match &result {
            Ok(record) => tracing::info!(
                record_id = %record.record_id,
                user_id = %record.user_id,
                "attendance recorded"
            ),
            Err(err) => tracing::info!(
                user_id = %request.user_id,
                stage = %stage,
                reason = err.reason_code(),
                error = %err,
                "attendance not recorded"
            ),
        }
        PipelineResponse::from_result(result, stage, total_ms)
    }

    fn run(
        &mut self,
        request: &RecordRequest,
        stage: &mut Stage,
        started: Instant,
    ) -> Result<AttendanceRecord, AttendanceError> {
        *stage = Stage::Validation;
        if request.frames.is_empty() {
            return Err(AttendanceError::InputValidation("no frames supplied".into()));
        }
        if request.user_id.trim().is_empty() {
            return Err(AttendanceError::InputValidation("user_id is empty".into()));
        }
        if request.user_name.trim().is_empty() {
            return Err(AttendanceError::InputValidation("user_name is empty".into()));
        }
        unit_interval("confidence", request.confidence)?;
        unit_interval("quality_score", request.quality_score)?;

        if self.enforce_daily_limit {
            *stage = Stage::Eligibility;
            let eligibility = check_eligibility(
                self.attendance,
                &request.user_id,
                self.clock.now().date(),
                self.config.daily_limit,
            )
            .map_err(AttendanceError::Store)?;
            if !eligibility.allowed {
                return Err(AttendanceError::Eligibility {
                    user_id: request.user_id.clone(),
                    count: eligibility.today_count,
                    limit: eligibility.daily_limit,
                });
            }
        }

        *stage = Stage::LivenessVerification;
        let outcome = LivenessService::new(&mut *self.landmarks, self.config)
            .verify(&request.frames, request.frontend_blink_count)?;
        tracing::debug!(method = ?outcome.method, blinks = ?outcome.blinks, "liveness passed");

        *stage = Stage::CreatingAttendanceRecord;
        let session_id = new_session_id();
        let processing_time_ms = request.prior_processing_ms.saturating_add(elapsed_ms(started));
        let record = AttendanceRecord::create(
            NewRecord {
                user_id: &request.user_id,
                user_name: &request.user_name,
                confidence: request.confidence,
                liveness_verified: true,
                quality_score: request.quality_score,
                processing_time_ms,
                verification_stage: Stage::Completed.as_str(),
                session_id: &session_id,
                device_info: request.device_info.as_deref(),
                location: request.location.as_deref(),
            },
            self.clock.now(),
        );
        self.attendance
            .add(&record)
            .map_err(AttendanceError::Persistence)?;

        *stage = Stage::Completed;
        Ok(record)
    }
}

fn unit_interval(field: &str, value: f32) -> Result<(), AttendanceError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AttendanceError::InputValidation(format!("{field} must be within [0, 1], got {value}")))
    }
}
