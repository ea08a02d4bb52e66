//! Class attendance: one photo, many subjects, best-effort marking.
//!
//! A single photo carries no blink challenge, so this path trusts
//! recognition confidence alone and stamps records with the
//! `class_attendance` stage and `liveness_verified = false`.
//!
//! Every recognized subject is processed independently. A failure for one
//! subject becomes that subject's [`IndividualAttendanceResult`]; it never
//! stops the rest of the batch.

use crate::config::PipelineConfig;
use crate::eligibility::check_eligibility;
use crate::error::AttendanceError;
use crate::gallery::{match_faces, CosineMatcher, Gallery};
use crate::landmarks::validate_frame;
use crate::ports::{AttendanceStore, Clock, EmbeddingExtractor, FaceDetector, KnownEmbeddingsStore, QualityAssessor};
use crate::record::{new_session_id, AttendanceRecord, IndividualAttendanceResult, NewRecord, Stage};
use crate::response::{elapsed_ms, PipelineResponse};
use crate::types::{Embedding, RecognitionResult};
use image::{DynamicImage, RgbImage};
use serde::Serialize;
use std::time::Instant;

pub struct ClassAttendanceRequest {
    pub photo: DynamicImage,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassAttendanceReport {
    pub session_id: String,
    pub total_detected: usize,
    pub total_recognized: usize,
    pub total_marked: usize,
    pub results: Vec<IndividualAttendanceResult>,
}

/// Per-batch context shared by every subject.
struct Batch<'r> {
    session_id: &'r str,
    started: Instant,
    device_info: Option<&'r str>,
    location: Option<&'r str>,
}

pub struct ClassAttendanceOrchestrator<'a> {
    detector: &'a mut dyn FaceDetector,
    quality: &'a dyn QualityAssessor,
    extractor: &'a mut dyn EmbeddingExtractor,
    known: &'a dyn KnownEmbeddingsStore,
    attendance: &'a dyn AttendanceStore,
    clock: &'a dyn Clock,
    config: &'a PipelineConfig,
}

impl<'a> ClassAttendanceOrchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: &'a mut dyn FaceDetector,
        quality: &'a dyn QualityAssessor,
        extractor: &'a mut dyn EmbeddingExtractor,
        known: &'a dyn KnownEmbeddingsStore,
        attendance: &'a dyn AttendanceStore,
        clock: &'a dyn Clock,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            detector,
            quality,
            extractor,
            known,
            attendance,
            clock,
            config,
        }
    }

    pub fn execute(&mut self, request: &ClassAttendanceRequest) -> PipelineResponse<ClassAttendanceReport> {
        let started = Instant::now();
        let mut stage = Stage::Validation;
        let result = self.run(request, &mut stage, started);
        match &result {
            Ok(report) => tracing::info!(
                session_id = %report.session_id,
                detected = report.total_detected,
                recognized = report.total_recognized,
                marked = report.total_marked,
                "class attendance processed"
            ),
            Err(err) => tracing::info!(stage = %stage, reason = err.reason_code(), error = %err, "class attendance failed"),
        }
        PipelineResponse::from_result(result, stage, elapsed_ms(started))
    }

    fn run(
        &mut self,
        request: &ClassAttendanceRequest,
        stage: &mut Stage,
        started: Instant,
    ) -> Result<ClassAttendanceReport, AttendanceError> {
        *stage = Stage::Validation;
        validate_frame(&request.photo).map_err(|e| AttendanceError::InputValidation(e.to_string()))?;
        let rgb = request.photo.to_rgb8();

        *stage = Stage::Detection;
        let detection = self.detector.detect(&rgb)?;
        if !detection.found || detection.boxes.is_empty() {
            return Err(AttendanceError::Detection("no faces found in photo".into()));
        }
        let crops: Vec<Option<RgbImage>> = detection.boxes.iter().map(|b| b.crop(&rgb)).collect();

        *stage = Stage::Recognition;
        let probes = self.embed_slots(&crops);
        let gallery = Gallery::load(self.known).map_err(AttendanceError::Store)?;
        let matches = match_faces(&CosineMatcher, &probes, &gallery, self.config.recognition_threshold);

        *stage = Stage::ClassAttendance;
        let session_id = new_session_id();
        let batch = Batch {
            session_id: &session_id,
            started,
            device_info: request.device_info.as_deref(),
            location: request.location.as_deref(),
        };

        let mut results = Vec::new();
        for (slot, (matched, crop)) in matches.iter().zip(crops.iter()).enumerate() {
            let (Some(matched), Some(crop)) = (matched, crop) else {
                continue;
            };
            let outcome = self.mark_subject(matched, crop, &batch);
            results.push(individual_result(slot, matched, outcome));
        }

        let total_recognized = results.len();
        let total_marked = results.iter().filter(|r| r.success).count();
        *stage = Stage::Completed;
        Ok(ClassAttendanceReport {
            session_id,
            total_detected: detection.boxes.len(),
            total_recognized,
            total_marked,
            results,
        })
    }

    /// Embed each face crop. A slot whose crop or extraction fails stays `None`.
    fn embed_slots(&mut self, crops: &[Option<RgbImage>]) -> Vec<Option<Embedding>> {
        crops
            .iter()
            .enumerate()
            .map(|(slot, crop)| {
                let crop = crop.as_ref()?;
                match self.extractor.extract(crop) {
                    Ok(embedding) => Some(embedding),
                    Err(err) => {
                        tracing::warn!(slot, error = %err, "embedding extraction failed for face slot");
                        None
                    }
                }
            })
            .collect()
    }

    /// Quality, eligibility, then create and save one subject's record.
    fn mark_subject(
        &self,
        matched: &RecognitionResult,
        crop: &RgbImage,
        batch: &Batch<'_>,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let quality_score = self.quality.assess(crop)?.overall_score;
        if quality_score < self.config.min_quality_score {
            return Err(AttendanceError::Quality {
                score: quality_score,
                minimum: self.config.min_quality_score,
            });
        }

        let now = self.clock.now();
        let eligibility = check_eligibility(
            self.attendance,
            &matched.user_id,
            now.date(),
            self.config.daily_limit,
        )
        .map_err(AttendanceError::Store)?;
        if !eligibility.allowed {
            return Err(AttendanceError::Eligibility {
                user_id: matched.user_id.clone(),
                count: eligibility.today_count,
                limit: eligibility.daily_limit,
            });
        }

        let record = AttendanceRecord::create(
            NewRecord {
                user_id: &matched.user_id,
                user_name: &matched.user_name,
                confidence: matched.confidence,
                liveness_verified: false,
                quality_score,
                processing_time_ms: elapsed_ms(batch.started),
                verification_stage: Stage::ClassAttendance.as_str(),
                session_id: batch.session_id,
                device_info: batch.device_info,
                location: batch.location,
            },
            now,
        );
        self.attendance
            .add(&record)
            .map_err(AttendanceError::Persistence)?;
        Ok(record)
    }
}

fn individual_result(
    slot: usize,
    matched: &RecognitionResult,
    outcome: Result<AttendanceRecord, AttendanceError>,
) -> IndividualAttendanceResult {
    match outcome {
        Ok(record) => IndividualAttendanceResult {
            user_id: matched.user_id.clone(),
            user_name: matched.user_name.clone(),
            confidence: matched.confidence,
            success: true,
            error_message: None,
            reason: None,
            record_id: Some(record.record_id),
        },
        Err(err) => {
            tracing::warn!(
                slot,
                user_id = %matched.user_id,
                reason = err.reason_code(),
                error = %err,
                "subject not marked"
            );
            IndividualAttendanceResult {
                user_id: matched.user_id.clone(),
                user_name: matched.user_name.clone(),
                confidence: matched.confidence,
                success: false,
                error_message: Some(err.to_string()),
                reason: Some(err.reason_code().to_string()),
                record_id: None,
            }
        }
    }
}
