//! Attendance records, user profiles and the per-subject batch outcome.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// A user profile as held by the user store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub active: bool,
}

impl User {
    /// Minimal profile built from a match alone, used when the user store
    /// has no record for an enrolled embedding.
    pub fn stub(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            email: None,
            department: None,
            active: true,
        }
    }
}

/// Inclusive date range used for attendance history lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Processing stage a pipeline response was produced at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Detection,
    QualityAssessment,
    Recognition,
    Eligibility,
    Profile,
    LivenessVerification,
    CreatingAttendanceRecord,
    Completed,
    ClassAttendance,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::Detection => "detection",
            Stage::QualityAssessment => "quality_assessment",
            Stage::Recognition => "recognition",
            Stage::Eligibility => "eligibility",
            Stage::Profile => "profile",
            Stage::LivenessVerification => "liveness_verification",
            Stage::CreatingAttendanceRecord => "creating_attendance_record",
            Stage::Completed => "completed",
            Stage::ClassAttendance => "class_attendance",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted attendance entry. Stores only ever insert these; there is no update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub record_id: String,
    pub user_id: String,
    pub user_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub confidence: f32,
    pub liveness_verified: bool,
    pub quality_score: f32,
    pub processing_time_ms: u64,
    pub verification_stage: String,
    pub session_id: String,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

/// Fields needed to stamp a new [`AttendanceRecord`].
#[derive(Debug, Clone)]
pub struct NewRecord<'a> {
    pub user_id: &'a str,
    pub user_name: &'a str,
    pub confidence: f32,
    pub liveness_verified: bool,
    pub quality_score: f32,
    pub processing_time_ms: u64,
    pub verification_stage: &'a str,
    pub session_id: &'a str,
    pub device_info: Option<&'a str>,
    pub location: Option<&'a str>,
}

impl AttendanceRecord {
    /// Create a record with a fresh id, stamped at `now`.
    pub fn create(fields: NewRecord<'_>, now: NaiveDateTime) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            user_id: fields.user_id.to_string(),
            user_name: fields.user_name.to_string(),
            date: now.date(),
            time: now.time(),
            confidence: fields.confidence.clamp(0.0, 1.0),
            liveness_verified: fields.liveness_verified,
            quality_score: fields.quality_score,
            processing_time_ms: fields.processing_time_ms,
            verification_stage: fields.verification_stage.to_string(),
            session_id: fields.session_id.to_string(),
            device_info: fields.device_info.map(str::to_string),
            location: fields.location.map(str::to_string),
        }
    }
}

/// Outcome for one recognized subject in a class-photo batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualAttendanceResult {
    pub user_id: String,
    pub user_name: String,
    pub confidence: f32,
    pub success: bool,
    pub error_message: Option<String>,
    /// Stable failure code, see [`crate::AttendanceError::reason_code`].
    pub reason: Option<String>,
    pub record_id: Option<String>,
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
