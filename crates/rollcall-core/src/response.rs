use crate::error::AttendanceError;
use crate::record::Stage;
use serde::Serialize;

/// Envelope returned by every pipeline `execute` call.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    /// Stable failure code, see [`AttendanceError::reason_code`].
    pub reason: Option<String>,
    /// Stage reached when the response was produced.
    pub stage: Stage,
    pub processing_time_ms: u64,
}

impl<T> PipelineResponse<T> {
    pub fn ok(data: T, stage: Stage, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            reason: None,
            stage,
            processing_time_ms,
        }
    }

    pub fn failed(err: &AttendanceError, stage: Stage, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            reason: Some(err.reason_code().to_string()),
            stage,
            processing_time_ms,
        }
    }

    /// Re-type a failed response, dropping any payload.
    pub fn into_failure<U>(self) -> PipelineResponse<U> {
        PipelineResponse {
            success: false,
            data: None,
            error: self.error,
            reason: self.reason,
            stage: self.stage,
            processing_time_ms: self.processing_time_ms,
        }
    }

    pub fn from_result(result: Result<T, AttendanceError>, stage: Stage, processing_time_ms: u64) -> Self {
        match result {
            Ok(data) => Self::ok(data, stage, processing_time_ms),
            Err(err) => Self::failed(&err, stage, processing_time_ms),
        }
    }
}

/// Milliseconds since `started`, saturating.
pub fn elapsed_ms(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
