//! Combined single-subject flow: recognition gate, then liveness and record.

use crate::error::AttendanceError;
use crate::recognition::{RecognitionGate, RecognitionRequest};
use crate::record::{AttendanceRecord, Stage};
use crate::recorder::{AttendanceRecorder, RecordRequest};
use crate::response::PipelineResponse;
use image::DynamicImage;

pub struct MarkRequest {
    /// Challenge frames. The first frame is also used for recognition.
    pub frames: Vec<DynamicImage>,
    pub frontend_blink_count: Option<u32>,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

pub struct MarkAttendance<'a> {
    gate: RecognitionGate<'a>,
    recorder: AttendanceRecorder<'a>,
}

impl<'a> MarkAttendance<'a> {
    pub fn new(gate: RecognitionGate<'a>, recorder: AttendanceRecorder<'a>) -> Self {
        Self { gate, recorder }
    }

    pub fn execute(&mut self, request: MarkRequest) -> PipelineResponse<AttendanceRecord> {
        let Some(first) = request.frames.first() else {
            let err = AttendanceError::InputValidation("no frames supplied".into());
            return PipelineResponse::failed(&err, Stage::Validation, 0);
        };

        let gate = self.gate.execute(&RecognitionRequest {
            frame: first.clone(),
        });
        let (stage, prior_ms) = (gate.stage, gate.processing_time_ms);
        if !gate.success {
            return gate.into_failure();
        }
        let Some(outcome) = gate.data else {
            let err = AttendanceError::InputValidation("recognition produced no outcome".into());
            return PipelineResponse::failed(&err, stage, prior_ms);
        };

        let mut record = RecordRequest::from_recognition(
            &outcome,
            request.frames,
            request.frontend_blink_count,
            prior_ms,
        );
        record.device_info = request.device_info;
        record.location = request.location;
        self.recorder.execute(&record)
    }
}
