mod common;

use common::*;
use rollcall_core::{
    AttendanceRecorder, FaceLandmarkSet, LivenessError, LivenessMethod, LivenessService, MarkAttendance,
    MarkRequest, PipelineConfig, RecognitionGate, RecordRequest, Stage, LIVENESS_FAILURE_MESSAGE,
};
use serde_json::json;

fn record_request(frame_count: usize, blinks: Option<u32>) -> RecordRequest {
    RecordRequest {
        frames: frames(frame_count),
        user_id: "u1".into(),
        user_name: "Ada".into(),
        confidence: 0.93,
        quality_score: 0.8,
        frontend_blink_count: blinks,
        prior_processing_ms: 40,
        device_info: Some("kiosk-1".into()),
        location: Some("Room 101".into()),
    }
}

const THREE_BLINKS: [f32; 8] = [0.3, 0.1, 0.3, 0.1, 0.1, 0.3, 0.12, 0.3];

#[test]
fn test_shortcut_accepts_without_recount() {
    // Eyes never close: a recount would find zero blinks.
    let mut landmarks = MockLandmarks::new(vec![None, Some(landmarks_with_ear(0.3)), None]);
    let config = PipelineConfig::default();
    let outcome = LivenessService::new(&mut landmarks, &config)
        .verify(&frames(3), Some(5))
        .unwrap();

    assert_eq!(outcome.method, LivenessMethod::TrustShortcut);
    assert_eq!(outcome.blinks, None);
    assert_eq!(outcome.frames_with_landmarks, 1);
    assert_eq!(landmarks.calls, 3);
}

#[test]
fn test_shortcut_rejects_frames_without_face() {
    let mut landmarks = MockLandmarks::new(vec![None, None, None]);
    let config = PipelineConfig::default();
    let err = LivenessService::new(&mut landmarks, &config)
        .verify(&frames(3), Some(5))
        .unwrap_err();

    assert_eq!(
        err,
        LivenessError::Failed { method: LivenessMethod::TrustShortcut, blinks: None }
    );
    assert_eq!(err.to_string(), LIVENESS_FAILURE_MESSAGE);
}

#[test]
fn test_shortcut_ignores_landmarks_with_wrong_point_count() {
    let partial = FaceLandmarkSet::new(vec![(0.4, 0.4); 5]);
    let mut landmarks = MockLandmarks::new(vec![Some(partial), None]);
    let config = PipelineConfig::default();
    let err = LivenessService::new(&mut landmarks, &config)
        .verify(&frames(2), Some(5))
        .unwrap_err();

    assert_eq!(
        err,
        LivenessError::Failed { method: LivenessMethod::TrustShortcut, blinks: None }
    );
}

#[test]
fn test_low_client_count_triggers_recount() {
    let mut landmarks = MockLandmarks::new(ear_sequence(&[0.3, 0.1, 0.3, 0.3]));
    let config = PipelineConfig::default();
    let err = LivenessService::new(&mut landmarks, &config)
        .verify(&frames(4), Some(2))
        .unwrap_err();

    assert_eq!(
        err,
        LivenessError::Failed { method: LivenessMethod::FullRecount, blinks: Some(1) }
    );
}

#[test]
fn test_recount_accepts_three_blinks() {
    let mut landmarks = MockLandmarks::new(ear_sequence(&THREE_BLINKS));
    let config = PipelineConfig::default();
    let outcome = LivenessService::new(&mut landmarks, &config)
        .verify(&frames(THREE_BLINKS.len()), None)
        .unwrap();

    assert_eq!(outcome.method, LivenessMethod::FullRecount);
    assert_eq!(outcome.blinks, Some(3));
}

#[test]
fn test_recorder_saves_live_subject() {
    let store = MemoryStore::default();
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut landmarks = MockLandmarks::new(ear_sequence(&THREE_BLINKS));

    let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config)
        .execute(&record_request(THREE_BLINKS.len(), None));

    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(resp.stage, Stage::Completed);
    let record = resp.data.unwrap();
    assert!(record.liveness_verified);
    assert_eq!(record.verification_stage, "completed");
    assert_eq!(record.date, today());
    assert_eq!(record.location.as_deref(), Some("Room 101"));
    assert!(record.processing_time_ms >= 40);
    assert!(resp.processing_time_ms >= 40);
    assert_eq!(store.saved(), vec![record]);
}

#[test]
fn test_recorder_liveness_failure_saves_nothing() {
    let store = MemoryStore::default();
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut landmarks = MockLandmarks::new(ear_sequence(&[0.3, 0.15, 0.15, 0.3, 0.3]));

    let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config)
        .execute(&record_request(5, None));

    assert!(!resp.success);
    assert!(resp.data.is_none());
    assert_eq!(resp.error.as_deref(), Some("Unable to verify Liveness and we detected less than 3 blinks"));
    assert_eq!(resp.reason.as_deref(), Some("liveness_failed"));
    assert_eq!(resp.stage, Stage::LivenessVerification);
    assert!(store.saved().is_empty());
}

#[test]
fn test_recorder_surfaces_save_failure() {
    let store = MemoryStore::default().failing_add_for("u1");
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut landmarks = MockLandmarks::new(vec![Some(landmarks_with_ear(0.3))]);

    let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config)
        .execute(&record_request(1, Some(4)));

    assert!(!resp.success);
    assert_eq!(resp.reason.as_deref(), Some("persistence_failed"));
    assert_eq!(resp.stage, Stage::CreatingAttendanceRecord);
}

#[test]
fn test_recorder_validates_before_liveness() {
    let store = MemoryStore::default();
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut landmarks = MockLandmarks::new(vec![]);

    let mut request = record_request(3, Some(5));
    request.user_name = "  ".into();
    let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config).execute(&request);
    assert_eq!(resp.reason.as_deref(), Some("input_validation"));
    assert_eq!(resp.stage, Stage::Validation);

    let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config)
        .execute(&record_request(0, Some(5)));
    assert_eq!(resp.reason.as_deref(), Some("input_validation"));
    assert_eq!(landmarks.calls, 0);
}

#[test]
fn test_recorder_rejects_scores_outside_unit_interval() {
    let store = MemoryStore::default();
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut landmarks = MockLandmarks::new(vec![Some(landmarks_with_ear(0.3))]);

    for (confidence, quality) in [(f32::NAN, 0.8), (-3.0, 0.8), (1.2, 0.8), (0.9, f32::INFINITY), (0.9, -0.1)] {
        let mut request = record_request(1, Some(5));
        request.confidence = confidence;
        request.quality_score = quality;
        let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config).execute(&request);

        assert!(!resp.success, "accepted confidence={confidence} quality={quality}");
        assert_eq!(resp.reason.as_deref(), Some("input_validation"));
        assert_eq!(resp.stage, Stage::Validation);
    }
    assert_eq!(landmarks.calls, 0);
    assert!(store.saved().is_empty());

    let mut request = record_request(1, Some(5));
    request.confidence = 1.0;
    request.quality_score = 0.0;
    let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config).execute(&request);
    assert!(resp.success);
}

#[test]
fn test_standalone_recorder_enforces_daily_limit() {
    let store = MemoryStore::default().with_records_today("u1", 5);
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut landmarks = MockLandmarks::new(vec![Some(landmarks_with_ear(0.3))]);

    let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config)
        .with_daily_limit()
        .execute(&record_request(1, Some(5)));

    assert!(!resp.success);
    assert_eq!(resp.reason.as_deref(), Some("eligibility_failed"));
    assert_eq!(resp.stage, Stage::Eligibility);
    assert_eq!(landmarks.calls, 0);
    assert_eq!(store.saved().len(), 5);
}

#[test]
fn test_standalone_recorder_below_limit_saves() {
    let store = MemoryStore::default().with_records_today("u1", 4);
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut landmarks = MockLandmarks::new(vec![Some(landmarks_with_ear(0.3))]);

    let resp = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config)
        .with_daily_limit()
        .execute(&record_request(1, Some(5)));

    assert!(resp.success);
    assert_eq!(store.saved().len(), 5);
}

#[test]
fn test_mark_flow_end_to_end() {
    let store = MemoryStore::default()
        .with_embedding("u1", json!({"embeddings": [[1.0, 0.0], [0.9, 0.1]], "name": "Ada"}));
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut detector = MockDetector::new(vec![face(20.0, 50.0, 0.9)]);
    let quality = MockQuality::new(0.7);
    let mut extractor = MockExtractor::new(&[(50, vec![1.0, 0.05])]);
    let mut landmarks = MockLandmarks::new(ear_sequence(&THREE_BLINKS));

    let gate = RecognitionGate::new(
        &mut detector, &quality, &mut extractor, &store, &store, &store, &clock, &config,
    );
    let recorder = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config);
    let resp = MarkAttendance::new(gate, recorder).execute(MarkRequest {
        frames: frames(THREE_BLINKS.len()),
        frontend_blink_count: None,
        device_info: Some("kiosk-2".into()),
        location: None,
    });

    assert!(resp.success, "{:?}", resp.error);
    let record = resp.data.unwrap();
    assert_eq!(record.user_id, "u1");
    assert_eq!(record.user_name, "Ada");
    assert!((record.quality_score - 0.7).abs() < 1e-6);
    assert_eq!(record.device_info.as_deref(), Some("kiosk-2"));
    assert_eq!(store.saved().len(), 1);
}

#[test]
fn test_mark_flow_without_frames() {
    let store = MemoryStore::default();
    let clock = FixedClock(now());
    let config = PipelineConfig::default();
    let mut detector = MockDetector::new(vec![]);
    let quality = MockQuality::new(0.7);
    let mut extractor = MockExtractor::new(&[]);
    let mut landmarks = MockLandmarks::new(vec![]);

    let gate = RecognitionGate::new(
        &mut detector, &quality, &mut extractor, &store, &store, &store, &clock, &config,
    );
    let recorder = AttendanceRecorder::new(&mut landmarks, &store, &clock, &config);
    let resp = MarkAttendance::new(gate, recorder).execute(MarkRequest {
        frames: vec![],
        frontend_blink_count: Some(3),
        device_info: None,
        location: None,
    });

    assert_eq!(resp.reason.as_deref(), Some("input_validation"));
    assert_eq!(detector.calls, 0);
}
