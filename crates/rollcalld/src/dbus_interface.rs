use crate::config::Config;
use crate::engine::{ClassParams, EngineError, EngineHandle, MarkParams, RecordParams};
use rollcall_store::SqliteStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the rollcall attendance daemon.
///
/// Every pipeline method returns its response envelope as a JSON string:
/// `{success, data, error, reason, stage, processing_time_ms}`. Pipeline
/// failures are reported inside the envelope; D-Bus errors are reserved for
/// the daemon itself being unable to serve the call.
///
/// Empty `device_info` / `location` strings mean "not provided". A
/// `blink_count` of 0 means the client ran no challenge of its own.
pub struct AttendanceService {
    engine: EngineHandle,
    store: Arc<SqliteStore>,
    config: Config,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, store: Arc<SqliteStore>, config: Config) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Recognize the subject in one image and check today's eligibility.
    async fn recognize(&self, image_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(image_path, "recognize requested");
        let resp = self.engine.recognize(PathBuf::from(image_path)).await.map_err(engine_error)?;
        to_json(&resp)
    }

    /// Blink-challenge an already-recognized subject and save the record.
    ///
    /// The caller's `user_id`, `confidence` and `quality_score` are taken as
    /// given: no recognition runs here. Access to this method is bounded by
    /// D-Bus policy on the bus name. The daily limit is still enforced.
    #[allow(clippy::too_many_arguments)]
    async fn record_attendance(
        &self,
        frame_paths: Vec<String>,
        user_id: &str,
        user_name: &str,
        confidence: f64,
        quality_score: f64,
        blink_count: u32,
        device_info: &str,
        location: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(user_id, frames = frame_paths.len(), blink_count, "record_attendance requested");
        let params = RecordParams {
            frames: frame_paths.into_iter().map(PathBuf::from).collect(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            confidence: confidence as f32,
            quality_score: quality_score as f32,
            blink_count: reported(blink_count),
            device_info: provided(device_info),
            location: provided(location),
        };
        let resp = self.engine.record(params).await.map_err(engine_error)?;
        to_json(&resp)
    }

    /// Recognize from the first frame, then blink-challenge and save.
    async fn mark_attendance(
        &self,
        frame_paths: Vec<String>,
        blink_count: u32,
        device_info: &str,
        location: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(frames = frame_paths.len(), blink_count, "mark_attendance requested");
        let params = MarkParams {
            frames: frame_paths.into_iter().map(PathBuf::from).collect(),
            blink_count: reported(blink_count),
            device_info: provided(device_info),
            location: provided(location),
        };
        let resp = self.engine.mark(params).await.map_err(engine_error)?;
        to_json(&resp)
    }

    /// Mark every recognized face in one class photo.
    async fn class_attendance(&self, photo_path: &str, device_info: &str, location: &str) -> zbus::fdo::Result<String> {
        tracing::info!(photo_path, "class_attendance requested");
        let params = ClassParams {
            photo: PathBuf::from(photo_path),
            device_info: provided(device_info),
            location: provided(location),
        };
        let resp = self.engine.class(params).await.map_err(engine_error)?;
        to_json(&resp)
    }

    /// Enroll (or re-enroll) a user from one image.
    async fn enroll(&self, user_id: &str, name: &str, image_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(user_id, image_path, "enroll requested");
        let result = self
            .engine
            .enroll(user_id.to_string(), name.to_string(), PathBuf::from(image_path))
            .await
            .map_err(engine_error)?;
        to_json(&result)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let enrolled = match self.store.enrolled_count() {
            Ok(n) => serde_json::json!(n),
            Err(e) => {
                tracing::warn!(error = %e, "status: enrolled count unavailable");
                serde_json::Value::Null
            }
        };
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "models": {
                "detector": self.config.scrfd_model_path(),
                "recognizer": self.config.arcface_model_path(),
                "landmarks": self.config.landmark_model_path(),
            },
            "db_path": self.config.db_path.display().to_string(),
            "queue_depth": self.engine.queue_depth(),
            "queue_available": self.engine.queue_available(),
            "enrolled": enrolled,
            "pipeline": self.config.pipeline,
        })
        .to_string())
    }
}

fn provided(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn reported(blink_count: u32) -> Option<u32> {
    (blink_count > 0).then_some(blink_count)
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("serialize response: {e}")))
}

fn engine_error(err: EngineError) -> zbus::fdo::Error {
    tracing::warn!(error = %err, "engine request failed");
    match err {
        EngineError::InvalidRequest(_) | EngineError::NoFaceDetected => zbus::fdo::Error::InvalidArgs(err.to_string()),
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}
