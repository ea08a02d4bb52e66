use crate::config::Config;
use image::DynamicImage;
use rollcall_core::landmarks::validate_frame;
use rollcall_core::response::elapsed_ms;
use rollcall_core::{
    AttendanceError, AttendanceRecord, AttendanceRecorder, ClassAttendanceOrchestrator,
    ClassAttendanceReport, ClassAttendanceRequest, MarkAttendance, MarkRequest, PipelineConfig,
    PipelineResponse, QualityAssessor, RecognitionGate, RecognitionOutcome, RecognitionRequest,
    RecordRequest, Stage, StoreError, SystemClock, User, UserStore,
};
use rollcall_models::{
    DetectorError, FaceLandmarker, FaceRecognizer, HeuristicQualityAssessor, LandmarkModelError,
    RecognizerError, ScrfdDetector,
};
use rollcall_store::SqliteStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("landmark model error: {0}")]
    Landmarks(#[from] LandmarkModelError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no face detected in enrollment image")]
    NoFaceDetected,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment operation.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollResult {
    pub user_id: String,
    pub name: String,
    pub embedding_dim: usize,
    pub face_confidence: f32,
    pub quality_score: f32,
}

/// Record attendance for an already-recognized subject.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub frames: Vec<PathBuf>,
    pub user_id: String,
    pub user_name: String,
    pub confidence: f32,
    pub quality_score: f32,
    pub blink_count: Option<u32>,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MarkParams {
    pub frames: Vec<PathBuf>,
    pub blink_count: Option<u32>,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassParams {
    pub photo: PathBuf,
    pub device_info: Option<String>,
    pub location: Option<String>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Recognize {
        image: PathBuf,
        reply: oneshot::Sender<PipelineResponse<RecognitionOutcome>>,
    },
    Record {
        params: RecordParams,
        reply: oneshot::Sender<PipelineResponse<AttendanceRecord>>,
    },
    Mark {
        params: MarkParams,
        reply: oneshot::Sender<PipelineResponse<AttendanceRecord>>,
    },
    Class {
        params: ClassParams,
        reply: oneshot::Sender<PipelineResponse<ClassAttendanceReport>>,
    },
    Enroll {
        user_id: String,
        name: String,
        image: PathBuf,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Identify the subject in one image and check today's eligibility.
    pub async fn recognize(&self, image: PathBuf) -> Result<PipelineResponse<RecognitionOutcome>, EngineError> {
        self.call(|reply| EngineRequest::Recognize { image, reply }).await
    }

    /// Run the blink challenge on `frames` and save a record.
    pub async fn record(&self, params: RecordParams) -> Result<PipelineResponse<AttendanceRecord>, EngineError> {
        self.call(|reply| EngineRequest::Record { params, reply }).await
    }

    /// Recognition followed by liveness and record creation.
    pub async fn mark(&self, params: MarkParams) -> Result<PipelineResponse<AttendanceRecord>, EngineError> {
        self.call(|reply| EngineRequest::Mark { params, reply }).await
    }

    pub async fn class(&self, params: ClassParams) -> Result<PipelineResponse<ClassAttendanceReport>, EngineError> {
        self.call(|reply| EngineRequest::Class { params, reply }).await
    }

    pub async fn enroll(&self, user_id: String, name: String, image: PathBuf) -> Result<EnrollResult, EngineError> {
        self.call(|reply| EngineRequest::Enroll {
            user_id,
            name,
            image,
            reply,
        })
        .await?
    }

    /// Free slots in the request queue.
    pub fn queue_available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Models, store and settings owned by the engine thread.
struct Engine {
    detector: ScrfdDetector,
    recognizer: FaceRecognizer,
    landmarker: FaceLandmarker,
    quality: HeuristicQualityAssessor,
    store: Arc<SqliteStore>,
    clock: SystemClock,
    pipeline: PipelineConfig,
    device_info: Option<String>,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads all ONNX models up front and fails fast if any is missing, then
/// serves requests one at a time from a bounded queue.
pub fn spawn_engine(config: &Config, store: Arc<SqliteStore>) -> Result<EngineHandle, EngineError> {
    let detector = ScrfdDetector::load(&config.scrfd_model_path())?;
    let recognizer = FaceRecognizer::load(&config.arcface_model_path())?;
    let landmark_detector = ScrfdDetector::load(&config.scrfd_model_path())?;
    let landmarker = FaceLandmarker::load(&config.landmark_model_path(), landmark_detector)?;
    tracing::info!(model_dir = %config.model_dir.display(), "models loaded");

    let mut engine = Engine {
        detector,
        recognizer,
        landmarker,
        quality: HeuristicQualityAssessor,
        store,
        clock: SystemClock,
        pipeline: config.pipeline.clone(),
        device_info: config.device_info.clone(),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(config.queue_depth);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        // A dropped receiver means the D-Bus caller went away; nothing to do.
        match req {
            EngineRequest::Recognize { image, reply } => {
                let _ = reply.send(self.recognize(&image));
            }
            EngineRequest::Record { params, reply } => {
                let _ = reply.send(self.record(params));
            }
            EngineRequest::Mark { params, reply } => {
                let _ = reply.send(self.mark(params));
            }
            EngineRequest::Class { params, reply } => {
                let _ = reply.send(self.class(params));
            }
            EngineRequest::Enroll {
                user_id,
                name,
                image,
                reply,
            } => {
                let _ = reply.send(self.enroll(&user_id, &name, &image));
            }
        }
    }

    fn recognize(&mut self, image: &Path) -> PipelineResponse<RecognitionOutcome> {
        let started = Instant::now();
        let frame = match load_image(image) {
            Ok(frame) => frame,
            Err(err) => return rejected(&err, started),
        };
        let store = &*self.store;
        RecognitionGate::new(
            &mut self.detector,
            &self.quality,
            &mut self.recognizer,
            store,
            store,
            store,
            &self.clock,
            &self.pipeline,
        )
        .execute(&RecognitionRequest { frame })
    }

    fn record(&mut self, params: RecordParams) -> PipelineResponse<AttendanceRecord> {
        let started = Instant::now();
        let frames = match load_images(&params.frames) {
            Ok(frames) => frames,
            Err(err) => return rejected(&err, started),
        };
        let request = RecordRequest {
            frames,
            user_id: params.user_id,
            user_name: params.user_name,
            confidence: params.confidence,
            quality_score: params.quality_score,
            frontend_blink_count: params.blink_count,
            prior_processing_ms: elapsed_ms(started),
            device_info: params.device_info.or_else(|| self.device_info.clone()),
            location: params.location,
        };
        AttendanceRecorder::new(&mut self.landmarker, &*self.store, &self.clock, &self.pipeline)
            .with_daily_limit()
            .execute(&request)
    }

    fn mark(&mut self, params: MarkParams) -> PipelineResponse<AttendanceRecord> {
        let started = Instant::now();
        let frames = match load_images(&params.frames) {
            Ok(frames) => frames,
            Err(err) => return rejected(&err, started),
        };
        let store = &*self.store;
        let gate = RecognitionGate::new(
            &mut self.detector,
            &self.quality,
            &mut self.recognizer,
            store,
            store,
            store,
            &self.clock,
            &self.pipeline,
        );
        let recorder = AttendanceRecorder::new(&mut self.landmarker, store, &self.clock, &self.pipeline);
        MarkAttendance::new(gate, recorder).execute(MarkRequest {
            frames,
            frontend_blink_count: params.blink_count,
            device_info: params.device_info.or_else(|| self.device_info.clone()),
            location: params.location,
        })
    }

    fn class(&mut self, params: ClassParams) -> PipelineResponse<ClassAttendanceReport> {
        let started = Instant::now();
        let photo = match load_image(&params.photo) {
            Ok(photo) => photo,
            Err(err) => return rejected(&err, started),
        };
        let store = &*self.store;
        ClassAttendanceOrchestrator::new(
            &mut self.detector,
            &self.quality,
            &mut self.recognizer,
            store,
            store,
            &self.clock,
            &self.pipeline,
        )
        .execute(&ClassAttendanceRequest {
            photo,
            device_info: params.device_info.or_else(|| self.device_info.clone()),
            location: params.location,
        })
    }

    /// Detect the single best face, embed it, and store it as the user's
    /// enrollment. An existing profile keeps its email and department.
    fn enroll(&mut self, user_id: &str, name: &str, image: &Path) -> Result<EnrollResult, EngineError> {
        let (user_id, name) = (user_id.trim(), name.trim());
        if user_id.is_empty() || name.is_empty() {
            return Err(EngineError::InvalidRequest("user_id and name are required".into()));
        }
        let frame = load_image(image).map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        let rgb = frame.to_rgb8();

        let boxes = self.detector.detect_boxes(&rgb)?;
        let face = boxes.first().ok_or(EngineError::NoFaceDetected)?;
        let crop = face.crop(&rgb).ok_or(EngineError::NoFaceDetected)?;
        let quality_score = self
            .quality
            .assess(&crop)
            .map(|q| q.overall_score)
            .unwrap_or(0.0);
        let embedding = self.recognizer.embed(&crop)?;

        let user = match self.store.get(user_id)? {
            Some(existing) => User {
                name: name.to_string(),
                ..existing
            },
            None => User::stub(user_id, name),
        };
        self.store.upsert_user(&user)?;
        self.store.put_embedding(user_id, name, &embedding)?;

        tracing::info!(
            user_id,
            confidence = face.confidence,
            quality_score,
            faces = boxes.len(),
            "enrolled"
        );
        Ok(EnrollResult {
            user_id: user_id.to_string(),
            name: name.to_string(),
            embedding_dim: embedding.dim(),
            face_confidence: face.confidence,
            quality_score,
        })
    }
}

/// Decode an image from disk and check it is usable as a frame.
fn load_image(path: &Path) -> Result<DynamicImage, AttendanceError> {
    let image = image::open(path)
        .map_err(|e| AttendanceError::InputValidation(format!("{}: {e}", path.display())))?;
    validate_frame(&image).map_err(|e| AttendanceError::InputValidation(format!("{}: {e}", path.display())))?;
    Ok(image)
}

fn load_images(paths: &[PathBuf]) -> Result<Vec<DynamicImage>, AttendanceError> {
    paths.iter().map(|p| load_image(p)).collect()
}

fn rejected<T>(err: &AttendanceError, started: Instant) -> PipelineResponse<T> {
    tracing::info!(error = %err, "request rejected before pipeline");
    PipelineResponse::failed(err, Stage::Validation, elapsed_ms(started))
}
