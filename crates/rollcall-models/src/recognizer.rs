//! ArcFace face recognizer via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from face crops,
//! using the w600k_r50 ArcFace model.

use crate::tensor::to_nchw;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{Embedding, EmbeddingExtractor, ModelError};
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; set ROLLCALL_MODEL_DIR or fetch the insightface model pack")]
    ModelNotFound(String),
    #[error("empty face crop")]
    EmptyCrop,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<RecognizerError> for ModelError {
    fn from(err: RecognizerError) -> Self {
        match err {
            RecognizerError::ModelNotFound(path) => ModelError::NotLoaded(path),
            other => ModelError::Inference(other.to_string()),
        }
    }
}

/// ArcFace-based embedding extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed a face crop. The crop is resized to the model's 112×112 input.
    pub fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, RecognizerError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(RecognizerError::EmptyCrop);
        }
        let input = preprocess(crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        to_embedding(raw.to_vec())
    }
}

impl EmbeddingExtractor for FaceRecognizer {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ModelError> {
        Ok(self.embed(face)?)
    }
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle);
    to_nchw(&resized, ARCFACE_MEAN, ARCFACE_STD)
}

fn to_embedding(raw: Vec<f32>) -> Result<Embedding, RecognizerError> {
    if raw.len() != ARCFACE_EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
            raw.len()
        )));
    }
    let mut embedding = Embedding::new(raw).normalized();
    embedding.model_version = Some(ARCFACE_MODEL_VERSION.to_string());
    Ok(embedding)
}
