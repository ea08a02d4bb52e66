//! Known-embedding gallery: shape normalization and matching.
//!
//! The embeddings store has accumulated several payload shapes over time:
//!
//! - a bare vector: `[0.1, 0.2, ...]`
//! - `{"embedding": [...], "name": "..."}`
//! - `{"embeddings": [[...], [...]], "name": "..."}` (several enrollment shots)
//! - a typed model: `{"name": "...", "embedding": {"values": [...], "model_version": "..."}}`
//!
//! All of them are parsed once here into one canonical entry per user.
//! Entries that fail to parse are skipped with a warning.

use crate::error::StoreError;
use crate::ports::{KnownEmbeddingsStore, StoredEmbedding};
use crate::types::{Embedding, RecognitionResult};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingShape {
    Raw(Vec<f32>),
    Typed {
        #[serde(alias = "user_name")]
        name: Option<String>,
        embedding: Embedding,
    },
    Single {
        embedding: Vec<f32>,
        #[serde(alias = "user_name")]
        name: Option<String>,
    },
    Multi {
        embeddings: Vec<Vec<f32>>,
        #[serde(alias = "user_name")]
        name: Option<String>,
    },
    FlatMulti {
        embeddings: Vec<f32>,
        #[serde(alias = "user_name")]
        name: Option<String>,
    },
}

/// Parse one stored payload into a (vector, optional name) pair.
fn normalize(payload: &serde_json::Value) -> Result<(Embedding, Option<String>), String> {
    let shape: EmbeddingShape =
        serde_json::from_value(payload.clone()).map_err(|_| "unrecognized payload shape".to_string())?;

    let (embedding, name) = match shape {
        EmbeddingShape::Raw(values) => (Embedding::new(values), None),
        EmbeddingShape::Typed { name, embedding } => (embedding, name),
        EmbeddingShape::Single { embedding, name } => (Embedding::new(embedding), name),
        EmbeddingShape::FlatMulti { embeddings, name } => (Embedding::new(embeddings), name),
        EmbeddingShape::Multi { embeddings, name } => (mean_embedding(&embeddings)?, name),
    };

    if embedding.values.is_empty() {
        return Err("empty embedding".into());
    }
    if embedding.values.iter().any(|v| !v.is_finite()) {
        return Err("non-finite embedding value".into());
    }
    Ok((embedding, name))
}

/// Average several enrollment vectors into one.
fn mean_embedding(samples: &[Vec<f32>]) -> Result<Embedding, String> {
    let first = samples.first().ok_or("no embeddings in list")?;
    let dim = first.len();
    if samples.iter().any(|s| s.len() != dim) {
        return Err("embedding list has mixed dimensions".into());
    }
    let mut mean = vec![0.0f32; dim];
    for sample in samples {
        for (acc, v) in mean.iter_mut().zip(sample) {
            *acc += v;
        }
    }
    let n = samples.len() as f32;
    mean.iter_mut().for_each(|v| *v /= n);
    Ok(Embedding::new(mean))
}

/// Canonical gallery: user_id → vector and user_id → display name.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    embeddings: BTreeMap<String, Embedding>,
    names: BTreeMap<String, String>,
}

impl Gallery {
    /// Normalize raw store entries. Unparsable entries are skipped.
    pub fn from_entries(entries: &[StoredEmbedding]) -> Self {
        let mut gallery = Gallery::default();
        for entry in entries {
            match normalize(&entry.payload) {
                Ok((embedding, name)) => {
                    let name = name.unwrap_or_else(|| entry.user_id.clone());
                    gallery.insert(&entry.user_id, &name, embedding);
                }
                Err(reason) => {
                    tracing::warn!(user_id = %entry.user_id, reason, "skipping known embedding");
                }
            }
        }
        gallery
    }

    /// One-shot snapshot of the store.
    pub fn load(store: &dyn KnownEmbeddingsStore) -> Result<Self, StoreError> {
        let entries = store.get_all()?;
        let gallery = Self::from_entries(&entries);
        tracing::debug!(entries = entries.len(), users = gallery.len(), "loaded known embeddings");
        Ok(gallery)
    }

    pub fn insert(&mut self, user_id: &str, name: &str, embedding: Embedding) {
        self.embeddings.insert(user_id.to_string(), embedding);
        self.names.insert(user_id.to_string(), name.to_string());
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn embeddings(&self) -> &BTreeMap<String, Embedding> {
        &self.embeddings
    }

    pub fn names(&self) -> &BTreeMap<String, String> {
        &self.names
    }

    pub fn name_of(&self, user_id: &str) -> Option<&str> {
        self.names.get(user_id).map(String::as_str)
    }
}

/// Result of matching one probe against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best candidate, or 0.0 for an empty gallery.
    pub similarity: f32,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl MatchResult {
    pub fn into_recognition(self) -> Option<RecognitionResult> {
        match (self.matched, self.user_id, self.user_name) {
            (true, Some(id), Some(name)) => Some(RecognitionResult::new(id, name, self.similarity)),
            _ => None,
        }
    }
}

/// Strategy for comparing a probe embedding against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher.
///
/// Always iterates every gallery entry, with no early exit, so timing does
/// not leak gallery size or match position. Entries whose dimension differs
/// from the probe are ignored.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_id: Option<&String> = None;

        for (user_id, candidate) in gallery.embeddings() {
            if candidate.dim() != probe.dim() {
                continue;
            }
            let sim = probe.similarity(candidate);
            if sim > best_sim {
                best_sim = sim;
                best_id = Some(user_id);
            }
        }

        match best_id {
            Some(id) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                user_id: Some(id.clone()),
                user_name: gallery.name_of(id).map(str::to_string),
            },
            _ => MatchResult {
                matched: false,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
                user_id: None,
                user_name: None,
            },
        }
    }
}

/// Match every face slot of one photo, preserving slot order.
///
/// A slot with no embedding stays `None`. If two slots match the same user,
/// only the more confident one keeps the match.
pub fn match_faces(
    matcher: &dyn Matcher,
    probes: &[Option<Embedding>],
    gallery: &Gallery,
    threshold: f32,
) -> Vec<Option<RecognitionResult>> {
    let mut results: Vec<Option<RecognitionResult>> = probes
        .iter()
        .map(|probe| {
            probe
                .as_ref()
                .and_then(|p| matcher.compare(p, gallery, threshold).into_recognition())
        })
        .collect();

    let mut best_slot: BTreeMap<String, usize> = BTreeMap::new();
    for slot in 0..results.len() {
        let Some(current) = results[slot].as_ref() else {
            continue;
        };
        let user_id = current.user_id.clone();
        let confidence = current.confidence;
        match best_slot.get(&user_id).copied() {
            None => {
                best_slot.insert(user_id, slot);
            }
            Some(prev) => {
                let prev_conf = results[prev].as_ref().map_or(0.0, |r| r.confidence);
                let loser = if confidence > prev_conf {
                    best_slot.insert(user_id.clone(), slot);
                    prev
                } else {
                    slot
                };
                tracing::warn!(user_id = %user_id, slot = loser, "duplicate match in one photo; dropping weaker slot");
                results[loser] = None;
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(user_id: &str, payload: serde_json::Value) -> StoredEmbedding {
        StoredEmbedding { user_id: user_id.into(), payload }
    }

    #[test]
    fn test_all_shapes_normalize() {
        let gallery = Gallery::from_entries(&[
            entry("raw", json!([1.0, 0.0, 0.0])),
            entry("single", json!({"embedding": [0.0, 1.0, 0.0], "name": "Single"})),
            entry("multi", json!({"embeddings": [[0.0, 0.0, 1.0], [0.0, 0.0, 3.0]], "name": "Multi"})),
            entry("flat", json!({"embeddings": [1.0, 1.0, 0.0]})),
            entry("typed", json!({
                "user_name": "Typed",
                "embedding": {"values": [0.5, 0.5, 0.5], "model_version": "w600k_r50"}
            })),
        ]);
        assert_eq!(gallery.len(), 5);
        assert_eq!(gallery.name_of("raw"), Some("raw"));
        assert_eq!(gallery.name_of("single"), Some("Single"));
        assert_eq!(gallery.name_of("typed"), Some("Typed"));
        assert_eq!(gallery.embeddings()["multi"].values, vec![0.0, 0.0, 2.0]);
        assert_eq!(
            gallery.embeddings()["typed"].model_version.as_deref(),
            Some("w600k_r50")
        );
    }

    #[test]
    fn test_unparsable_entries_skipped() {
        let gallery = Gallery::from_entries(&[
            entry("ok", json!([1.0, 0.0])),
            entry("string", json!("not an embedding")),
            entry("empty", json!([])),
            entry("mixed", json!({"embeddings": [[1.0], [1.0, 2.0]]})),
            entry("object", json!({"vector": [1.0]})),
        ]);
        assert_eq!(gallery.len(), 1);
        assert!(gallery.embeddings().contains_key("ok"));
    }

    #[test]
    fn test_cosine_matcher_scans_whole_gallery() {
        let mut gallery = Gallery::default();
        gallery.insert("1", "decoy1", Embedding::new(vec![0.0, 1.0, 0.0]));
        gallery.insert("2", "decoy2", Embedding::new(vec![0.0, 0.0, 1.0]));
        gallery.insert("3", "match", Embedding::new(vec![1.0, 0.0, 0.0]));

        let result = CosineMatcher.compare(&Embedding::new(vec![1.0, 0.0, 0.0]), &gallery, 0.5);
        assert!(result.matched);
        assert_eq!(result.user_id.as_deref(), Some("3"));
        assert_eq!(result.user_name.as_deref(), Some("match"));
    }

    #[test]
    fn test_cosine_matcher_below_threshold() {
        let mut gallery = Gallery::default();
        gallery.insert("1", "other", Embedding::new(vec![0.0, 1.0, 0.0]));
        let result = CosineMatcher.compare(&Embedding::new(vec![1.0, 0.0, 0.0]), &gallery, 0.5);
        assert!(!result.matched);
        assert!(result.into_recognition().is_none());
    }

    #[test]
    fn test_cosine_matcher_empty_gallery() {
        let result = CosineMatcher.compare(&Embedding::new(vec![1.0]), &Gallery::default(), 0.5);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_cosine_matcher_ignores_dimension_mismatch() {
        let mut gallery = Gallery::default();
        gallery.insert("short", "Short", Embedding::new(vec![1.0]));
        let result = CosineMatcher.compare(&Embedding::new(vec![1.0, 0.0]), &gallery, 0.5);
        assert!(!result.matched);
    }

    #[test]
    fn test_match_faces_preserves_slots() {
        let mut gallery = Gallery::default();
        gallery.insert("a", "A", Embedding::new(vec![1.0, 0.0]));
        gallery.insert("b", "B", Embedding::new(vec![0.0, 1.0]));

        let probes = vec![
            Some(Embedding::new(vec![0.0, 1.0])),
            None,
            Some(Embedding::new(vec![-1.0, 0.0])),
            Some(Embedding::new(vec![1.0, 0.1])),
        ];
        let results = match_faces(&CosineMatcher, &probes, &gallery, 0.5);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().user_id, "b");
        assert!(results[1].is_none());
        assert!(results[2].is_none());
        assert_eq!(results[3].as_ref().unwrap().user_id, "a");
    }

    #[test]
    fn test_match_faces_drops_weaker_duplicate() {
        let mut gallery = Gallery::default();
        gallery.insert("a", "A", Embedding::new(vec![1.0, 0.0]));

        let probes = vec![
            Some(Embedding::new(vec![1.0, 0.6])),
            Some(Embedding::new(vec![1.0, 0.05])),
        ];
        let results = match_faces(&CosineMatcher, &probes, &gallery, 0.5);
        assert!(results[0].is_none());
        assert_eq!(results[1].as_ref().unwrap().user_id, "a");
    }
}
