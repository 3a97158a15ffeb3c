//! Classification seam and closed-set nearest-match recognition.
//!
//! A [`Classifier`] turns input bytes into a label. The shipped
//! [`EmbeddingClassifier`] embeds the input with an [`Embedder`] and picks
//! the closest entry of a [`ReferenceSet`] by Euclidean distance. There is
//! no rejection threshold: the nearest reference always wins, even when
//! the true identity is absent from the set.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while classifying an input.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("input is empty")]
    EmptyInput,

    #[error("reference set is empty")]
    EmptyReferenceSet,

    #[error("embedding has {got} dimensions, reference `{name}` has {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("failed to load reference set: {0}")]
    Load(String),

    #[error("classification task failed: {0}")]
    Task(String),
}

/// The nearest reference for an input.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub distance: f32,
}

/// Opaque, synchronous, possibly expensive classification routine.
///
/// Called from the blocking thread pool.
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &[u8]) -> Result<Classification, ClassifyError>;
}

/// Turns input bytes into a fixed-length embedding vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, input: &[u8]) -> Result<Vec<f32>, ClassifyError>;
}

// ── Reference set ──────────────────────────────────────────────────

/// A labelled reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub embedding: Vec<f32>,
}

/// Labelled embeddings loaded once at process start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceSet {
    references: Vec<Reference>,
}

impl ReferenceSet {
    pub fn new(references: Vec<Reference>) -> Self {
        Self { references }
    }

    /// Load a JSON array of `{"name": ..., "embedding": [...]}` objects.
    pub fn from_file(path: &Path) -> Result<Self, ClassifyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClassifyError::Load(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ClassifyError> {
        let set: ReferenceSet =
            serde_json::from_str(json).map_err(|e| ClassifyError::Load(e.to_string()))?;
        if let Some(first) = set.references.first() {
            let dim = first.embedding.len();
            if let Some(bad) = set.references.iter().find(|r| r.embedding.len() != dim) {
                return Err(ClassifyError::Load(format!(
                    "reference `{}` has {} dimensions, expected {dim}",
                    bad.name,
                    bad.embedding.len()
                )));
            }
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Embedding width, if the set is non-empty.
    pub fn dimensions(&self) -> Option<usize> {
        self.references.first().map(|r| r.embedding.len())
    }

    /// Return the reference closest to `query`.
    ///
    /// Ties go to the earliest reference. NaN distances rank last.
    pub fn nearest(&self, query: &[f32]) -> Result<Classification, ClassifyError> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, reference) in self.references.iter().enumerate() {
            if reference.embedding.len() != query.len() {
                return Err(ClassifyError::DimensionMismatch {
                    name: reference.name.clone(),
                    expected: reference.embedding.len(),
                    got: query.len(),
                });
            }
            let mut distance = euclidean(query, &reference.embedding);
            if distance.is_nan() {
                distance = f32::INFINITY;
            }
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((idx, distance)),
            }
        }
        let (idx, distance) = best.ok_or(ClassifyError::EmptyReferenceSet)?;
        Ok(Classification {
            label: self.references[idx].name.clone(),
            distance,
        })
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

// ── Embedding classifier ───────────────────────────────────────────

/// Embed, then nearest-match against a reference set.
pub struct EmbeddingClassifier<E> {
    embedder: E,
    references: ReferenceSet,
}

impl<E: Embedder> EmbeddingClassifier<E> {
    pub fn new(embedder: E, references: ReferenceSet) -> Self {
        Self {
            embedder,
            references,
        }
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }
}

impl<E: Embedder> Classifier for EmbeddingClassifier<E> {
    fn classify(&self, input: &[u8]) -> Result<Classification, ClassifyError> {
        let embedding = self.embedder.embed(input)?;
        self.references.nearest(&embedding)
    }
}

/// Normalised byte-value histogram.
///
/// A cheap stand-in feature extractor for deployments without a face
/// embedding model: byte values are bucketed into `bins` equal ranges and
/// the counts divided by the input length.
#[derive(Debug, Clone, Copy)]
pub struct HistogramEmbedder {
    bins: usize,
}

impl HistogramEmbedder {
    /// `bins` is clamped to 1..=256.
    pub fn new(bins: usize) -> Self {
        Self {
            bins: bins.clamp(1, 256),
        }
    }

    /// Length of every embedding this embedder produces.
    pub fn dimensions(&self) -> usize {
        self.bins
    }
}

impl Default for HistogramEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Embedder for HistogramEmbedder {
    fn embed(&self, input: &[u8]) -> Result<Vec<f32>, ClassifyError> {
        if input.is_empty() {
            return Err(ClassifyError::EmptyInput);
        }
        let mut histogram = vec![0f32; self.bins];
        for &byte in input {
            histogram[byte as usize * self.bins / 256] += 1.0;
        }
        let total = input.len() as f32;
        for bin in &mut histogram {
            *bin /= total;
        }
        Ok(histogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str, embedding: &[f32]) -> Reference {
        Reference {
            name: name.to_string(),
            embedding: embedding.to_vec(),
        }
    }

    fn people() -> ReferenceSet {
        ReferenceSet::new(vec![
            reference("Alice", &[0.0, 0.0]),
            reference("Bob", &[3.0, 4.0]),
            reference("Carol", &[10.0, 10.0]),
        ])
    }

    #[test]
    fn nearest_picks_minimum_distance() {
        let set = people();
        let result = set.nearest(&[2.9, 4.1]).unwrap();
        assert_eq!(result.label, "Bob");
        assert!(result.distance < 0.2);

        let exact = set.nearest(&[3.0, 4.0]).unwrap();
        assert_eq!(exact.distance, 0.0);
    }

    #[test]
    fn nearest_has_no_rejection_threshold() {
        let result = people().nearest(&[1000.0, -1000.0]).unwrap();
        assert!(!result.label.is_empty());
        assert!(result.distance > 100.0);
    }

    #[test]
    fn ties_go_to_first_reference() {
        let set = ReferenceSet::new(vec![
            reference("First", &[1.0, 0.0]),
            reference("Second", &[-1.0, 0.0]),
            reference("Third", &[0.0, 1.0]),
        ]);
        for _ in 0..10 {
            assert_eq!(set.nearest(&[0.0, 0.0]).unwrap().label, "First");
        }
    }

    #[test]
    fn duplicate_embeddings_resolve_to_first_name() {
        let set = ReferenceSet::new(vec![
            reference("Twin A", &[5.0, 5.0]),
            reference("Twin B", &[5.0, 5.0]),
        ]);
        assert_eq!(set.nearest(&[5.0, 5.1]).unwrap().label, "Twin A");
    }

    #[test]
    fn nan_distance_ranks_last() {
        let set = ReferenceSet::new(vec![
            reference("Broken", &[f32::NAN, 0.0]),
            reference("Fine", &[9.0, 9.0]),
        ]);
        assert_eq!(set.nearest(&[0.0, 0.0]).unwrap().label, "Fine");
    }

    #[test]
    fn empty_set_and_dimension_mismatch() {
        assert!(matches!(
            ReferenceSet::default().nearest(&[1.0]),
            Err(ClassifyError::EmptyReferenceSet)
        ));
        assert!(matches!(
            people().nearest(&[1.0, 2.0, 3.0]),
            Err(ClassifyError::DimensionMismatch { expected: 2, got: 3, .. })
        ));
    }

    #[test]
    fn reference_set_from_json() {
        let json = r#"[
            {"name": "Alice", "embedding": [0.1, 0.2]},
            {"name": "Bob", "embedding": [0.9, 0.8]}
        ]"#;
        let set = ReferenceSet::from_json(json).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.dimensions(), Some(2));
    }

    #[test]
    fn reference_set_rejects_ragged_embeddings() {
        let json = r#"[
            {"name": "Alice", "embedding": [0.1, 0.2]},
            {"name": "Bob", "embedding": [0.9]}
        ]"#;
        assert!(matches!(ReferenceSet::from_json(json), Err(ClassifyError::Load(_))));
    }

    #[test]
    fn histogram_embedding_is_normalised() {
        let embedder = HistogramEmbedder::new(4);
        let embedding = embedder.embed(&[0, 10, 255, 255]).unwrap();
        assert_eq!(embedding, vec![0.5, 0.0, 0.0, 0.5]);
        assert!(matches!(embedder.embed(&[]), Err(ClassifyError::EmptyInput)));
    }

    #[test]
    fn embedding_classifier_end_to_end() {
        let embedder = HistogramEmbedder::new(2);
        let set = ReferenceSet::new(vec![
            reference("dark", &[1.0, 0.0]),
            reference("bright", &[0.0, 1.0]),
        ]);
        let classifier = EmbeddingClassifier::new(embedder, set);
        assert_eq!(classifier.classify(&[10, 20, 30]).unwrap().label, "dark");
        assert_eq!(classifier.classify(&[200, 220, 250]).unwrap().label, "bright");
    }

    #[test]
    fn histogram_dimensions_match_embedding_length() {
        for bins in [0, 1, 16, 300] {
            let embedder = HistogramEmbedder::new(bins);
            assert_eq!(embedder.embed(b"abc").unwrap().len(), embedder.dimensions());
        }
        assert_eq!(HistogramEmbedder::default().dimensions(), 16);
    }

    #[test]
    fn reference_set_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("references.json");
        std::fs::write(&path, r#"[{"name": "Alice", "embedding": [0.5, 0.5]}]"#).unwrap();

        let set = ReferenceSet::from_file(&path).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.dimensions(), Some(2));

        let missing = ReferenceSet::from_file(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ClassifyError::Load(msg)) if msg.contains("absent.json")));
    }
}
