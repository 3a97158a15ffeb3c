//! facegridd: assembly of the facegrid subsystems.
//!
//! The binary in `main.rs` parses flags and calls into here; integration
//! tests build the same [`Standalone`] against in-memory backends.

pub mod standalone;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use facegrid_core::FacegridConfig;
use facegrid_worker::{Classifier, EmbeddingClassifier, HistogramEmbedder, ReferenceSet};
use tracing::info;

pub use standalone::Standalone;

/// Flag overrides applied on top of the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen: Option<String>,
    pub fleet_size: Option<u32>,
    pub max_instances: Option<u32>,
    pub references: Option<PathBuf>,
}

/// Load the config file (defaults when `path` is `None`) and apply flag
/// overrides.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<FacegridConfig> {
    let mut config = match path {
        Some(path) => FacegridConfig::from_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => FacegridConfig::default(),
    };

    if let Some(listen) = overrides.listen {
        config.gateway.listen = listen;
    }
    if let Some(size) = overrides.fleet_size {
        config.autoscaler.fleet_size = size;
    }
    if let Some(max) = overrides.max_instances {
        config.autoscaler.max_instances = max;
    }
    if let Some(references) = overrides.references {
        config.worker.reference_set = references;
    }
    config.validate()?;
    Ok(config)
}

/// Build the classifier from the configured reference set.
pub fn load_classifier(config: &FacegridConfig) -> anyhow::Result<Arc<dyn Classifier>> {
    let path = &config.worker.reference_set;
    let references = ReferenceSet::from_file(path)
        .with_context(|| format!("load reference set {}", path.display()))?;
    let embedder = HistogramEmbedder::default();
    if references.is_empty() {
        anyhow::bail!("reference set {} is empty", path.display());
    }
    if let Some(dimensions) = references.dimensions()
        && dimensions != embedder.dimensions()
    {
        anyhow::bail!(
            "reference set {} has {dimensions}-dimensional embeddings, the embedder produces {}",
            path.display(),
            embedder.dimensions()
        );
    }
    info!(
        path = ?path,
        references = references.len(),
        dimensions = references.dimensions().unwrap_or(0),
        "reference set loaded"
    );
    Ok(Arc::new(EmbeddingClassifier::new(embedder, references)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_defaults() {
        let config = load_config(
            None,
            Overrides {
                listen: Some("127.0.0.1:9000".to_string()),
                fleet_size: Some(3),
                max_instances: Some(2),
                references: Some(PathBuf::from("/tmp/refs.json")),
            },
        )
        .unwrap();
        assert_eq!(config.gateway.listen, "127.0.0.1:9000");
        assert_eq!(config.autoscaler.fleet_size, 3);
        assert_eq!(config.autoscaler.max_instances, 2);
        assert_eq!(config.worker.reference_set, PathBuf::from("/tmp/refs.json"));
        assert_eq!(config.queues.request, "req-queue");
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facegrid.toml");
        std::fs::write(&path, "[autoscaler]\nmax_instances = 4\n").unwrap();

        let config = load_config(Some(&path), Overrides::default()).unwrap();
        assert_eq!(config.autoscaler.max_instances, 4);
        assert_eq!(config.autoscaler.fleet_size, 15);
    }

    #[test]
    fn missing_reference_set_is_an_error() {
        let mut config = FacegridConfig::default();
        config.worker.reference_set = PathBuf::from("/nonexistent/refs.json");
        let err = load_classifier(&config).err().unwrap();
        assert!(err.to_string().contains("reference set"));
    }

    fn config_with_references(dir: &tempfile::TempDir, json: &str) -> FacegridConfig {
        let path = dir.path().join("refs.json");
        std::fs::write(&path, json).unwrap();
        let mut config = FacegridConfig::default();
        config.worker.reference_set = path;
        config
    }

    #[test]
    fn empty_reference_set_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_references(&dir, "[]");
        let err = load_classifier(&config).err().unwrap();
        assert!(err.to_string().contains("is empty"));
    }

    #[test]
    fn reference_width_must_match_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_references(
            &dir,
            r#"[{"name": "Alice", "embedding": [0.1, 0.2, 0.3]}]"#,
        );
        let err = load_classifier(&config).err().unwrap();
        assert!(err.to_string().contains("3-dimensional"));
    }

    #[test]
    fn reference_set_drives_classification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        let refs = serde_json::json!([
            { "name": "Dark", "embedding": vec![0.0f32; 16] },
            { "name": "Bright", "embedding": vec![1.0f32; 16] },
        ]);
        std::fs::write(&path, refs.to_string()).unwrap();

        let mut config = FacegridConfig::default();
        config.worker.reference_set = path;
        let classifier = load_classifier(&config).unwrap();
        // A normalised histogram sums to 1, far closer to all-zero than all-one.
        assert_eq!(classifier.classify(b"anything").unwrap().label, "Dark");
    }
}
