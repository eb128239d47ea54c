pub mod clustering;
pub mod detector;
pub mod extraction;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod similarity;

pub use clustering::{run_clustering_pass, ClusteringReport, ClusteringSettings};
pub use detector::{Detection, EmbeddingModel, FaceDetector};
pub use extraction::{ExtractionOutcome, ExtractionSettings, FaceExtractor};
pub use similarity::{Match, SimilarityIndex};

use crate::config::FaceConfig;

/// Build an extractor from the configured ONNX models.
#[cfg(feature = "onnx")]
pub fn load_extractor(config: &FaceConfig) -> anyhow::Result<FaceExtractor> {
    use std::sync::Arc;

    let detector = onnx::UltraFaceDetector::load(&config.models_dir, &config.detector_model)?;
    let embedder = onnx::OnnxEmbeddingModel::load(
        &config.models_dir.join(&config.embedding_model),
        config.embedding_dimension,
    )?;
    Ok(FaceExtractor::new(
        Arc::new(detector),
        Arc::new(embedder),
        ExtractionSettings::from(config),
    ))
}

#[cfg(not(feature = "onnx"))]
pub fn load_extractor(_config: &FaceConfig) -> anyhow::Result<FaceExtractor> {
    anyhow::bail!("facefold was built without the `onnx` feature; no face models are available")
}
