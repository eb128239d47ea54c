use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Faces whose shorter side covers less than this fraction of the image are dropped.
pub const MIN_FACE_SIZE: f32 = 0.1;
pub const FACE_DETECTION_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const EMBEDDING_DIMENSION: usize = 128;
pub const SIMILARITY_THRESHOLD: f32 = 0.6;
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub faces: FaceConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directories listed by the media source. Watch folders are scanned in
    /// addition to these.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Number of leading bytes fed to the content hash. 0 hashes the whole file.
    #[serde(default = "default_hash_prefix_bytes")]
    pub hash_prefix_bytes: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            image_extensions: default_image_extensions(),
            hash_prefix_bytes: default_hash_prefix_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceConfig {
    #[serde(default = "default_min_face_size")]
    pub min_face_size: f32,

    #[serde(default = "default_detection_confidence_threshold")]
    pub detection_confidence_threshold: f32,

    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Candidates fetched per face during a clustering pass.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Padding added around each detected box before cropping, as a fraction of the box size.
    #[serde(default = "default_crop_padding")]
    pub crop_padding: f32,

    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    #[serde(default = "default_detector_model")]
    pub detector_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            min_face_size: default_min_face_size(),
            detection_confidence_threshold: default_detection_confidence_threshold(),
            embedding_dimension: default_embedding_dimension(),
            similarity_threshold: default_similarity_threshold(),
            candidate_limit: default_candidate_limit(),
            crop_padding: default_crop_padding(),
            models_dir: default_models_dir(),
            detector_model: default_detector_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Interval between periodic global syncs in the daemon.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl PipelineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facefold")
        .join("facefold.db")
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "heic", "heif"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_hash_prefix_bytes() -> u64 {
    1024 * 1024 // 1MB
}

fn default_min_face_size() -> f32 {
    MIN_FACE_SIZE
}

fn default_detection_confidence_threshold() -> f32 {
    FACE_DETECTION_CONFIDENCE_THRESHOLD
}

fn default_embedding_dimension() -> usize {
    EMBEDDING_DIMENSION
}

fn default_similarity_threshold() -> f32 {
    SIMILARITY_THRESHOLD
}

fn default_candidate_limit() -> usize {
    5
}

fn default_crop_padding() -> f32 {
    0.2
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facefold")
        .join("models")
}

fn default_detector_model() -> String {
    "ultraface-320.onnx".to_string()
}

fn default_embedding_model() -> String {
    "face-embedding.onnx".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_max_retry_attempts() -> u32 {
    MAX_RETRY_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    10_000
}

fn default_attempt_timeout_secs() -> u64 {
    300
}

fn default_sync_interval_secs() -> u64 {
    15 * 60
}

impl Config {
    /// Load from `$FACEFOLD_CONFIG` or the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let faces = &self.faces;
        for (name, value) in [
            ("faces.min_face_size", faces.min_face_size),
            ("faces.detection_confidence_threshold", faces.detection_confidence_threshold),
            ("faces.similarity_threshold", faces.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if faces.crop_padding < 0.0 {
            bail!("faces.crop_padding must not be negative");
        }
        if faces.embedding_dimension == 0 {
            bail!("faces.embedding_dimension must be positive");
        }
        if faces.candidate_limit == 0 {
            bail!("faces.candidate_limit must be positive");
        }
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be positive");
        }
        if self.pipeline.attempt_timeout_secs == 0 {
            bail!("pipeline.attempt_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FACEFOLD_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facefold")
    }

    pub fn log_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facefold")
            .join("logs")
    }
}
