//! Shared fixtures: a temporary library of solid-color PNGs, a detector that
//! finds one centered face, and an embedder that turns the face's color into
//! a 2-d identity vector. Cosine distances between faces are controlled by
//! picking colors.

#![allow(dead_code)]

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;

use facefold::config::Config;
use facefold::db::{BoundingBox, Database};
use facefold::faces::{Detection, EmbeddingModel, ExtractionSettings, FaceDetector, FaceExtractor};
use facefold::scanner::{self, FsMediaSource, ScanReport, ScanScope};

/// Embeds to `[1, 0]`.
pub const RED: [u8; 3] = [255, 0, 0];
/// Cosine 0.9 against `RED`.
pub const ORANGE: [u8; 3] = [230, 111, 0];
/// Cosine 0 against `RED`, below the default threshold.
pub const GREEN: [u8; 3] = [0, 255, 0];

pub struct CenterDetector;

impl FaceDetector for CenterDetector {
    fn detect(&self, _image: &DynamicImage) -> anyhow::Result<Vec<Detection>> {
        Ok(vec![Detection {
            bbox: BoundingBox::new(0.25, 0.25, 0.75, 0.75),
            confidence: 0.95,
        }])
    }
}

pub struct ColorEmbedder;

impl EmbeddingModel for ColorEmbedder {
    fn dimension(&self) -> usize {
        2
    }

    fn embed(&self, face: &DynamicImage) -> anyhow::Result<Vec<f32>> {
        let (w, h) = face.dimensions();
        let pixel = face.get_pixel(w / 2, h / 2);
        Ok(vec![pixel[0] as f32, pixel[1] as f32])
    }
}

pub struct Library {
    pub dir: TempDir,
    pub config: Config,
    pub db: Database,
    pub source: FsMediaSource,
    pub extractor: FaceExtractor,
}

impl Library {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("library")).unwrap();
        let mut config = Config::default();
        config.library.roots = vec![dir.path().join("library")];
        config.faces.embedding_dimension = 2;

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let source = FsMediaSource::new(&config.library);
        let extractor = FaceExtractor::new(
            Arc::new(CenterDetector),
            Arc::new(ColorEmbedder),
            ExtractionSettings::from(&config.faces),
        );

        Self {
            dir,
            config,
            db,
            source,
            extractor,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("library")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    /// Write a solid-color photo, creating parent directories.
    pub fn write_photo(&self, name: &str, color: [u8; 3]) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        RgbImage::from_pixel(64, 64, Rgb(color)).save(&path).unwrap();
        path
    }

    pub fn scan(&self) -> ScanReport {
        scanner::scan(&self.db, &self.source, &ScanScope::All, &AtomicBool::new(false)).unwrap()
    }

    /// Scan, then extract faces for every photo the scan flagged.
    pub fn sync(&self) -> ScanReport {
        let report = self.scan();
        for &photo_id in &report.needs_extraction {
            self.extractor.process_photo(&self.db, &self.source, photo_id).unwrap();
        }
        report
    }
}

pub fn uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
