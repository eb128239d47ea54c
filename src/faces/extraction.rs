//! Face extraction: one photo in, zero or more embedded faces out.

use chrono::Utc;
use image::DynamicImage;
use std::sync::Arc;

use super::detector::{crop_face, l2_normalize, EmbeddingModel, FaceDetector};
use crate::config::FaceConfig;
use crate::db::{faces, photos, Database, NewFace};
use crate::error::{Error, Result};
use crate::scanner::MediaSource;

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub min_face_size: f32,
    pub confidence_threshold: f32,
    pub embedding_dimension: usize,
    pub crop_padding: f32,
}

impl From<&FaceConfig> for ExtractionSettings {
    fn from(config: &FaceConfig) -> Self {
        Self {
            min_face_size: config.min_face_size,
            confidence_threshold: config.detection_confidence_threshold,
            embedding_dimension: config.embedding_dimension,
            crop_padding: config.crop_padding,
        }
    }
}

/// Result of running extraction for a stored photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// Faces were written and the photo marked processed. May be empty.
    Extracted { face_ids: Vec<i64> },
    /// The photo was already processed; nothing was done.
    AlreadyProcessed,
    /// The photo's content changed while extracting; results were discarded.
    Superseded,
    /// The photo no longer exists.
    Missing,
}

pub struct FaceExtractor {
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<dyn EmbeddingModel>,
    settings: ExtractionSettings,
}

impl FaceExtractor {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<dyn EmbeddingModel>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            detector,
            embedder,
            settings,
        }
    }

    /// Release the detector and embedding model.
    pub fn close(&self) {
        self.detector.close();
        self.embedder.close();
    }

    /// Detect, filter, crop and embed the faces in an image.
    ///
    /// A detector error fails the whole call. A face whose embedding fails or
    /// comes back malformed is dropped with a warning.
    pub fn extract(&self, image: &DynamicImage) -> Result<Vec<NewFace>> {
        let detections = self
            .detector
            .detect(image)
            .map_err(|e| Error::ExtractionFailure(format!("{:#}", e)))?;

        let mut faces = Vec::new();
        for detection in detections {
            if detection.confidence < self.settings.confidence_threshold {
                continue;
            }
            let bbox = detection.bbox;
            if bbox.is_empty() || bbox.width().min(bbox.height()) < self.settings.min_face_size {
                tracing::debug!(?bbox, "Face too small, skipping");
                continue;
            }

            let crop = crop_face(image, &bbox, self.settings.crop_padding);
            let mut embedding = match self.embedder.embed(&crop) {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(error = %e, ?bbox, "Embedding failed, dropping face");
                    continue;
                }
            };

            if embedding.len() != self.settings.embedding_dimension {
                tracing::warn!(
                    expected = self.settings.embedding_dimension,
                    actual = embedding.len(),
                    "Embedding has wrong dimension, dropping face"
                );
                continue;
            }
            if !l2_normalize(&mut embedding) {
                tracing::warn!(?bbox, "Embedding is degenerate, dropping face");
                continue;
            }

            faces.push(NewFace {
                bbox,
                embedding,
                confidence: detection.confidence,
            });
        }

        Ok(faces)
    }

    /// Run extraction for a stored photo and persist the faces.
    ///
    /// Idempotent: a photo that is already processed is left untouched. The
    /// write only happens if the photo still has the content hash it had when
    /// the image was loaded.
    pub fn process_photo(
        &self,
        db: &Database,
        source: &dyn MediaSource,
        photo_id: i64,
    ) -> Result<ExtractionOutcome> {
        let Some(photo) = db.read(|c| photos::get(c, photo_id))? else {
            return Ok(ExtractionOutcome::Missing);
        };
        if photo.processed_at.is_some() {
            return Ok(ExtractionOutcome::AlreadyProcessed);
        }

        let image = source
            .load_image(&photo.uri)
            .map_err(|e| Error::ExtractionFailure(format!("{:#}", e)))?;
        let new_faces = self.extract(&image)?;

        db.write(|tx| {
            let Some(current) = photos::get(tx, photo_id)? else {
                return Ok(ExtractionOutcome::Missing);
            };
            if current.content_hash != photo.content_hash {
                return Ok(ExtractionOutcome::Superseded);
            }
            if current.processed_at.is_some() {
                return Ok(ExtractionOutcome::AlreadyProcessed);
            }

            let now = Utc::now();
            photos::reset_extraction(tx, photo_id)?;
            let face_ids = faces::insert_faces(tx, photo_id, &new_faces, now)?;
            photos::mark_processed(tx, photo_id, !face_ids.is_empty(), now)?;

            tracing::info!(photo_id, faces = face_ids.len(), "Faces extracted");
            Ok(ExtractionOutcome::Extracted { face_ids })
        })
    }
}
