//! ONNX Runtime implementations of the detector and embedding model.
//!
//! Sessions need `&mut` to run, so each one sits behind a mutex and concurrent
//! callers are serialized. The UltraFace detector is downloaded on first use;
//! the embedding model has to be provided by the user.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::detector::{nms, Detection, EmbeddingModel, FaceDetector};
use crate::db::BoundingBox;

const ULTRAFACE_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        // Partial downloads stay under .part
        let partial = model_path.with_extension("part");
        let mut file = std::fs::File::create(&partial)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        std::fs::rename(&partial, &model_path)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

fn build_session(path: &Path) -> Result<Session> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)?)
}

fn with_session<T>(slot: &Mutex<Option<Session>>, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
    let mut guard = slot
        .lock()
        .map_err(|e| anyhow!("Failed to lock model session: {}", e))?;
    let session = guard.as_mut().ok_or_else(|| anyhow!("Model has been closed"))?;
    f(session)
}

/// Write an RGB image into a planar NCHW buffer with `(pixel - mean) / std`.
fn to_nchw(img: &DynamicImage, width: u32, height: u32, mean: f32, std: f32) -> Vec<f32> {
    let resized = img.resize_exact(width, height, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();
    let plane = (width * height) as usize;

    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = (pixel[c] as f32 - mean) / std;
        }
    }
    data
}

// ============================================================================
// UltraFace detector
// ============================================================================

pub struct UltraFaceDetector {
    session: Mutex<Option<Session>>,
}

impl UltraFaceDetector {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;
    /// Raw score floor; the extraction stage applies its own configured threshold.
    const SCORE_FLOOR: f32 = 0.5;
    const NMS_THRESHOLD: f32 = 0.3;

    pub fn load(models_dir: &Path, filename: &str) -> Result<Self> {
        let path = ensure_model(models_dir, filename, ULTRAFACE_URL)?;
        Ok(Self {
            session: Mutex::new(Some(build_session(&path)?)),
        })
    }

    fn run(session: &mut Session, img: &DynamicImage) -> Result<Vec<Detection>> {
        let (w, h) = (Self::INPUT_WIDTH, Self::INPUT_HEIGHT);
        let input_data = to_nchw(img, w, h, 127.0, 128.0);
        let input_tensor =
            Tensor::from_array(([1usize, 3, h as usize, w as usize], input_data.into_boxed_slice()))?;

        let outputs = session.run(ort::inputs!["input" => input_tensor])?;

        let scores_value = outputs.get("scores").ok_or_else(|| anyhow!("No scores output"))?;
        let boxes_value = outputs.get("boxes").ok_or_else(|| anyhow!("No boxes output"))?;

        let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
        let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

        // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized corners
        let num_anchors = scores_shape[1] as usize;
        let mut detections = Vec::new();
        for i in 0..num_anchors {
            let confidence = scores_data[i * 2 + 1];
            if confidence < Self::SCORE_FLOOR {
                continue;
            }
            let bbox = BoundingBox::new(
                boxes_data[i * 4],
                boxes_data[i * 4 + 1],
                boxes_data[i * 4 + 2],
                boxes_data[i * 4 + 3],
            );
            if !bbox.is_empty() {
                detections.push(Detection { bbox, confidence });
            }
        }

        Ok(nms(detections, Self::NMS_THRESHOLD))
    }
}

impl FaceDetector for UltraFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        with_session(&self.session, |session| Self::run(session, image))
    }

    fn close(&self) {
        if let Ok(mut guard) = self.session.lock() {
            guard.take();
        }
    }
}

// ============================================================================
// Embedding model
// ============================================================================

/// A 112x112 face embedding network such as MobileFaceNet or ArcFace.
pub struct OnnxEmbeddingModel {
    session: Mutex<Option<Session>>,
    dimension: usize,
}

impl OnnxEmbeddingModel {
    const INPUT_SIZE: u32 = 112;

    pub fn load(path: &Path, dimension: usize) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!(
                "Embedding model not found at {:?}; place a {}-dimensional face embedding ONNX model there",
                path,
                dimension
            ));
        }
        Ok(Self {
            session: Mutex::new(Some(build_session(path)?)),
            dimension,
        })
    }

    fn run(session: &mut Session, face: &DynamicImage) -> Result<Vec<f32>> {
        let size = Self::INPUT_SIZE;
        let input_data = to_nchw(face, size, size, 127.5, 127.5);
        let input_tensor =
            Tensor::from_array(([1usize, 3, size as usize, size as usize], input_data.into_boxed_slice()))?;

        let outputs = session.run(ort::inputs![input_tensor])?;

        let embedding_output = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding output"))?;
        let (_shape, data) = embedding_output.1.try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, face: &DynamicImage) -> Result<Vec<f32>> {
        with_session(&self.session, |session| Self::run(session, face))
    }

    fn close(&self) {
        if let Ok(mut guard) = self.session.lock() {
            guard.take();
        }
    }
}
