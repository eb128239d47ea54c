//! Face detector and embedding model seams, plus the image geometry shared by
//! their implementations.

use image::{DynamicImage, GenericImageView};

use crate::db::BoundingBox;

/// A face found by a detector, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Finds faces in a decoded image.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Vec<Detection>>;

    /// Release model resources. Later calls to `detect` fail.
    fn close(&self) {}
}

/// Maps a cropped face to a fixed-length identity vector.
///
/// Implementations take `&self` and may be shared across workers; one that
/// cannot run concurrently must serialize internally.
pub trait EmbeddingModel: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, face: &DynamicImage) -> anyhow::Result<Vec<f32>>;

    fn close(&self) {}
}

/// Crop a normalized box out of `img`, grown by `padding` of its size on every side.
pub fn crop_face(img: &DynamicImage, bbox: &BoundingBox, padding: f32) -> DynamicImage {
    let (img_width, img_height) = img.dimensions();
    let (w, h) = (img_width as f32, img_height as f32);

    let pad_x = bbox.width() * padding;
    let pad_y = bbox.height() * padding;

    let left = ((bbox.left - pad_x).max(0.0) * w).round() as u32;
    let top = ((bbox.top - pad_y).max(0.0) * h).round() as u32;
    let right = ((bbox.right + pad_x).min(1.0) * w).round() as u32;
    let bottom = ((bbox.bottom + pad_y).min(1.0) * h).round() as u32;

    let x = left.min(img_width.saturating_sub(1));
    let y = top.min(img_height.saturating_sub(1));
    let crop_w = right.saturating_sub(x).max(1).min(img_width - x);
    let crop_h = bottom.saturating_sub(y).max(1).min(img_height - y);

    img.crop_imm(x, y, crop_w, crop_h)
}

/// Scale `v` to unit length in place. Returns false for a zero or non-finite vector.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Non-maximum suppression to remove overlapping detections
pub fn nms(mut detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(&kept.bbox, &candidate.bbox) <= threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection over union of two boxes
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter = BoundingBox {
        left: a.left.max(b.left),
        top: a.top.max(b.top),
        right: a.right.min(b.right),
        bottom: a.bottom.min(b.bottom),
    };

    let intersection = inter.width() * inter.height();
    let union = a.width() * a.height() + b.width() * b.height() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
