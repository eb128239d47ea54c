//! In-memory stand-ins for the media source, detector and embedding model.

use anyhow::anyhow;
use chrono::{DateTime, Duration, TimeZone, Utc};
use image::DynamicImage;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use crate::faces::detector::{Detection, EmbeddingModel, FaceDetector};
use crate::scanner::{folder_prefix, Listing, MediaItem, MediaSource};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

#[derive(Default)]
pub struct FakeMediaSource {
    files: Mutex<BTreeMap<String, (String, DateTime<Utc>)>>,
    unreadable: Mutex<HashSet<String>>,
    /// Disconnected prefixes, flagged true when they are library roots.
    offline: Mutex<BTreeMap<String, bool>>,
    list_delay: Mutex<Option<StdDuration>>,
}

impl FakeMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, external_id: &str, hash: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(external_id.to_string(), (hash.to_string(), base_time()));
    }

    /// Replace a file's bytes, bumping its modification time.
    pub fn rewrite(&self, external_id: &str, hash: &str) {
        let mut files = self.files.lock().unwrap();
        let modified = files
            .get(external_id)
            .map(|(_, at)| *at + Duration::hours(1))
            .unwrap_or_else(base_time);
        files.insert(external_id.to_string(), (hash.to_string(), modified));
    }

    pub fn remove(&self, external_id: &str) {
        self.files.lock().unwrap().remove(external_id);
    }

    pub fn fail_hash(&self, external_id: &str) {
        self.unreadable.lock().unwrap().insert(external_id.to_string());
    }

    /// Make a library root unreachable, as if its disk were unmounted.
    pub fn disconnect_root(&self, root: &str) {
        self.offline.lock().unwrap().insert(folder_prefix(root), true);
    }

    /// Make a watch folder unreachable.
    pub fn disconnect_folder(&self, folder: &str) {
        self.offline.lock().unwrap().insert(folder_prefix(folder), false);
    }

    /// Block the next `list_all` call for `delay`.
    pub fn delay_next_listing(&self, delay: StdDuration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    fn is_offline(&self, external_id: &str) -> bool {
        self.offline
            .lock()
            .unwrap()
            .keys()
            .any(|prefix| external_id.starts_with(prefix.as_str()))
    }

    fn item(external_id: &str, modified: DateTime<Utc>) -> MediaItem {
        MediaItem {
            external_id: external_id.to_string(),
            uri: external_id.to_string(),
            display_name: external_id.rsplit('/').next().unwrap_or(external_id).to_string(),
            date_added: base_time(),
            date_modified: modified,
            byte_size: 1024,
            mime_type: Some("image/jpeg".to_string()),
            width: Some(640),
            height: Some(480),
        }
    }
}

impl MediaSource for FakeMediaSource {
    fn list_all(&self) -> anyhow::Result<Listing> {
        let delay = self.list_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let unavailable = self
            .offline
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, is_root)| **is_root)
            .map(|(prefix, _)| prefix.trim_end_matches('/').to_string())
            .collect();
        let files = self.files.lock().unwrap();
        Ok(Listing {
            items: files
                .iter()
                .filter(|(id, _)| !self.is_offline(id))
                .map(|(id, (_, at))| Self::item(id, *at))
                .collect(),
            unavailable,
        })
    }

    fn list_folder(&self, folder: &str) -> anyhow::Result<Vec<MediaItem>> {
        let prefix = folder_prefix(folder);
        if self.is_offline(&prefix) {
            return Err(anyhow!("not a directory: {}", folder));
        }
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .filter(|(id, _)| id.starts_with(&prefix))
            .map(|(id, (_, at))| Self::item(id, *at))
            .collect())
    }

    fn exists(&self, external_id: &str) -> bool {
        !self.is_offline(external_id) && self.files.lock().unwrap().contains_key(external_id)
    }

    fn content_hash(&self, item: &MediaItem) -> anyhow::Result<String> {
        if self.unreadable.lock().unwrap().contains(&item.external_id) {
            return Err(anyhow!("unreadable: {}", item.external_id));
        }
        self.files
            .lock()
            .unwrap()
            .get(&item.external_id)
            .map(|(hash, _)| hash.clone())
            .ok_or_else(|| anyhow!("missing: {}", item.external_id))
    }

    fn load_image(&self, uri: &str) -> anyhow::Result<DynamicImage> {
        if !self.exists(uri) {
            return Err(anyhow!("missing: {}", uri));
        }
        Ok(DynamicImage::new_rgb8(64, 64))
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

pub struct FakeDetector {
    detections: Option<Vec<Detection>>,
    hook: Option<Hook>,
}

impl FakeDetector {
    pub fn returning(detections: Vec<Detection>) -> Self {
        Self {
            detections: Some(detections),
            hook: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            detections: None,
            hook: None,
        }
    }

    /// Run `hook` inside every `detect` call, before returning.
    pub fn with_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }
}

impl FaceDetector for FakeDetector {
    fn detect(&self, _image: &DynamicImage) -> anyhow::Result<Vec<Detection>> {
        if let Some(hook) = &self.hook {
            hook();
        }
        self.detections.clone().ok_or_else(|| anyhow!("detector offline"))
    }
}

pub struct FakeEmbedder {
    embedding: Vec<f32>,
    fail_on: Option<usize>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn constant(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the `n`th call (0-based).
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }
}

impl EmbeddingModel for FakeEmbedder {
    fn dimension(&self) -> usize {
        self.embedding.len()
    }

    fn embed(&self, _face: &DynamicImage) -> anyhow::Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if Some(call) == self.fail_on {
            return Err(anyhow!("model hiccup"));
        }
        Ok(self.embedding.clone())
    }
}
