//! Media source backed by directories on the local filesystem.
//!
//! External ids and URIs are both the file path. Timestamps are truncated to
//! whole seconds so they compare stably after a round trip through the store.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::discovery::{discover_images, has_image_extension};
use super::{hashing, Listing, MediaItem, MediaSource};
use crate::config::LibraryConfig;

pub struct FsMediaSource {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    hash_prefix_bytes: u64,
}

impl FsMediaSource {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            roots: config.roots.clone(),
            extensions: config.image_extensions.clone(),
            hash_prefix_bytes: config.hash_prefix_bytes,
        }
    }

    fn list_dir(&self, dir: &Path) -> Vec<MediaItem> {
        discover_images(dir, &self.extensions)
            .into_iter()
            .filter_map(|path| match media_item(&path) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Skipping unreadable image");
                    None
                }
            })
            .collect()
    }
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn media_item(path: &Path) -> anyhow::Result<MediaItem> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified().map(to_utc)?;
    let added = metadata.created().map(to_utc).unwrap_or(modified);

    let (width, height) = match image::image_dimensions(path) {
        Ok((w, h)) => (Some(w), Some(h)),
        Err(_) => (None, None),
    };

    let path_str = path.to_string_lossy().to_string();
    Ok(MediaItem {
        external_id: path_str.clone(),
        uri: path_str,
        display_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        date_added: added,
        date_modified: modified,
        byte_size: metadata.len() as i64,
        mime_type: mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string()),
        width,
        height,
    })
}

impl MediaSource for FsMediaSource {
    fn list_all(&self) -> anyhow::Result<Listing> {
        let mut listing = Listing::default();
        for root in &self.roots {
            if !root.is_dir() {
                tracing::warn!(root = ?root, "Library root unavailable, keeping its photos");
                listing.unavailable.push(root.to_string_lossy().to_string());
                continue;
            }
            listing.items.extend(self.list_dir(root));
        }
        Ok(listing)
    }

    fn list_folder(&self, folder: &str) -> anyhow::Result<Vec<MediaItem>> {
        let dir = Path::new(folder);
        if !dir.is_dir() {
            return Err(anyhow!("Not a directory: {}", folder));
        }
        Ok(self.list_dir(dir))
    }

    fn exists(&self, external_id: &str) -> bool {
        let path = Path::new(external_id);
        path.is_file() && has_image_extension(path, &self.extensions)
    }

    fn content_hash(&self, item: &MediaItem) -> anyhow::Result<String> {
        hashing::content_hash(Path::new(&item.uri), self.hash_prefix_bytes)
            .with_context(|| format!("Failed to hash {}", item.uri))
    }

    fn load_image(&self, uri: &str) -> anyhow::Result<DynamicImage> {
        image::open(uri).map_err(|e| anyhow!("Failed to load image {}: {}", uri, e))
    }
}
