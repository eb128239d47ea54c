//! Media ingestion: listing images from a media source and reconciling them
//! with stored photos.

pub mod discovery;
pub mod filesystem;
pub mod hashing;
pub mod resolver;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::collections::HashSet;
use std::path::MAIN_SEPARATOR;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::db::{photos, watch_folders, Database, PhotoMetadata};
use crate::error::{Error, Result};

pub use discovery::discover_images;
pub use filesystem::FsMediaSource;
pub use resolver::{Ingested, Resolution};

/// One image as listed by a media source.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub external_id: String,
    pub uri: String,
    pub display_name: String,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub byte_size: i64,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaItem {
    pub fn with_hash(self, content_hash: String) -> PhotoMetadata {
        PhotoMetadata {
            external_id: self.external_id,
            uri: self.uri,
            display_name: self.display_name,
            date_added: self.date_added,
            date_modified: self.date_modified,
            byte_size: self.byte_size,
            mime_type: self.mime_type,
            content_hash,
            width: self.width,
            height: self.height,
        }
    }
}

/// Everything a media source could list under its library roots.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub items: Vec<MediaItem>,
    /// Roots that could not be listed right now, e.g. an unmounted disk.
    /// Stored photos under them are kept.
    pub unavailable: Vec<String>,
}

/// Source of images: enumerates them, reads their bytes and decodes them.
pub trait MediaSource: Send + Sync {
    fn list_all(&self) -> anyhow::Result<Listing>;

    /// Images under a folder. `folder` is matched as a path prefix.
    fn list_folder(&self, folder: &str) -> anyhow::Result<Vec<MediaItem>>;

    /// Whether an external id still refers to an image.
    fn exists(&self, external_id: &str) -> bool;

    fn content_hash(&self, item: &MediaItem) -> anyhow::Result<String>;

    fn load_image(&self, uri: &str) -> anyhow::Result<DynamicImage>;
}

/// What a scan covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    /// Library roots plus every enabled watch folder.
    All,
    Folder(String),
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub seen: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub relocated: usize,
    pub pruned: usize,
    pub failed: usize,
    /// Roots and watch folders that could not be listed. Nothing under them is pruned.
    pub unavailable: usize,
    /// Photos that must go through face extraction.
    pub needs_extraction: Vec<i64>,
}

/// `folder` with a trailing separator, so `/a/b` does not match `/a/bc`.
pub fn folder_prefix(folder: &str) -> String {
    if folder.ends_with(MAIN_SEPARATOR) || folder.ends_with('/') {
        folder.to_string()
    } else {
        format!("{}{}", folder, MAIN_SEPARATOR)
    }
}

fn source_error(e: anyhow::Error) -> Error {
    Error::Io(std::io::Error::other(format!("{:#}", e)))
}

/// Reconcile the photos in `scope` with the media source.
///
/// New and changed images are upserted through the identity resolver, and
/// rows whose image disappeared from the source are deleted. A library root
/// or watch folder that cannot be listed is skipped, and photos under it are
/// left alone. Stops early, keeping what was already committed, once
/// `cancel` is set.
pub fn scan(
    db: &Database,
    source: &dyn MediaSource,
    scope: &ScanScope,
    cancel: &AtomicBool,
) -> Result<ScanReport> {
    let mut report = ScanReport::default();
    // Prefixes whose photos must survive pruning
    let mut protected = Vec::new();

    let items = match scope {
        ScanScope::All => {
            let listing = source.list_all().map_err(source_error)?;
            protected.extend(listing.unavailable.iter().map(|root| folder_prefix(root)));
            let mut items = listing.items;

            let folders = db.read(|c| watch_folders::list(c, true))?;
            for folder in folders {
                match source.list_folder(&folder.path) {
                    Ok(found) => items.extend(found),
                    Err(e) => {
                        tracing::warn!(
                            folder_id = folder.id,
                            path = %folder.path,
                            error = %e,
                            "Watch folder unavailable, keeping its photos"
                        );
                        protected.push(folder_prefix(&folder.path));
                    }
                }
            }
            items
        }
        ScanScope::Folder(folder) => source.list_folder(folder).map_err(source_error)?,
    };
    report.unavailable = protected.len();

    let mut seen = HashSet::new();

    for item in items {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!(?scope, "Scan cancelled");
            return Ok(report);
        }
        if !seen.insert(item.external_id.clone()) {
            continue;
        }
        report.seen += 1;

        let hash = match source.content_hash(&item) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(external_id = %item.external_id, error = %e, "Failed to hash image");
                report.failed += 1;
                continue;
            }
        };

        let ingested = resolver::ingest(db, source, &item.with_hash(hash))?;
        match ingested.resolution {
            Resolution::New => report.new += 1,
            Resolution::Updated { .. } => report.updated += 1,
            Resolution::Matched(_) => report.unchanged += 1,
        }
        if ingested.relocated {
            report.relocated += 1;
        }
        if ingested.needs_extraction {
            report.needs_extraction.push(ingested.photo_id);
        }
    }

    let prefix = match scope {
        ScanScope::All => None,
        ScanScope::Folder(folder) => Some(folder_prefix(folder)),
    };
    let stored = db.read(|c| photos::external_ids(c, prefix.as_deref()))?;
    for (photo_id, external_id) in stored {
        if seen.contains(&external_id)
            || protected.iter().any(|prefix| external_id.starts_with(prefix.as_str()))
            || source.exists(&external_id)
        {
            continue;
        }
        if db.write(|tx| photos::delete(tx, photo_id))? {
            tracing::debug!(photo_id, %external_id, "Pruned photo missing from source");
            report.pruned += 1;
        }
    }

    tracing::info!(
        ?scope,
        seen = report.seen,
        new = report.new,
        updated = report.updated,
        relocated = report.relocated,
        pruned = report.pruned,
        failed = report.failed,
        unavailable = report.unavailable,
        "Scan finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMediaSource;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_folder_prefix() {
        let sep = MAIN_SEPARATOR;
        assert_eq!(folder_prefix("/a/b"), format!("/a/b{}", sep));
        assert_eq!(folder_prefix("/a/b/"), "/a/b/");
    }

    #[test]
    fn test_scan_ingests_and_is_stable() {
        let db = db();
        let source = FakeMediaSource::new();
        source.put("/lib/a.jpg", "h1");
        source.put("/lib/b.jpg", "h2");
        let cancel = AtomicBool::new(false);

        let first = scan(&db, &source, &ScanScope::All, &cancel).unwrap();
        assert_eq!(first.new, 2);
        assert_eq!(first.needs_extraction.len(), 2);

        let second = scan(&db, &source, &ScanScope::All, &cancel).unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.unchanged, 2);
        // Still unprocessed, so still queued for extraction
        assert_eq!(second.needs_extraction.len(), 2);
    }

    #[test]
    fn test_folder_scan_prunes_only_its_folder() {
        let db = db();
        let source = FakeMediaSource::new();
        source.put("/lib/trip/a.jpg", "h1");
        source.put("/lib/home/b.jpg", "h2");
        let cancel = AtomicBool::new(false);
        scan(&db, &source, &ScanScope::All, &cancel).unwrap();

        source.remove("/lib/trip/a.jpg");
        source.remove("/lib/home/b.jpg");
        let report = scan(&db, &source, &ScanScope::Folder("/lib/trip".into()), &cancel).unwrap();

        assert_eq!(report.pruned, 1);
        assert_eq!(db.read(|c| photos::count(c)).unwrap(), 1);
    }

    #[test]
    fn test_hash_failures_are_counted() {
        let db = db();
        let source = FakeMediaSource::new();
        source.put("/lib/a.jpg", "h1");
        source.fail_hash("/lib/a.jpg");

        let report = scan(&db, &source, &ScanScope::All, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.new, 0);
    }

    #[test]
    fn test_unavailable_watch_folder_keeps_its_photos() {
        let db = db();
        let source = FakeMediaSource::new();
        source.put("/lib/a.jpg", "h1");
        source.put("/mnt/camera/b.jpg", "h2");
        db.write(|tx| watch_folders::add(tx, "/mnt/camera", Utc::now())).unwrap();
        let cancel = AtomicBool::new(false);
        assert_eq!(scan(&db, &source, &ScanScope::All, &cancel).unwrap().new, 2);

        source.disconnect_folder("/mnt/camera");
        source.put("/lib/c.jpg", "h3");
        let report = scan(&db, &source, &ScanScope::All, &cancel).unwrap();

        assert_eq!(report.new, 1);
        assert_eq!(report.pruned, 0);
        assert_eq!(report.unavailable, 1);
        assert_eq!(db.read(|c| photos::count(c)).unwrap(), 3);
    }

    #[test]
    fn test_unavailable_root_keeps_photos_and_links() {
        let db = db();
        let source = FakeMediaSource::new();
        source.put("/lib/a.jpg", "h1");
        source.put("/ext/b.jpg", "h2");
        let cancel = AtomicBool::new(false);
        scan(&db, &source, &ScanScope::All, &cancel).unwrap();

        let person = db
            .write(|tx| {
                let photo = photos::find_by_external_id(tx, "/ext/b.jpg")?.unwrap();
                let person = crate::db::people::create(tx, "Ada", Utc::now())?;
                crate::db::people::link_photo(tx, person, photo.id, Utc::now())?;
                Ok(person)
            })
            .unwrap();

        source.disconnect_root("/ext");
        source.remove("/lib/a.jpg");
        let report = scan(&db, &source, &ScanScope::All, &cancel).unwrap();

        // Only the photo that really disappeared is pruned
        assert_eq!(report.pruned, 1);
        assert_eq!(report.unavailable, 1);
        assert!(db.read(|c| photos::find_by_external_id(c, "/ext/b.jpg")).unwrap().is_some());
        assert_eq!(db.read(|c| crate::db::people::photos_for_person(c, person)).unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_scan_stops() {
        let db = db();
        let source = FakeMediaSource::new();
        source.put("/lib/a.jpg", "h1");

        let report = scan(&db, &source, &ScanScope::All, &AtomicBool::new(true)).unwrap();
        assert_eq!(report.seen, 0);
        assert_eq!(db.read(|c| photos::count(c)).unwrap(), 0);
    }
}
