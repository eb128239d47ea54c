//! Photo identity resolution.
//!
//! An observed image is the same photo as a stored one when its external id
//! matches, or failing that when its content hash matches. The second rule
//! keeps moves and renames from creating duplicate rows.

use rusqlite::Connection;

use super::MediaSource;
use crate::db::{photos, Database, Photo, PhotoMetadata};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    New,
    Matched(i64),
    /// Metadata changed. `content_changed` means stored faces are stale.
    Updated { photo_id: i64, content_changed: bool },
}

/// How a stored photo was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    ExternalId,
    ContentHash,
}

/// Outcome of ingesting one observed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub photo_id: i64,
    pub resolution: Resolution,
    /// The stored row was moved to the candidate's external id.
    pub relocated: bool,
    pub needs_extraction: bool,
}

/// Compare an observed image with the stored photo it matched.
pub fn classify(existing: Option<&Photo>, candidate: &PhotoMetadata) -> Resolution {
    let Some(existing) = existing else {
        return Resolution::New;
    };

    let content_changed = existing.content_hash != candidate.content_hash;
    if content_changed || existing.date_modified != candidate.date_modified {
        Resolution::Updated {
            photo_id: existing.id,
            content_changed,
        }
    } else {
        Resolution::Matched(existing.id)
    }
}

pub fn lookup(conn: &Connection, candidate: &PhotoMetadata) -> Result<Option<(Photo, MatchedBy)>> {
    if let Some(photo) = photos::find_by_external_id(conn, &candidate.external_id)? {
        return Ok(Some((photo, MatchedBy::ExternalId)));
    }
    Ok(photos::find_by_content_hash(conn, &candidate.content_hash)?
        .map(|photo| (photo, MatchedBy::ContentHash)))
}

/// Classify a candidate without writing anything.
pub fn resolve(conn: &Connection, candidate: &PhotoMetadata) -> Result<Resolution> {
    let found = lookup(conn, candidate)?;
    Ok(classify(found.as_ref().map(|(photo, _)| photo), candidate))
}

/// Resolve and upsert a candidate in one transaction.
///
/// A changed content hash drops the photo's faces, and with them any
/// suggestions on those faces, so extraction runs again. Person links stay.
/// A hash match under a new external id only takes over the stored row when
/// the old id has vanished from the source; a surviving copy is left alone.
pub fn ingest(db: &Database, source: &dyn MediaSource, candidate: &PhotoMetadata) -> Result<Ingested> {
    db.write(|tx| {
        let Some((existing, matched_by)) = lookup(tx, candidate)? else {
            let photo_id = photos::insert(tx, candidate)?;
            tracing::debug!(photo_id, external_id = %candidate.external_id, "New photo");
            return Ok(Ingested {
                photo_id,
                resolution: Resolution::New,
                relocated: false,
                needs_extraction: true,
            });
        };

        let unprocessed = existing.processed_at.is_none();

        if matched_by == MatchedBy::ContentHash && source.exists(&existing.external_id) {
            // Duplicate copy of a photo that is still present
            return Ok(Ingested {
                photo_id: existing.id,
                resolution: Resolution::Matched(existing.id),
                relocated: false,
                needs_extraction: unprocessed,
            });
        }

        let relocated = matched_by == MatchedBy::ContentHash;
        let resolution = classify(Some(&existing), candidate);
        let content_changed = matches!(
            resolution,
            Resolution::Updated {
                content_changed: true,
                ..
            }
        );

        if relocated || matches!(resolution, Resolution::Updated { .. }) {
            photos::update_metadata(tx, existing.id, candidate)?;
        }
        if content_changed {
            let dropped = photos::reset_extraction(tx, existing.id)?;
            tracing::info!(
                photo_id = existing.id,
                faces_dropped = dropped,
                "Photo content changed, faces invalidated"
            );
        }
        if relocated {
            tracing::info!(
                photo_id = existing.id,
                from = %existing.external_id,
                to = %candidate.external_id,
                "Photo moved"
            );
        }

        Ok(Ingested {
            photo_id: existing.id,
            resolution,
            relocated,
            needs_extraction: content_changed || unprocessed,
        })
    })
}
