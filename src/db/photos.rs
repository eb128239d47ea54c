//! Photo rows and the queries the identity resolver and extraction stage need.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

/// Column list for `SELECT`s that alias the photos table as `p`.
pub(crate) const PHOTO_COLUMNS: &str = r#"
    p.id, p.external_id, p.uri, p.display_name, p.date_added, p.date_modified,
    p.byte_size, p.mime_type, p.content_hash, p.width, p.height, p.has_faces, p.processed_at
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: i64,
    pub external_id: String,
    pub uri: String,
    pub display_name: String,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub byte_size: i64,
    pub mime_type: Option<String>,
    pub content_hash: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_faces: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Metadata of an observed image, as reported by the media source plus its content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoMetadata {
    pub external_id: String,
    pub uri: String,
    pub display_name: String,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub byte_size: i64,
    pub mime_type: Option<String>,
    pub content_hash: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub(crate) fn row_to_photo(row: &Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        external_id: row.get(1)?,
        uri: row.get(2)?,
        display_name: row.get(3)?,
        date_added: row.get(4)?,
        date_modified: row.get(5)?,
        byte_size: row.get(6)?,
        mime_type: row.get(7)?,
        content_hash: row.get(8)?,
        width: row.get(9)?,
        height: row.get(10)?,
        has_faces: row.get(11)?,
        processed_at: row.get(12)?,
    })
}

fn query_one(conn: &Connection, filter: &str, param: &dyn rusqlite::ToSql) -> Result<Option<Photo>> {
    let sql = format!("SELECT {} FROM photos p WHERE {} ORDER BY p.id LIMIT 1", PHOTO_COLUMNS, filter);
    let photo = conn.query_row(&sql, [param], row_to_photo).optional()?;
    Ok(photo)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Photo>> {
    query_one(conn, "p.id = ?", &id)
}

pub fn find_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<Photo>> {
    query_one(conn, "p.external_id = ?", &external_id)
}

/// Earliest photo with the given content hash.
pub fn find_by_content_hash(conn: &Connection, content_hash: &str) -> Result<Option<Photo>> {
    query_one(conn, "p.content_hash = ?", &content_hash)
}

pub fn insert(conn: &Connection, meta: &PhotoMetadata) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO photos (external_id, uri, display_name, date_added, date_modified,
                            byte_size, mime_type, content_hash, width, height)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            meta.external_id,
            meta.uri,
            meta.display_name,
            meta.date_added,
            meta.date_modified,
            meta.byte_size,
            meta.mime_type,
            meta.content_hash,
            meta.width,
            meta.height,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite the source-reported fields of an existing photo. Extraction state is left alone.
pub fn update_metadata(conn: &Connection, id: i64, meta: &PhotoMetadata) -> Result<()> {
    conn.execute(
        r#"
        UPDATE photos
        SET external_id = ?, uri = ?, display_name = ?, date_modified = ?,
            byte_size = ?, mime_type = ?, content_hash = ?, width = ?, height = ?
        WHERE id = ?
        "#,
        params![
            meta.external_id,
            meta.uri,
            meta.display_name,
            meta.date_modified,
            meta.byte_size,
            meta.mime_type,
            meta.content_hash,
            meta.width,
            meta.height,
            id,
        ],
    )?;
    Ok(())
}

/// Drop extracted faces and mark the photo as never scanned.
///
/// Suggestions on the removed faces go with them through the foreign key.
pub fn reset_extraction(conn: &Connection, id: i64) -> Result<usize> {
    let removed = conn.execute("DELETE FROM faces WHERE photo_id = ?", [id])?;
    conn.execute(
        "UPDATE photos SET has_faces = 0, processed_at = NULL WHERE id = ?",
        [id],
    )?;
    Ok(removed)
}

pub fn mark_processed(conn: &Connection, id: i64, has_faces: bool, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE photos SET has_faces = ?, processed_at = ? WHERE id = ?",
        params![has_faces, at, id],
    )?;
    Ok(())
}

/// Ids of photos that have not been through face extraction yet.
pub fn unprocessed_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM photos WHERE processed_at IS NULL ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

/// `(id, external_id)` of every photo, optionally restricted to an external id prefix.
pub fn external_ids(conn: &Connection, prefix: Option<&str>) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, external_id FROM photos
        WHERE ?1 IS NULL OR substr(external_id, 1, length(?1)) = ?1
        ORDER BY id
        "#,
    )?;
    let rows = stmt
        .query_map([prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn.execute("DELETE FROM photos WHERE id = ?", [id])? > 0)
}

pub fn count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?)
}


#[cfg(test)]
mod tests {
    use super::fixtures::metadata;
    use super::*;
    use crate::db::Database;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_insert_and_lookup() {
        let db = db();
        let meta = metadata("/photos/a.jpg", "h1");
        let id = db.write(|tx| insert(tx, &meta)).unwrap();

        let by_ext = db.read(|c| find_by_external_id(c, "/photos/a.jpg")).unwrap().unwrap();
        let by_hash = db.read(|c| find_by_content_hash(c, "h1")).unwrap().unwrap();
        assert_eq!(by_ext.id, id);
        assert_eq!(by_hash.id, id);
        assert_eq!(by_ext.date_modified, meta.date_modified);
        assert!(by_ext.processed_at.is_none());
        assert!(!by_ext.has_faces);

        assert!(db.read(|c| get(c, id + 1)).unwrap().is_none());
    }

    #[test]
    fn test_external_id_prefix_filter() {
        let db = db();
        db.write(|tx| {
            insert(tx, &metadata("/photos/trip/a.jpg", "h1"))?;
            insert(tx, &metadata("/photos/trip/b.jpg", "h2"))?;
            insert(tx, &metadata("/photos/home/c.jpg", "h3"))?;
            Ok(())
        })
        .unwrap();

        let trip = db.read(|c| external_ids(c, Some("/photos/trip/"))).unwrap();
        assert_eq!(trip.len(), 2);
        let all = db.read(|c| external_ids(c, None)).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_mark_processed_and_reset() {
        let db = db();
        let id = db.write(|tx| insert(tx, &metadata("/a.jpg", "h1"))).unwrap();

        db.write(|tx| mark_processed(tx, id, false, Utc::now())).unwrap();
        assert!(db.read(|c| unprocessed_ids(c)).unwrap().is_empty());

        db.write(|tx| reset_extraction(tx, id)).unwrap();
        assert_eq!(db.read(|c| unprocessed_ids(c)).unwrap(), vec![id]);
    }
}
