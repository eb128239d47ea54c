//! People and person to photo links.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::photos::{row_to_photo, Photo, PHOTO_COLUMNS};
use crate::error::Result;

/// A person (named identity) with the number of linked photos
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub cover_photo_uri: Option<String>,
    pub photo_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PERSON_SELECT: &str = r#"
    SELECT p.id, p.name, p.cover_photo_uri, COUNT(pp.photo_id) AS photo_count,
           p.created_at, p.updated_at
    FROM people p
    LEFT JOIN person_photos pp ON pp.person_id = p.id
"#;

fn row_to_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        cover_photo_uri: row.get(2)?,
        photo_count: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

// ========================================================================
// People management
// ========================================================================

pub fn create(conn: &Connection, name: &str, at: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO people (name, created_at, updated_at) VALUES (?, ?, ?)",
        params![name, at, at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, person_id: i64) -> Result<Option<Person>> {
    let sql = format!("{} WHERE p.id = ? GROUP BY p.id", PERSON_SELECT);
    Ok(conn.query_row(&sql, [person_id], row_to_person).optional()?)
}

pub fn exists(conn: &Connection, person_id: i64) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM people WHERE id = ?", [person_id], |_| Ok(()))
        .optional()?
        .is_some())
}

/// All people with photo counts, ordered by name
pub fn list(conn: &Connection) -> Result<Vec<Person>> {
    let sql = format!("{} GROUP BY p.id ORDER BY p.name COLLATE NOCASE, p.id", PERSON_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let people = stmt
        .query_map([], row_to_person)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(people)
}

pub fn count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))?)
}

pub fn rename(conn: &Connection, person_id: i64, name: &str, at: DateTime<Utc>) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE people SET name = ?, updated_at = ? WHERE id = ?",
        params![name, at, person_id],
    )?;
    Ok(updated > 0)
}

/// Delete a person. Links and suggestions targeting them cascade.
pub fn delete(conn: &Connection, person_id: i64) -> Result<bool> {
    Ok(conn.execute("DELETE FROM people WHERE id = ?", [person_id])? > 0)
}

pub fn set_cover_if_missing(conn: &Connection, person_id: i64, uri: &str) -> Result<()> {
    conn.execute(
        "UPDATE people SET cover_photo_uri = ? WHERE id = ? AND cover_photo_uri IS NULL",
        params![uri, person_id],
    )?;
    Ok(())
}

// ========================================================================
// Person to photo links
// ========================================================================

/// Link a photo to a person. Returns false when the pair was already linked.
pub fn link_photo(conn: &Connection, person_id: i64, photo_id: i64, at: DateTime<Utc>) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO person_photos (person_id, photo_id, linked_at) VALUES (?, ?, ?)",
        params![person_id, photo_id, at],
    )?;
    if inserted > 0 {
        conn.execute(
            "UPDATE people SET updated_at = ? WHERE id = ?",
            params![at, person_id],
        )?;
    }
    Ok(inserted > 0)
}

pub fn unlink_photo(conn: &Connection, person_id: i64, photo_id: i64) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM person_photos WHERE person_id = ? AND photo_id = ?",
        params![person_id, photo_id],
    )?;
    Ok(removed > 0)
}

/// The person linked to a photo first, if any.
pub fn first_person_for_photo(conn: &Connection, photo_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            r#"
            SELECT person_id FROM person_photos
            WHERE photo_id = ?
            ORDER BY linked_at, person_id
            LIMIT 1
            "#,
            [photo_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn photos_for_person(conn: &Connection, person_id: i64) -> Result<Vec<Photo>> {
    let sql = format!(
        r#"
        SELECT {} FROM photos p
        JOIN person_photos pp ON pp.photo_id = p.id
        WHERE pp.person_id = ?
        ORDER BY pp.linked_at, p.id
        "#,
        PHOTO_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let photos = stmt
        .query_map([person_id], row_to_photo)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(photos)
}
