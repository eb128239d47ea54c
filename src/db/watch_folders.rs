use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct WatchFolder {
    pub id: i64,
    pub path: String,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
}

fn row_to_folder(row: &Row<'_>) -> rusqlite::Result<WatchFolder> {
    Ok(WatchFolder {
        id: row.get(0)?,
        path: row.get(1)?,
        is_enabled: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Add a folder, or return the existing row for the same path.
pub fn add(conn: &Connection, path: &str, at: DateTime<Utc>) -> Result<WatchFolder> {
    conn.execute(
        "INSERT OR IGNORE INTO watch_folders (path, is_enabled, created_at) VALUES (?, 1, ?)",
        params![path, at],
    )?;
    Ok(conn.query_row(
        "SELECT id, path, is_enabled, created_at FROM watch_folders WHERE path = ?",
        [path],
        row_to_folder,
    )?)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<WatchFolder>> {
    Ok(conn
        .query_row(
            "SELECT id, path, is_enabled, created_at FROM watch_folders WHERE id = ?",
            [id],
            row_to_folder,
        )
        .optional()?)
}

pub fn list(conn: &Connection, enabled_only: bool) -> Result<Vec<WatchFolder>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, path, is_enabled, created_at FROM watch_folders
        WHERE ?1 = 0 OR is_enabled = 1
        ORDER BY path
        "#,
    )?;
    let folders = stmt
        .query_map([enabled_only], row_to_folder)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(folders)
}

pub fn set_enabled(conn: &Connection, id: i64, enabled: bool) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE watch_folders SET is_enabled = ? WHERE id = ?",
        params![enabled, id],
    )?;
    Ok(updated > 0)
}

pub fn remove(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn.execute("DELETE FROM watch_folders WHERE id = ?", [id])? > 0)
}
