//! Suggestion rows: proposed face to person matches and their resolution.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Accepted => "accepted",
            SuggestionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SuggestionStatus::Pending),
            "accepted" => Some(SuggestionStatus::Accepted),
            "rejected" => Some(SuggestionStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SuggestionStatus::Pending)
    }
}

impl std::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for SuggestionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SuggestionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        SuggestionStatus::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown suggestion status {:?}", s).into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub id: i64,
    pub face_id: i64,
    /// `None` proposes a new person.
    pub suggested_person_id: Option<i64>,
    pub similarity_score: f32,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

const SUGGESTION_COLUMNS: &str =
    "id, face_id, suggested_person_id, similarity_score, status, created_at, resolved_at";

fn row_to_suggestion(row: &Row<'_>) -> rusqlite::Result<Suggestion> {
    Ok(Suggestion {
        id: row.get(0)?,
        face_id: row.get(1)?,
        suggested_person_id: row.get(2)?,
        similarity_score: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        resolved_at: row.get(6)?,
    })
}

/// Insert a pending suggestion unless the face already has one.
///
/// Returns `None` when the one-pending-per-face index rejected the row.
pub fn insert_pending(
    conn: &Connection,
    face_id: i64,
    person_id: Option<i64>,
    score: f32,
    at: DateTime<Utc>,
) -> Result<Option<i64>> {
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO suggestions (face_id, suggested_person_id, similarity_score, status, created_at)
        VALUES (?, ?, ?, 'pending', ?)
        "#,
        params![face_id, person_id, score, at],
    )?;
    Ok((inserted > 0).then(|| conn.last_insert_rowid()))
}

/// Insert a suggestion that is already resolved, e.g. a manual assignment.
pub fn insert_resolved(
    conn: &Connection,
    face_id: i64,
    person_id: i64,
    score: f32,
    status: SuggestionStatus,
    at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO suggestions (face_id, suggested_person_id, similarity_score, status, created_at, resolved_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![face_id, person_id, score, status, at, at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Suggestion>> {
    let sql = format!("SELECT {} FROM suggestions WHERE id = ?", SUGGESTION_COLUMNS);
    Ok(conn.query_row(&sql, [id], row_to_suggestion).optional()?)
}

pub fn pending_for_face(conn: &Connection, face_id: i64) -> Result<Option<Suggestion>> {
    let sql = format!(
        "SELECT {} FROM suggestions WHERE face_id = ? AND status = 'pending'",
        SUGGESTION_COLUMNS
    );
    Ok(conn.query_row(&sql, [face_id], row_to_suggestion).optional()?)
}

pub fn for_face(conn: &Connection, face_id: i64) -> Result<Vec<Suggestion>> {
    let sql = format!(
        "SELECT {} FROM suggestions WHERE face_id = ? ORDER BY created_at, id",
        SUGGESTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([face_id], row_to_suggestion)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Suggestions in creation order, optionally filtered by status.
pub fn list(conn: &Connection, status: Option<SuggestionStatus>) -> Result<Vec<Suggestion>> {
    let sql = format!(
        "SELECT {} FROM suggestions WHERE ?1 IS NULL OR status = ?1 ORDER BY created_at, id",
        SUGGESTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([status], row_to_suggestion)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Move a pending suggestion to a terminal status.
///
/// The `status = 'pending'` guard makes each terminal state reachable once;
/// returns false if the row was not pending.
pub fn resolve(
    conn: &Connection,
    id: i64,
    status: SuggestionStatus,
    person_id: Option<i64>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE suggestions
        SET status = ?, resolved_at = ?, suggested_person_id = COALESCE(?, suggested_person_id)
        WHERE id = ? AND status = 'pending'
        "#,
        params![status, at, person_id, id],
    )?;
    Ok(updated > 0)
}

/// Person an accepted suggestion attached this face to, most recent first.
pub fn accepted_person_for_face(conn: &Connection, face_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            r#"
            SELECT suggested_person_id FROM suggestions
            WHERE face_id = ? AND status = 'accepted' AND suggested_person_id IS NOT NULL
            ORDER BY resolved_at DESC, id DESC
            LIMIT 1
            "#,
            [face_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Whether the user already rejected this face for this target (`None` = new person).
pub fn was_rejected(conn: &Connection, face_id: i64, person_id: Option<i64>) -> Result<bool> {
    Ok(conn
        .query_row(
            r#"
            SELECT 1 FROM suggestions
            WHERE face_id = ? AND suggested_person_id IS ? AND status = 'rejected'
            LIMIT 1
            "#,
            params![face_id, person_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub fn count(conn: &Connection, status: Option<SuggestionStatus>) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM suggestions WHERE ?1 IS NULL OR status = ?1",
        [status],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::faces::{self, BoundingBox, NewFace};
    use crate::db::photos::{self, fixtures::metadata};
    use crate::db::{people, Database};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let face_id = db
            .write(|tx| {
                let photo = photos::insert(tx, &metadata("/a.jpg", "h1"))?;
                let face = NewFace {
                    bbox: BoundingBox::new(0.0, 0.0, 0.5, 0.5),
                    embedding: vec![1.0, 0.0],
                    confidence: 0.9,
                };
                Ok(faces::insert_faces(tx, photo, &[face], Utc::now())?[0])
            })
            .unwrap();
        (db, face_id)
    }

    #[test]
    fn test_one_pending_per_face() {
        let (db, face_id) = setup();
        let now = Utc::now();

        let first = db.write(|tx| insert_pending(tx, face_id, None, 0.8, now)).unwrap();
        let second = db.write(|tx| insert_pending(tx, face_id, None, 0.9, now)).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(db.read(|c| count(c, Some(SuggestionStatus::Pending))).unwrap(), 1);

        // Once resolved, a new pending one is allowed again
        db.write(|tx| resolve(tx, first.unwrap(), SuggestionStatus::Rejected, None, now)).unwrap();
        let third = db.write(|tx| insert_pending(tx, face_id, None, 0.7, now)).unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn test_resolve_only_from_pending() {
        let (db, face_id) = setup();
        let now = Utc::now();
        let id = db.write(|tx| insert_pending(tx, face_id, None, 0.8, now)).unwrap().unwrap();

        assert!(db.write(|tx| resolve(tx, id, SuggestionStatus::Accepted, None, now)).unwrap());
        assert!(!db.write(|tx| resolve(tx, id, SuggestionStatus::Rejected, None, now)).unwrap());

        let row = db.read(|c| get(c, id)).unwrap().unwrap();
        assert_eq!(row.status, SuggestionStatus::Accepted);
        assert!(row.resolved_at.is_some());
    }

    #[test]
    fn test_was_rejected_matches_null_target() {
        let (db, face_id) = setup();
        let now = Utc::now();
        let person = db.write(|tx| people::create(tx, "Ada", now)).unwrap();

        let id = db.write(|tx| insert_pending(tx, face_id, None, 0.8, now)).unwrap().unwrap();
        db.write(|tx| resolve(tx, id, SuggestionStatus::Rejected, None, now)).unwrap();

        assert!(db.read(|c| was_rejected(c, face_id, None)).unwrap());
        assert!(!db.read(|c| was_rejected(c, face_id, Some(person))).unwrap());
    }

    #[test]
    fn test_status_strings() {
        for status in [SuggestionStatus::Pending, SuggestionStatus::Accepted, SuggestionStatus::Rejected] {
            assert_eq!(SuggestionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SuggestionStatus::parse("maybe"), None);
        assert!(SuggestionStatus::Accepted.is_terminal());
        assert!(!SuggestionStatus::Pending.is_terminal());
    }
}
