//! Database functions for detected faces.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

/// Face bounding box in coordinates normalized to the image size (0..1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    /// Build a box and clamp it into the unit square.
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left: left.clamp(0.0, 1.0),
            top: top.clamp(0.0, 1.0),
            right: right.clamp(0.0, 1.0),
            bottom: bottom.clamp(0.0, 1.0),
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// A detected face in a photo
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub id: i64,
    pub photo_id: i64,
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    pub confidence: f32,
    pub detected_at: DateTime<Utc>,
}

/// A face ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

/// The slice of a face the similarity index scans over.
#[derive(Debug, Clone)]
pub struct FaceEmbedding {
    pub face_id: i64,
    pub photo_id: i64,
    pub embedding: Vec<f32>,
    pub detected_at: DateTime<Utc>,
}

const FACE_COLUMNS: &str = r#"
    f.id, f.photo_id, f.bbox_left, f.bbox_top, f.bbox_right, f.bbox_bottom,
    f.embedding, f.confidence, f.detected_at
"#;

fn row_to_face(row: &Row<'_>) -> rusqlite::Result<Face> {
    let bytes: Vec<u8> = row.get(6)?;
    Ok(Face {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        bbox: BoundingBox {
            left: row.get(2)?,
            top: row.get(3)?,
            right: row.get(4)?,
            bottom: row.get(5)?,
        },
        embedding: bytes_to_embedding(&bytes),
        confidence: row.get(7)?,
        detected_at: row.get(8)?,
    })
}

/// Store detected faces for a photo, returning their ids in input order.
pub fn insert_faces(
    conn: &Connection,
    photo_id: i64,
    faces: &[NewFace],
    detected_at: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO faces (photo_id, bbox_left, bbox_top, bbox_right, bbox_bottom,
                           embedding, embedding_dim, confidence, detected_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )?;

    let mut ids = Vec::with_capacity(faces.len());
    for face in faces {
        stmt.execute(params![
            photo_id,
            face.bbox.left,
            face.bbox.top,
            face.bbox.right,
            face.bbox.bottom,
            embedding_to_bytes(&face.embedding),
            face.embedding.len() as i64,
            face.confidence,
            detected_at,
        ])?;
        ids.push(conn.last_insert_rowid());
    }
    Ok(ids)
}

pub fn get(conn: &Connection, face_id: i64) -> Result<Option<Face>> {
    let sql = format!("SELECT {} FROM faces f WHERE f.id = ?", FACE_COLUMNS);
    Ok(conn.query_row(&sql, [face_id], row_to_face).optional()?)
}

pub fn for_photo(conn: &Connection, photo_id: i64) -> Result<Vec<Face>> {
    let sql = format!(
        "SELECT {} FROM faces f WHERE f.photo_id = ? ORDER BY f.detected_at, f.id",
        FACE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let faces = stmt
        .query_map([photo_id], row_to_face)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(faces)
}

/// Every stored embedding, oldest detection first.
pub fn all_embeddings(conn: &Connection) -> Result<Vec<FaceEmbedding>> {
    let mut stmt = conn.prepare(
        "SELECT id, photo_id, embedding, detected_at FROM faces ORDER BY detected_at, id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let bytes: Vec<u8> = row.get(2)?;
            Ok(FaceEmbedding {
                face_id: row.get(0)?,
                photo_id: row.get(1)?,
                embedding: bytes_to_embedding(&bytes),
                detected_at: row.get(3)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Faces whose photo has no person link and that have no pending suggestion.
pub fn unassigned_unsuggested(conn: &Connection) -> Result<Vec<Face>> {
    let sql = format!(
        r#"
        SELECT {} FROM faces f
        WHERE NOT EXISTS (SELECT 1 FROM person_photos pp WHERE pp.photo_id = f.photo_id)
          AND NOT EXISTS (
              SELECT 1 FROM suggestions s WHERE s.face_id = f.id AND s.status = 'pending'
          )
        ORDER BY f.detected_at, f.id
        "#,
        FACE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let faces = stmt
        .query_map([], row_to_face)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(faces)
}

pub fn count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Convert f32 slice to bytes for storage
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::photos::{self, fixtures::metadata};
    use crate::db::{people, suggestions, Database};

    fn face(embedding: Vec<f32>) -> NewFace {
        NewFace {
            bbox: BoundingBox::new(0.1, 0.1, 0.4, 0.5),
            embedding,
            confidence: 0.95,
        }
    }

    #[test]
    fn test_embedding_bytes_preserve_values() {
        let embedding = vec![0.5, -1.25, 3.0e-7, f32::MAX];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&embedding)), embedding);
    }

    #[test]
    fn test_bounding_box_clamps() {
        let bbox = BoundingBox::new(-0.2, 0.1, 1.4, 0.3);
        assert_eq!(bbox.left, 0.0);
        assert_eq!(bbox.right, 1.0);
        assert!((bbox.height() - 0.2).abs() < 1e-6);
        assert!(BoundingBox::new(0.5, 0.5, 0.5, 0.9).is_empty());
    }

    #[test]
    fn test_faces_cascade_with_photo() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let photo_id = db.write(|tx| photos::insert(tx, &metadata("/a.jpg", "h1"))).unwrap();
        let ids = db
            .write(|tx| insert_faces(tx, photo_id, &[face(vec![1.0, 0.0]), face(vec![0.0, 1.0])], Utc::now()))
            .unwrap();
        assert_eq!(ids.len(), 2);

        let stored = db.read(|c| for_photo(c, photo_id)).unwrap();
        assert_eq!(stored[1].embedding, vec![0.0, 1.0]);

        db.write(|tx| photos::delete(tx, photo_id)).unwrap();
        assert_eq!(db.read(|c| count(c)).unwrap(), 0);
    }

    #[test]
    fn test_unassigned_unsuggested_filters() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let now = Utc::now();

        let (linked, suggested, free) = db
            .write(|tx| {
                let p1 = photos::insert(tx, &metadata("/1.jpg", "h1"))?;
                let p2 = photos::insert(tx, &metadata("/2.jpg", "h2"))?;
                let p3 = photos::insert(tx, &metadata("/3.jpg", "h3"))?;
                let f1 = insert_faces(tx, p1, &[face(vec![1.0])], now)?[0];
                let f2 = insert_faces(tx, p2, &[face(vec![1.0])], now)?[0];
                let f3 = insert_faces(tx, p3, &[face(vec![1.0])], now)?[0];

                let person = people::create(tx, "Ada", now)?;
                people::link_photo(tx, person, p1, now)?;
                suggestions::insert_pending(tx, f2, None, 0.9, now)?;
                Ok((f1, f2, f3))
            })
            .unwrap();

        let eligible: Vec<i64> = db
            .read(|c| unassigned_unsuggested(c))
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(eligible, vec![free]);
        assert!(!eligible.contains(&linked));
        assert!(!eligible.contains(&suggested));
    }
}
