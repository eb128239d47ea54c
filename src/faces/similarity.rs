//! Brute-force nearest neighbour search over stored face embeddings.
//!
//! Every vector in the index, and every query, is unit length, so cosine
//! similarity is a plain dot product. Scores remap it to `[0, 1]` with
//! `(cos + 1) / 2`. Results are sorted by descending score; equal scores keep
//! insertion order, oldest detection first.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rusqlite::Connection;

use super::detector::l2_normalize;
use crate::db::{faces, FaceEmbedding};
use crate::error::{Error, Result};

/// A stored face that matched a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub face_id: i64,
    pub photo_id: i64,
    pub detected_at: DateTime<Utc>,
    pub score: f32,
}

/// Snapshot of the stored embeddings.
///
/// Faces inserted after the snapshot was taken are not visible to it.
pub struct SimilarityIndex {
    dimension: usize,
    entries: Vec<FaceEmbedding>,
}

impl SimilarityIndex {
    pub fn new(dimension: usize, mut entries: Vec<FaceEmbedding>) -> Self {
        let before = entries.len();
        // Also drops zero vectors
        entries.retain_mut(|e| e.embedding.len() == dimension && l2_normalize(&mut e.embedding));
        if entries.len() < before {
            tracing::warn!(
                skipped = before - entries.len(),
                dimension,
                "Ignoring stored embeddings with a different dimension or zero length"
            );
        }
        entries.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then(a.face_id.cmp(&b.face_id))
        });
        Self { dimension, entries }
    }

    pub fn load(conn: &Connection, dimension: usize) -> Result<Self> {
        Ok(Self::new(dimension, faces::all_embeddings(conn)?))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `limit` faces scoring at least `threshold` against `query`.
    pub fn find_similar(&self, query: &[f32], threshold: f32, limit: usize) -> Result<Vec<Match>> {
        self.search(query, threshold, limit, None)
    }

    /// Like [`find_similar`](Self::find_similar) but never returns `face_id` itself.
    pub fn find_similar_to_face(
        &self,
        face_id: i64,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Match>> {
        self.search(query, threshold, limit, Some(face_id))
    }

    fn search(&self, query: &[f32], threshold: f32, limit: usize, exclude: Option<i64>) -> Result<Vec<Match>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let mut query = query.to_vec();
        if !l2_normalize(&mut query) {
            return Err(Error::InvalidArgument("query embedding is zero or non-finite".into()));
        }

        // Parallel collect keeps the index order, which the stable sort below relies on
        let mut matches: Vec<Match> = self
            .entries
            .par_iter()
            .filter(|e| Some(e.face_id) != exclude)
            .filter_map(|e| {
                let score = similarity_score(&query, &e.embedding);
                (score >= threshold).then(|| Match {
                    face_id: e.face_id,
                    photo_id: e.photo_id,
                    detected_at: e.detected_at,
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }
}

/// Cosine similarity of two unit vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two unit vectors, mapped into `[0, 1]`.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    ((cosine_similarity(a, b) + 1.0) / 2.0).clamp(0.0, 1.0)
}
