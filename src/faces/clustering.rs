//! Suggestion generation.
//!
//! Every face that is unassigned (its photo has no person link) and has no
//! pending suggestion is matched against all stored faces. The best usable
//! candidate above the similarity threshold becomes one pending suggestion:
//! 1. If the candidate face was accepted for a person, propose that person
//! 2. Otherwise, if the candidate's photo is linked to a person, propose the first one linked
//! 3. Otherwise, if the candidate is an older unassigned face, propose a new person
//!
//! A newer unassigned candidate is skipped: for two lookalike unassigned faces
//! only the newer one is suggested, and the older one follows once the newer
//! one has been accepted. Faces without a usable candidate stay eligible for
//! later passes. Re-running a pass with no new faces creates nothing.

use chrono::Utc;
use rusqlite::Connection;

use super::similarity::{Match, SimilarityIndex};
use crate::config::FaceConfig;
use crate::db::{faces, people, suggestions, Database, Face};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ClusteringSettings {
    pub similarity_threshold: f32,
    pub candidate_limit: usize,
    pub embedding_dimension: usize,
}

impl From<&FaceConfig> for ClusteringSettings {
    fn from(config: &FaceConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            candidate_limit: config.candidate_limit,
            embedding_dimension: config.embedding_dimension,
        }
    }
}

/// Result of a clustering pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusteringReport {
    /// Eligible faces looked at
    pub faces_considered: usize,
    pub suggestions_created: usize,
    /// Faces with no candidate above the threshold
    pub without_candidates: usize,
    /// Faces whose only candidates are newer unassigned faces
    pub deferred: usize,
    /// Faces whose best target the user already rejected
    pub suppressed: usize,
}

enum Step {
    Created,
    Deferred,
    Suppressed,
    Skipped,
}

/// Person the matched face belongs to, if any.
fn person_for_match(conn: &Connection, candidate: &Match) -> Result<Option<i64>> {
    if let Some(person) = suggestions::accepted_person_for_face(conn, candidate.face_id)? {
        return Ok(Some(person));
    }
    people::first_person_for_photo(conn, candidate.photo_id)
}

/// Same order the similarity index uses for ties.
fn detected_before(candidate: &Match, face: &Face) -> bool {
    (candidate.detected_at, candidate.face_id) < (face.detected_at, face.id)
}

/// First candidate that can be proposed, with the person it resolves to.
fn pick_target<'a>(conn: &Connection, face: &Face, candidates: &'a [Match]) -> Result<Option<(&'a Match, Option<i64>)>> {
    for candidate in candidates {
        let person = person_for_match(conn, candidate)?;
        if person.is_some() || detected_before(candidate, face) {
            return Ok(Some((candidate, person)));
        }
    }
    Ok(None)
}

pub fn run_clustering_pass(db: &Database, settings: &ClusteringSettings) -> Result<ClusteringReport> {
    let index = db.read(|c| SimilarityIndex::load(c, settings.embedding_dimension))?;
    let eligible = db.read(faces::unassigned_unsuggested)?;

    let mut report = ClusteringReport {
        faces_considered: eligible.len(),
        ..ClusteringReport::default()
    };

    for face in eligible {
        if face.embedding.len() != settings.embedding_dimension {
            tracing::warn!(face_id = face.id, dim = face.embedding.len(), "Skipping face with stale embedding");
            continue;
        }

        let candidates = index.find_similar_to_face(
            face.id,
            &face.embedding,
            settings.similarity_threshold,
            settings.candidate_limit,
        )?;
        if candidates.is_empty() {
            report.without_candidates += 1;
            continue;
        }

        let step = db.write(|tx| {
            // The face may have been replaced by a re-scan since the snapshot
            if faces::get(tx, face.id)?.is_none() {
                return Ok(Step::Skipped);
            }
            let Some((best, person)) = pick_target(tx, &face, &candidates)? else {
                return Ok(Step::Deferred);
            };
            if suggestions::was_rejected(tx, face.id, person)? {
                return Ok(Step::Suppressed);
            }
            match suggestions::insert_pending(tx, face.id, person, best.score, Utc::now())? {
                Some(id) => {
                    tracing::debug!(
                        suggestion_id = id,
                        face_id = face.id,
                        matched_face = best.face_id,
                        person = ?person,
                        score = best.score,
                        "Suggestion created"
                    );
                    Ok(Step::Created)
                }
                None => Ok(Step::Skipped),
            }
        })?;

        match step {
            Step::Created => report.suggestions_created += 1,
            Step::Deferred => report.deferred += 1,
            Step::Suppressed => report.suppressed += 1,
            Step::Skipped => {}
        }
    }

    tracing::info!(
        considered = report.faces_considered,
        created = report.suggestions_created,
        without_candidates = report.without_candidates,
        deferred = report.deferred,
        suppressed = report.suppressed,
        "Clustering pass finished"
    );
    Ok(report)
}
