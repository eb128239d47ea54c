//! User-facing commands: the suggestion state machine, people and watch folders.
//!
//! A suggestion moves `Pending -> Accepted` or `Pending -> Rejected` exactly
//! once. Every command with more than one write runs in a single store
//! transaction, so a failure part way through leaves the suggestion pending.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::{faces, people, photos, suggestions, watch_folders};
use crate::db::{Database, Person, Photo, Suggestion, SuggestionStatus, WatchFolder};
use crate::error::{Error, Result};

/// Score recorded for a face the user assigned by hand.
pub const MANUAL_ASSIGNMENT_SCORE: f32 = 1.0;

/// Where a manually assigned face should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignTarget {
    Existing(i64),
    /// A new person, named or auto-named.
    New(Option<String>),
}

/// Outcome of an accepted suggestion or manual assignment.
#[derive(Debug, Clone)]
pub struct Acceptance {
    pub suggestion: Suggestion,
    pub person_id: i64,
    pub person_created: bool,
    /// False when the photo was already linked to the person.
    pub newly_linked: bool,
}

fn normalized_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("person name must not be blank".into()));
    }
    Ok(trimmed.to_string())
}

fn validate_score(score: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&score) {
        return Err(Error::InvalidScore(score));
    }
    Ok(())
}

/// Create a person with the given name, or "Person N" when none is given.
fn create_person_in(conn: &Connection, name: Option<&str>) -> Result<i64> {
    let name = match name {
        Some(name) => normalized_name(name)?,
        None => format!("Person {}", people::count(conn)? + 1),
    };
    let id = people::create(conn, &name, Utc::now())?;
    tracing::info!(person_id = id, name = %name, "Person created");
    Ok(id)
}

/// Link the face's photo to a person, filling in the cover if it is unset.
fn link_face(conn: &Connection, face_id: i64, person_id: i64) -> Result<bool> {
    let face = faces::get(conn, face_id)?.ok_or_else(|| Error::not_found("face", face_id))?;
    let photo = photos::get(conn, face.photo_id)?.ok_or_else(|| Error::not_found("photo", face.photo_id))?;
    let linked = people::link_photo(conn, person_id, photo.id, Utc::now())?;
    people::set_cover_if_missing(conn, person_id, &photo.uri)?;
    Ok(linked)
}

fn pending_suggestion(conn: &Connection, suggestion_id: i64) -> Result<Suggestion> {
    let suggestion =
        suggestions::get(conn, suggestion_id)?.ok_or_else(|| Error::not_found("suggestion", suggestion_id))?;
    if suggestion.status.is_terminal() {
        return Err(Error::AlreadyProcessed(suggestion_id));
    }
    Ok(suggestion)
}

fn reload(conn: &Connection, suggestion_id: i64) -> Result<Suggestion> {
    suggestions::get(conn, suggestion_id)?.ok_or_else(|| Error::not_found("suggestion", suggestion_id))
}

// ============================================================================
// Suggestions
// ============================================================================

/// Record a pending suggestion for a face.
///
/// If the face already has a pending suggestion, that one is returned
/// unchanged.
pub fn create_suggestion(db: &Database, face_id: i64, person_id: Option<i64>, score: f32) -> Result<Suggestion> {
    validate_score(score)?;
    db.write(|tx| {
        if faces::get(tx, face_id)?.is_none() {
            return Err(Error::not_found("face", face_id));
        }
        if let Some(person_id) = person_id {
            if !people::exists(tx, person_id)? {
                return Err(Error::not_found("person", person_id));
            }
        }
        if let Some(existing) = suggestions::pending_for_face(tx, face_id)? {
            return Ok(existing);
        }
        let id = suggestions::insert_pending(tx, face_id, person_id, score, Utc::now())?
            .ok_or_else(|| Error::Internal(format!("pending suggestion for face {} vanished", face_id)))?;
        reload(tx, id)
    })
}

/// Accept a pending suggestion.
///
/// A suggestion without a person creates one, named `name` or auto-named.
/// `name` is ignored when the suggestion already names a person.
pub fn accept(db: &Database, suggestion_id: i64, name: Option<&str>) -> Result<Acceptance> {
    db.write(|tx| {
        let suggestion = pending_suggestion(tx, suggestion_id)?;

        let (person_id, person_created) = match suggestion.suggested_person_id {
            Some(person_id) => (person_id, false),
            None => (create_person_in(tx, name)?, true),
        };
        let newly_linked = link_face(tx, suggestion.face_id, person_id)?;

        if !suggestions::resolve(tx, suggestion_id, SuggestionStatus::Accepted, Some(person_id), Utc::now())? {
            return Err(Error::AlreadyProcessed(suggestion_id));
        }
        tracing::info!(suggestion_id, person_id, face_id = suggestion.face_id, "Suggestion accepted");

        Ok(Acceptance {
            suggestion: reload(tx, suggestion_id)?,
            person_id,
            person_created,
            newly_linked,
        })
    })
}

/// Reject a pending suggestion. Nothing else changes.
pub fn reject(db: &Database, suggestion_id: i64) -> Result<Suggestion> {
    db.write(|tx| {
        pending_suggestion(tx, suggestion_id)?;
        if !suggestions::resolve(tx, suggestion_id, SuggestionStatus::Rejected, None, Utc::now())? {
            return Err(Error::AlreadyProcessed(suggestion_id));
        }
        tracing::info!(suggestion_id, "Suggestion rejected");
        reload(tx, suggestion_id)
    })
}

/// Assign a face to a person by hand.
///
/// Any pending suggestion for the face is rejected, and an accepted
/// suggestion with score 1.0 is recorded so the history shows the assignment.
pub fn assign_face(db: &Database, face_id: i64, target: AssignTarget) -> Result<Acceptance> {
    db.write(|tx| {
        if faces::get(tx, face_id)?.is_none() {
            return Err(Error::not_found("face", face_id));
        }

        let (person_id, person_created) = match &target {
            AssignTarget::Existing(person_id) => {
                if !people::exists(tx, *person_id)? {
                    return Err(Error::not_found("person", *person_id));
                }
                (*person_id, false)
            }
            AssignTarget::New(name) => (create_person_in(tx, name.as_deref())?, true),
        };

        let now = Utc::now();
        if let Some(pending) = suggestions::pending_for_face(tx, face_id)? {
            suggestions::resolve(tx, pending.id, SuggestionStatus::Rejected, None, now)?;
        }
        let newly_linked = link_face(tx, face_id, person_id)?;
        let id = suggestions::insert_resolved(
            tx,
            face_id,
            person_id,
            MANUAL_ASSIGNMENT_SCORE,
            SuggestionStatus::Accepted,
            now,
        )?;
        tracing::info!(face_id, person_id, "Face assigned manually");

        Ok(Acceptance {
            suggestion: reload(tx, id)?,
            person_id,
            person_created,
            newly_linked,
        })
    })
}

pub fn list_suggestions(db: &Database, status: Option<SuggestionStatus>) -> Result<Vec<Suggestion>> {
    db.read(|c| suggestions::list(c, status))
}

// ============================================================================
// People
// ============================================================================

pub fn create_person(db: &Database, name: &str) -> Result<Person> {
    let name = normalized_name(name)?;
    db.write(|tx| {
        let id = create_person_in(tx, Some(&name))?;
        people::get(tx, id)?.ok_or_else(|| Error::not_found("person", id))
    })
}

pub fn rename_person(db: &Database, person_id: i64, name: &str) -> Result<Person> {
    let name = normalized_name(name)?;
    db.write(|tx| {
        if !people::rename(tx, person_id, &name, Utc::now())? {
            return Err(Error::not_found("person", person_id));
        }
        people::get(tx, person_id)?.ok_or_else(|| Error::not_found("person", person_id))
    })
}

/// Delete a person. Links and suggestions naming the person go with it.
pub fn delete_person(db: &Database, person_id: i64) -> Result<()> {
    db.write(|tx| {
        if !people::delete(tx, person_id)? {
            return Err(Error::not_found("person", person_id));
        }
        tracing::info!(person_id, "Person deleted");
        Ok(())
    })
}

pub fn list_people(db: &Database) -> Result<Vec<Person>> {
    db.read(people::list)
}

pub fn photos_for_person(db: &Database, person_id: i64) -> Result<Vec<Photo>> {
    db.read(|c| {
        if !people::exists(c, person_id)? {
            return Err(Error::not_found("person", person_id));
        }
        people::photos_for_person(c, person_id)
    })
}

/// Link a photo to a person. Linking an already linked pair is a no-op.
pub fn link_photo(db: &Database, person_id: i64, photo_id: i64) -> Result<bool> {
    db.write(|tx| {
        if !people::exists(tx, person_id)? {
            return Err(Error::not_found("person", person_id));
        }
        let photo = photos::get(tx, photo_id)?.ok_or_else(|| Error::not_found("photo", photo_id))?;
        let linked = people::link_photo(tx, person_id, photo_id, Utc::now())?;
        people::set_cover_if_missing(tx, person_id, &photo.uri)?;
        Ok(linked)
    })
}

pub fn unlink_photo(db: &Database, person_id: i64, photo_id: i64) -> Result<bool> {
    db.write(|tx| people::unlink_photo(tx, person_id, photo_id))
}

// ============================================================================
// Watch folders
// ============================================================================

pub fn add_watch_folder(db: &Database, path: &str) -> Result<WatchFolder> {
    let path = path.trim();
    if path.is_empty() {
        return Err(Error::InvalidArgument("watch folder path must not be blank".into()));
    }
    db.write(|tx| watch_folders::add(tx, path, Utc::now()))
}

/// Remove a watch folder row. Queued scans for it are cancelled by the orchestrator.
pub fn remove_watch_folder(db: &Database, folder_id: i64) -> Result<WatchFolder> {
    db.write(|tx| {
        let folder = watch_folders::get(tx, folder_id)?.ok_or_else(|| Error::not_found("watch folder", folder_id))?;
        watch_folders::remove(tx, folder_id)?;
        Ok(folder)
    })
}

pub fn set_watch_folder_enabled(db: &Database, folder_id: i64, enabled: bool) -> Result<WatchFolder> {
    db.write(|tx| {
        if !watch_folders::set_enabled(tx, folder_id, enabled)? {
            return Err(Error::not_found("watch folder", folder_id));
        }
        watch_folders::get(tx, folder_id)?.ok_or_else(|| Error::not_found("watch folder", folder_id))
    })
}

pub fn list_watch_folders(db: &Database) -> Result<Vec<WatchFolder>> {
    db.read(|c| watch_folders::list(c, false))
}
