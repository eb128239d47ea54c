mod common;

use std::sync::Arc;

use common::{uri, CenterDetector, ColorEmbedder, Library, GREEN, ORANGE, RED};
use facefold::db::{faces, people, photos, suggestions, Database, Face, SuggestionStatus};
use facefold::faces::similarity::similarity_score;
use facefold::faces::{run_clustering_pass, ClusteringSettings, ExtractionOutcome, ExtractionSettings, FaceExtractor};
use facefold::lifecycle;
use facefold::pipeline::{Orchestrator, PipelineContext};
use facefold::scanner::resolver::{self, Resolution};
use facefold::scanner::{FsMediaSource, MediaSource};
use facefold::tasks::WorkTarget;
use facefold::Error;

fn settings(library: &Library) -> ClusteringSettings {
    ClusteringSettings::from(&library.config.faces)
}

fn faces_of(db: &Database, path: &std::path::Path) -> Vec<Face> {
    let photo = db
        .read(|c| photos::find_by_external_id(c, &uri(path)))
        .unwrap()
        .expect("photo stored");
    db.read(|c| faces::for_photo(c, photo.id)).unwrap()
}

#[test]
fn test_lookalike_faces_end_up_with_one_person() {
    let library = Library::new();
    let first = library.write_photo("a.png", RED);
    library.sync();

    let report = run_clustering_pass(&library.db, &settings(&library)).unwrap();
    assert_eq!(report.suggestions_created, 0);

    let second = library.write_photo("b.png", ORANGE);
    library.sync();

    let report = run_clustering_pass(&library.db, &settings(&library)).unwrap();
    assert_eq!(report.suggestions_created, 1);

    let pending = lifecycle::list_suggestions(&library.db, Some(SuggestionStatus::Pending)).unwrap();
    assert_eq!(pending.len(), 1);
    let second_face = &faces_of(&library.db, &second)[0];
    assert_eq!(pending[0].face_id, second_face.id);
    assert_eq!(pending[0].suggested_person_id, None);
    assert!(pending[0].similarity_score >= library.config.faces.similarity_threshold);

    let acceptance = lifecycle::accept(&library.db, pending[0].id, None).unwrap();
    assert!(acceptance.person_created);
    assert_eq!(acceptance.suggestion.status, SuggestionStatus::Accepted);
    let person = acceptance.person_id;

    // The older face now matches the accepted person
    run_clustering_pass(&library.db, &settings(&library)).unwrap();
    let first_face = &faces_of(&library.db, &first)[0];
    let follow_up = library
        .db
        .read(|c| suggestions::pending_for_face(c, first_face.id))
        .unwrap()
        .expect("suggestion for the older face");
    assert_eq!(follow_up.suggested_person_id, Some(person));

    let acceptance = lifecycle::accept(&library.db, follow_up.id, None).unwrap();
    assert!(!acceptance.person_created);

    let linked: Vec<String> = lifecycle::photos_for_person(&library.db, person)
        .unwrap()
        .into_iter()
        .map(|p| p.uri)
        .collect();
    assert_eq!(linked.len(), 2);
    assert!(linked.contains(&uri(&first)));
    assert!(linked.contains(&uri(&second)));
    assert_eq!(lifecycle::list_people(&library.db).unwrap().len(), 1);
}

#[test]
fn test_moved_file_keeps_its_identity() {
    let library = Library::new();
    let original = library.write_photo("a.png", RED);
    library.sync();
    let stored = library
        .db
        .read(|c| photos::find_by_external_id(c, &uri(&original)))
        .unwrap()
        .unwrap();
    let face_id = faces_of(&library.db, &original)[0].id;

    std::fs::create_dir_all(library.path("moved")).unwrap();
    let moved = library.path("moved/a.png");
    std::fs::rename(&original, &moved).unwrap();

    let item = library
        .source
        .list_all()
        .unwrap()
        .items
        .into_iter()
        .find(|item| item.external_id == uri(&moved))
        .unwrap();
    let hash = library.source.content_hash(&item).unwrap();
    let candidate = item.with_hash(hash);
    assert_eq!(
        library.db.read(|c| resolver::resolve(c, &candidate)).unwrap(),
        Resolution::Matched(stored.id)
    );

    let report = library.sync();
    assert_eq!(report.new, 0);
    assert_eq!(report.relocated, 1);
    assert_eq!(report.pruned, 0);
    assert!(report.needs_extraction.is_empty());

    assert_eq!(library.db.read(photos::count).unwrap(), 1);
    let relocated = library.db.read(|c| photos::get(c, stored.id)).unwrap().unwrap();
    assert_eq!(relocated.external_id, uri(&moved));
    assert_eq!(faces_of(&library.db, &moved)[0].id, face_id);
}

#[test]
fn test_unmounted_library_keeps_photos_and_people() {
    let library = Library::new();
    let photo = library.write_photo("a.png", RED);
    library.sync();
    let stored = library
        .db
        .read(|c| photos::find_by_external_id(c, &uri(&photo)))
        .unwrap()
        .unwrap();
    let person = library
        .db
        .write(|tx| {
            let person = people::create(tx, "Ada", chrono::Utc::now())?;
            people::link_photo(tx, person, stored.id, chrono::Utc::now())?;
            Ok(person)
        })
        .unwrap();

    let parked = library.dir.path().join("parked");
    std::fs::rename(library.root(), &parked).unwrap();
    let report = library.sync();
    assert_eq!(report.pruned, 0);
    assert_eq!(report.unavailable, 1);
    assert_eq!(library.db.read(photos::count).unwrap(), 1);
    assert_eq!(lifecycle::photos_for_person(&library.db, person).unwrap().len(), 1);

    std::fs::rename(&parked, library.root()).unwrap();
    let report = library.sync();
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.unavailable, 0);
}

#[test]
fn test_changed_content_supersedes_faces_and_suggestions() {
    let library = Library::new();
    library.write_photo("a.png", RED);
    let changing = library.write_photo("b.png", ORANGE);
    library.sync();
    run_clustering_pass(&library.db, &settings(&library)).unwrap();

    let stale_face = faces_of(&library.db, &changing)[0].id;
    let stale = library
        .db
        .read(|c| suggestions::pending_for_face(c, stale_face))
        .unwrap()
        .unwrap();

    library.write_photo("b.png", GREEN);
    let report = library.scan();
    assert_eq!(report.updated, 1);
    assert_eq!(report.needs_extraction.len(), 1);

    // Stale faces and their suggestions are gone, not dangling
    assert!(library.db.read(|c| faces::get(c, stale_face)).unwrap().is_none());
    assert!(library.db.read(|c| suggestions::get(c, stale.id)).unwrap().is_none());
    let photo_id = report.needs_extraction[0];
    let photo = library.db.read(|c| photos::get(c, photo_id)).unwrap().unwrap();
    assert!(photo.processed_at.is_none());

    let outcome = library.extractor.process_photo(&library.db, &library.source, photo_id).unwrap();
    let ExtractionOutcome::Extracted { face_ids } = outcome else {
        panic!("expected fresh extraction, got {:?}", outcome);
    };
    assert_eq!(face_ids.len(), 1);
    assert_ne!(face_ids[0], stale_face);

    // The new content no longer resembles the other photo
    let report = run_clustering_pass(&library.db, &settings(&library)).unwrap();
    assert_eq!(report.suggestions_created, 0);
    assert_eq!(library.db.read(|c| suggestions::count(c, None)).unwrap(), 0);
}

#[test]
fn test_repeated_sync_and_clustering_change_nothing() {
    let library = Library::new();
    library.write_photo("a.png", RED);
    library.write_photo("b.png", ORANGE);
    library.write_photo("c.png", GREEN);
    library.sync();
    run_clustering_pass(&library.db, &settings(&library)).unwrap();

    let faces_before = library.db.read(faces::count).unwrap();
    let suggestions_before = library.db.read(|c| suggestions::count(c, None)).unwrap();

    let report = library.sync();
    assert_eq!(report.new, 0);
    assert_eq!(report.unchanged, 3);
    assert!(report.needs_extraction.is_empty());

    for photo_id in library.db.read(|c| photos::external_ids(c, None)).unwrap().into_iter().map(|(id, _)| id) {
        let outcome = library.extractor.process_photo(&library.db, &library.source, photo_id).unwrap();
        assert_eq!(outcome, ExtractionOutcome::AlreadyProcessed);
    }
    let report = run_clustering_pass(&library.db, &settings(&library)).unwrap();
    assert_eq!(report.suggestions_created, 0);

    assert_eq!(library.db.read(faces::count).unwrap(), faces_before);
    assert_eq!(library.db.read(|c| suggestions::count(c, None)).unwrap(), suggestions_before);
}

#[test]
fn test_stored_embeddings_are_unit_length_and_self_similar() {
    let library = Library::new();
    library.write_photo("a.png", ORANGE);
    library.write_photo("b.png", GREEN);
    library.sync();

    let embeddings = library.db.read(faces::all_embeddings).unwrap();
    assert_eq!(embeddings.len(), 2);
    for stored in embeddings {
        assert_eq!(stored.embedding.len(), 2);
        let norm: f32 = stored.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {}", norm);
        assert!((similarity_score(&stored.embedding, &stored.embedding) - 1.0).abs() < 1e-5);
    }
}

#[test]
fn test_suggestion_state_machine() {
    let library = Library::new();
    library.write_photo("a.png", RED);
    library.write_photo("b.png", ORANGE);
    library.write_photo("c.png", ORANGE);
    library.sync();

    let face_ids: Vec<i64> = library
        .db
        .read(|c| faces::unassigned_unsuggested(c))
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    let accepted = lifecycle::create_suggestion(&library.db, face_ids[0], None, 0.9).unwrap();
    let rejected = lifecycle::create_suggestion(&library.db, face_ids[1], None, 0.8).unwrap();

    lifecycle::accept(&library.db, accepted.id, Some("Ada")).unwrap();
    assert!(matches!(
        lifecycle::accept(&library.db, accepted.id, None),
        Err(Error::AlreadyProcessed(_))
    ));
    assert!(matches!(
        lifecycle::reject(&library.db, accepted.id),
        Err(Error::AlreadyProcessed(_))
    ));

    let resolved = lifecycle::reject(&library.db, rejected.id).unwrap();
    assert_eq!(resolved.status, SuggestionStatus::Rejected);
    assert!(resolved.resolved_at.is_some());
    assert!(matches!(
        lifecycle::accept(&library.db, rejected.id, None),
        Err(Error::AlreadyProcessed(_))
    ));

    assert!(matches!(
        lifecycle::accept(&library.db, 9999, None),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        lifecycle::create_suggestion(&library.db, face_ids[2], None, 1.5),
        Err(Error::InvalidScore(_))
    ));

    let people = lifecycle::list_people(&library.db).unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].name, "Ada");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_runs_from_disk_to_suggestion() {
    let library = Library::new();
    library.write_photo("a.png", RED);
    library.write_photo("b.png", ORANGE);
    library.write_photo("c.png", GREEN);

    let db = Arc::new(Database::open_in_memory().unwrap());
    db.initialize().unwrap();
    let extractor = FaceExtractor::new(
        Arc::new(CenterDetector),
        Arc::new(ColorEmbedder),
        ExtractionSettings::from(&library.config.faces),
    );
    let ctx = PipelineContext::new(
        Arc::clone(&db),
        Arc::new(FsMediaSource::new(&library.config.library)),
        Arc::new(extractor),
        &library.config,
    );
    let orchestrator = Orchestrator::start(ctx, &library.config.pipeline);

    orchestrator.enqueue(WorkTarget::GlobalSync);
    orchestrator.wait_idle().await;
    orchestrator.shutdown().await;

    assert_eq!(db.read(photos::count).unwrap(), 3);
    assert_eq!(db.read(faces::count).unwrap(), 3);
    assert!(db.read(photos::unprocessed_ids).unwrap().is_empty());

    let pending = lifecycle::list_suggestions(&db, Some(SuggestionStatus::Pending)).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].suggested_person_id, None);
}
