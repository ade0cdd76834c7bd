mod common;

use common::{hashed_settings, write};
use dataroom::retrieval::{RetrievalStatus, Stage};
use dataroom::{Dataroom, QueryIntent, RetrievalMode, RetrievalRequest, UploadMetadata};
use tempfile::TempDir;

#[test]
fn test_fragments_come_from_best_case_only() {
    let dir = TempDir::new().unwrap();
    let room = Dataroom::open(hashed_settings(dir.path(), RetrievalMode::Cascaded)).unwrap();

    let a = write(
        dir.path(),
        "case_a.md",
        "Patient fell and reports femur pain.\n\nFemur fracture confirmed on x-ray, healing well.\n",
    );
    let b = write(
        dir.path(),
        "case_b.md",
        "Patient presents with itchy rash.\n\nDermatitis on both arms, femur not examined.\n",
    );
    let case_a = room.upload(&a, UploadMetadata::default()).unwrap();
    room.upload(&b, UploadMetadata::default()).unwrap();

    let payload = room
        .retrieve(&RetrievalRequest::text("femur fracture healing"))
        .unwrap();

    assert!(payload.found());
    assert_eq!(payload.intent, QueryIntent::TextOnly);

    let best = payload.hits(Stage::Coarse).next().unwrap();
    assert_eq!(best.metadata.source_id, case_a.source_id);

    let fine: Vec<_> = payload.hits(Stage::Fine).collect();
    assert!(!fine.is_empty());
    assert!(fine.iter().all(|h| h.metadata.source_id == case_a.source_id));
    assert!(payload.citations.iter().all(|c| c.label.starts_with("Case: case_a.md")));
}

#[test]
fn test_cascaded_table_rows_scoped_to_table() {
    let dir = TempDir::new().unwrap();
    let room = Dataroom::open(hashed_settings(dir.path(), RetrievalMode::Cascaded)).unwrap();

    let people = write(dir.path(), "people.csv", "name,age\nAlice,30\nBob,40\n");
    let cities = write(dir.path(), "cities.csv", "city,country\nParis,France\nOslo,Norway\n");
    let people_report = room.upload(&people, UploadMetadata::default()).unwrap();
    room.upload(&cities, UploadMetadata::default()).unwrap();

    let payload = room.retrieve(&RetrievalRequest::text("Alice age")).unwrap();
    assert!(payload.found());

    let fine: Vec<_> = payload.hits(Stage::Fine).collect();
    assert!(fine.iter().all(|h| h.metadata.source_id == people_report.source_id));
    assert!(fine[0].content.contains("Alice,30"));
}

#[test]
fn test_empty_index_reports_coarse_stage() {
    let dir = TempDir::new().unwrap();
    let room = Dataroom::open(hashed_settings(dir.path(), RetrievalMode::Cascaded)).unwrap();

    let payload = room.retrieve(&RetrievalRequest::text("anything")).unwrap();
    assert_eq!(
        payload.status,
        RetrievalStatus::NoRelevantContent {
            stage: Stage::Coarse
        }
    );
    assert!(payload.citations.is_empty());
    assert!(payload.answer_context.is_empty());
}
