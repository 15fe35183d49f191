//! Engine integration tests over the public API.
//!
//! Unit tests in the engine module pin individual stage behavior; these
//! cover whole runs with checkpoints persisted to a real database file.

use std::sync::Arc;

use tempfile::TempDir;

use tally_core::engine::StageName;
use tally_core::testing::{fixtures, MockImageSource, MockLlmClient};
use tally_core::{CheckpointStore, ProcessingStatus, SqliteCheckpointStore, WorkflowEngine};

fn engine_on_disk(
    db_path: &std::path::Path,
    images: MockImageSource,
    llm: MockLlmClient,
) -> WorkflowEngine<MockLlmClient> {
    let checkpoints =
        Arc::new(SqliteCheckpointStore::new(db_path).expect("Failed to create checkpoint store"));
    WorkflowEngine::new(Arc::new(images), Arc::new(llm)).with_checkpoint_store(checkpoints)
}

fn images_with_receipt() -> MockImageSource {
    let images = MockImageSource::new();
    images.insert("receipts/r-1.jpg", b"fake jpeg bytes".to_vec());
    images
}

#[tokio::test]
async fn test_full_run_checkpoints_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tally.db");

    let llm = MockLlmClient::new();
    llm.push_response(fixtures::extraction_json());
    llm.push_response(fixtures::low_risk_fraud_json());
    let engine = engine_on_disk(&db_path, images_with_receipt(), llm);

    let state = engine
        .run("r-1", "receipts/r-1.jpg", "rep-1")
        .await
        .expect("Run failed");
    assert_eq!(state.status, ProcessingStatus::Completed);

    // A fresh store over the same file sees the whole trail.
    let reopened = SqliteCheckpointStore::new(&db_path).unwrap();
    let history = reopened.history("r-1").unwrap();
    let stages: Vec<StageName> = history.iter().map(|c| c.stage).collect();
    assert_eq!(
        stages,
        vec![
            StageName::LoadImage,
            StageName::ExtractData,
            StageName::Validate,
            StageName::FraudCheck,
            StageName::Finalize,
        ]
    );

    let latest = reopened.latest("r-1").unwrap().unwrap();
    assert_eq!(latest.seq, 4);
    assert_eq!(latest.state.status, ProcessingStatus::Completed);
    assert_eq!(latest.state.fraud_score, 12);
}

#[tokio::test]
async fn test_missing_image_lands_in_failed_state() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tally.db");

    let engine = engine_on_disk(&db_path, MockImageSource::new(), MockLlmClient::new());

    let state = engine
        .run("r-2", "receipts/nope.jpg", "rep-1")
        .await
        .expect("Run failed");
    assert_eq!(state.status, ProcessingStatus::Failed);
    // Extraction runs after the failed load and records its own error.
    assert_eq!(
        state.error_message.as_deref(),
        Some("No image data available for extraction")
    );
    let notes = state.audit_notes.join("\n");
    assert!(notes.contains("ERROR: Image file not found"));
    assert!(notes.contains("PROCESSING FAILED"));

    // The failed run still checkpointed its path through the graph.
    let reopened = SqliteCheckpointStore::new(&db_path).unwrap();
    let history = reopened.history("r-2").unwrap();
    let stages: Vec<StageName> = history.iter().map(|c| c.stage).collect();
    assert_eq!(
        stages,
        vec![StageName::LoadImage, StageName::ExtractData, StageName::Error]
    );
}

#[tokio::test]
async fn test_messy_extraction_routes_to_manual_review() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tally.db");

    let llm = MockLlmClient::new();
    llm.push_response(fixtures::unvalidatable_extraction_json());
    let engine = engine_on_disk(&db_path, images_with_receipt(), llm);

    let state = engine
        .run("r-3", "receipts/r-1.jpg", "rep-1")
        .await
        .expect("Run failed");

    assert_eq!(state.status, ProcessingStatus::NeedsReview);
    assert!(state.validation_errors.len() > 3);
    assert!(state
        .audit_notes
        .join("\n")
        .contains("MANUAL REVIEW REQUIRED"));
}

#[tokio::test]
async fn test_high_fraud_score_gets_flagged() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tally.db");

    let llm = MockLlmClient::new();
    llm.push_response(fixtures::extraction_json());
    llm.push_response(fixtures::high_risk_fraud_json());
    let engine = engine_on_disk(&db_path, images_with_receipt(), llm);

    let state = engine
        .run("r-4", "receipts/r-1.jpg", "rep-1")
        .await
        .expect("Run failed");

    assert_eq!(state.status, ProcessingStatus::FlaggedFraud);
    assert_eq!(state.fraud_score, 85);
    let notes = state.audit_notes.join("\n");
    assert!(notes.contains("FRAUD ALERT: Score 85/100"));
    assert!(notes.contains("Round number total"));
}
