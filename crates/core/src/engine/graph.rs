//! The receipt processing graph.
//!
//! Composes stage functions and routers into one ordered walk from
//! `pending` to a terminal stage. After every stage the partial update is
//! folded into the run state and the result is checkpointed, so mid-run
//! state stays inspectable.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::images::ImageSource;
use crate::llm::{LlmClient, LlmError};
use crate::metrics;

use super::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, MemoryCheckpointStore};
use super::router::{next_stage, StageName};
use super::state::{ProcessingStatus, RunState, StageUpdate};

/// Errors that abort a run.
///
/// Business failures never show up here, they are folded into the run
/// state instead. These are the infrastructure failures the orchestrator
/// is allowed to retry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The extraction service call failed.
    #[error("Extraction service error: {0}")]
    Llm(#[from] LlmError),

    /// Persisting a checkpoint failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The soft execution deadline passed between stages.
    #[error("Soft time limit exceeded")]
    DeadlineExceeded,
}

/// Drives one receipt through the processing graph.
///
/// Generic over the LLM client type to support different backends
/// (Groq, Ollama, etc.).
pub struct WorkflowEngine<C: LlmClient> {
    pub(super) images: Arc<dyn ImageSource>,
    pub(super) llm: Arc<C>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl<C: LlmClient> WorkflowEngine<C> {
    /// Create an engine with an in-memory checkpoint store.
    pub fn new(images: Arc<dyn ImageSource>, llm: Arc<C>) -> Self {
        Self {
            images,
            llm,
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
        }
    }

    /// Swap in a durable checkpoint store.
    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Run one receipt through the full graph.
    pub async fn run(
        &self,
        receipt_id: &str,
        image_path: &str,
        report_id: &str,
    ) -> Result<RunState, EngineError> {
        self.run_with_deadline(receipt_id, image_path, report_id, None)
            .await
    }

    /// Run with a soft deadline checked between stages.
    ///
    /// When the deadline passes, the stage in flight is allowed to finish
    /// and its result is checkpointed, then the run aborts with
    /// [`EngineError::DeadlineExceeded`] before the next stage starts.
    pub async fn run_with_deadline(
        &self,
        receipt_id: &str,
        image_path: &str,
        report_id: &str,
        soft_deadline: Option<Instant>,
    ) -> Result<RunState, EngineError> {
        let run_timer = Instant::now();
        metrics::RUNS_STARTED.inc();
        tracing::info!(receipt_id, image_path, "starting receipt run");

        let mut state = RunState::new(receipt_id, image_path, report_id);
        state.status = ProcessingStatus::Loading;

        let mut stage = StageName::LoadImage;
        let mut seq = 0u32;

        loop {
            let update = self.execute_stage(stage, &state).await?;
            state.apply(update);
            metrics::STAGE_EXECUTIONS
                .with_label_values(&[stage.as_str()])
                .inc();

            self.checkpoints.save(&Checkpoint {
                receipt_id: state.receipt_id.clone(),
                seq,
                stage,
                state: state.clone(),
                created_at: chrono::Utc::now(),
            })?;
            seq += 1;

            match next_stage(stage, &state) {
                Some(next) => {
                    if let Some(deadline) = soft_deadline {
                        if Instant::now() >= deadline {
                            metrics::TASK_TIMEOUTS.with_label_values(&["soft"]).inc();
                            tracing::warn!(receipt_id, stage = %stage, "soft deadline hit mid-run");
                            return Err(EngineError::DeadlineExceeded);
                        }
                    }
                    stage = next;
                }
                None => break,
            }
        }

        metrics::RUNS_COMPLETED
            .with_label_values(&[state.status.as_str()])
            .inc();
        metrics::RUN_DURATION
            .with_label_values(&[state.status.as_str()])
            .observe(run_timer.elapsed().as_secs_f64());
        tracing::info!(
            receipt_id,
            status = %state.status,
            fraud_score = state.fraud_score,
            audit_entries = state.audit_notes.len(),
            "receipt run finished"
        );
        Ok(state)
    }

    async fn execute_stage(
        &self,
        stage: StageName,
        state: &RunState,
    ) -> Result<StageUpdate, EngineError> {
        match stage {
            StageName::LoadImage => Ok(self.load_image(state).await),
            StageName::ExtractData => self.extract_data(state).await,
            StageName::Validate => Ok(self.validate_data(state)),
            StageName::FraudCheck => Ok(self.fraud_check(state).await),
            StageName::Finalize => Ok(self.finalize(state)),
            StageName::FlagFraud => Ok(self.flag_fraud(state)),
            StageName::NeedsReview => Ok(self.needs_review(state)),
            StageName::Error => Ok(self.error_handler(state)),
        }
    }
}

/// Edges of the stage graph, used only for the diagram export.
const EDGES: &[(&str, &str)] = &[
    ("START", "load_image"),
    ("load_image", "extract_data"),
    ("extract_data", "validate"),
    ("extract_data", "error"),
    ("validate", "fraud_check"),
    ("validate", "needs_review"),
    ("fraud_check", "finalize"),
    ("fraud_check", "flag_fraud"),
    ("finalize", "END"),
    ("flag_fraud", "END"),
    ("needs_review", "END"),
    ("error", "END"),
];

/// Mermaid rendering of the stage graph, for operational tooling.
pub fn mermaid_diagram() -> String {
    let mut out = String::from("graph TD\n");
    for (from, to) in EDGES {
        out.push_str(&format!("    {from} --> {to}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockImageSource, MockLlmClient};

    fn engine_with(
        images: MockImageSource,
        llm: MockLlmClient,
    ) -> WorkflowEngine<MockLlmClient> {
        WorkflowEngine::new(Arc::new(images), Arc::new(llm))
    }

    fn images_with_receipt() -> MockImageSource {
        let images = MockImageSource::new();
        images.insert("receipts/r-1.jpg", b"fake jpeg bytes".to_vec());
        images
    }

    #[tokio::test]
    async fn test_clean_receipt_completes() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::extraction_json());
        llm.push_response(fixtures::low_risk_fraud_json());
        let engine = engine_with(images_with_receipt(), llm);

        let state = engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap();

        assert_eq!(state.status, ProcessingStatus::Completed);
        assert_eq!(state.validation_passed, Some(true));
        assert_eq!(state.fraud_score, 12);
        assert!(state.completed_at.is_some());
        assert!(state.elapsed_ms.is_some());

        let notes = state.audit_notes.join("\n");
        assert!(notes.contains("Image loaded successfully"));
        assert!(notes.contains("Extraction complete: Fresh Mart"));
        assert!(notes.contains("Validation passed"));
        assert!(notes.contains("Fraud score: 12/100"));
        assert!(notes.contains("Risk level: LOW"));
        assert!(notes.contains("PROCESSING COMPLETE"));
        assert!(notes.contains("Merchant: Fresh Mart"));
    }

    #[tokio::test]
    async fn test_checkpoints_cover_every_stage() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::extraction_json());
        llm.push_response(fixtures::low_risk_fraud_json());
        let engine = engine_with(images_with_receipt(), llm);

        engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap();

        let history = engine.checkpoints().history("r-1").unwrap();
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
        for (i, checkpoint) in history.iter().enumerate() {
            assert_eq!(checkpoint.seq, i as u32);
        }

        let latest = engine.checkpoints().latest("r-1").unwrap().unwrap();
        assert_eq!(latest.state.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_audit_trail_never_shrinks_across_checkpoints() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::extraction_json());
        llm.push_response(fixtures::high_risk_fraud_json());
        let engine = engine_with(images_with_receipt(), llm);

        engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap();

        let history = engine.checkpoints().history("r-1").unwrap();
        let mut previous_notes = 0;
        let mut previous_errors = 0;
        for checkpoint in &history {
            assert!(checkpoint.state.audit_notes.len() >= previous_notes);
            assert!(checkpoint.state.validation_errors.len() >= previous_errors);
            previous_notes = checkpoint.state.audit_notes.len();
            previous_errors = checkpoint.state.validation_errors.len();
        }
    }

    #[tokio::test]
    async fn test_high_fraud_score_gets_flagged() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::extraction_json());
        llm.push_response(fixtures::high_risk_fraud_json());
        let engine = engine_with(images_with_receipt(), llm);

        let state = engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap();

        assert_eq!(state.status, ProcessingStatus::FlaggedFraud);
        assert_eq!(state.fraud_score, 85);
        assert!(state.completed_at.is_some());

        let notes = state.audit_notes.join("\n");
        assert!(notes.contains("FRAUD ALERT: Score 85/100"));
        assert!(notes.contains("Risk level: HIGH"));
        assert!(notes.contains("Flags: Round number total, Missing tax line"));
    }

    #[tokio::test]
    async fn test_missing_image_fails_without_extracted_data() {
        let engine = engine_with(MockImageSource::new(), MockLlmClient::new());

        let state = engine
            .run("r-404", "receipts/gone.jpg", "rep-1")
            .await
            .unwrap();

        assert_eq!(state.status, ProcessingStatus::Failed);
        assert!(state.extracted_data.is_none());
        assert_eq!(state.audit_notes[0], "ERROR: Image file not found");

        let notes = state.audit_notes.join("\n");
        assert!(notes.contains("not found"));
        assert!(notes.contains("PROCESSING FAILED"));
        assert!(notes.contains("Receipt flagged for manual review"));

        // load, extract (missing data), error handler
        let history = engine.checkpoints().history("r-404").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].stage, StageName::Error);
    }

    #[tokio::test]
    async fn test_too_many_validation_errors_skip_fraud_check() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::unvalidatable_extraction_json());
        let engine = engine_with(images_with_receipt(), llm);

        let state = engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap();

        assert_eq!(state.status, ProcessingStatus::NeedsReview);
        assert_eq!(state.validation_errors.len(), 4);
        assert!(state.fraud_analysis.is_none());
        assert_eq!(engine.llm.request_count(), 1);

        let notes = state.audit_notes.join("\n");
        assert!(notes.contains("MANUAL REVIEW REQUIRED: 4 validation errors"));
        assert!(notes.contains("  - Missing merchant name"));
    }

    #[tokio::test]
    async fn test_fraud_service_outage_lands_in_manual_review() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::extraction_json());
        llm.push_error(LlmError::Http("connection refused".to_string()));
        let engine = engine_with(images_with_receipt(), llm);

        let state = engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap();

        assert_eq!(state.status, ProcessingStatus::NeedsReview);
        assert_eq!(state.fraud_score, 50);
        let analysis = state.fraud_analysis.unwrap();
        assert!(analysis.requires_manual_review);
        assert_eq!(analysis.flags.len(), 1);
        assert!(analysis.flags[0].starts_with("Analysis error:"));

        let notes = state.audit_notes.join("\n");
        assert!(notes.contains("FRAUD CHECK ERROR:"));
    }

    #[tokio::test]
    async fn test_unparseable_fraud_response_completes_at_medium_risk() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::extraction_json());
        llm.push_response("I am not JSON, sorry.");
        let engine = engine_with(images_with_receipt(), llm);

        let state = engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap();

        assert_eq!(state.status, ProcessingStatus::Completed);
        assert_eq!(state.fraud_score, 50);
        let analysis = state.fraud_analysis.unwrap();
        assert_eq!(analysis.flags, vec!["Could not parse AI response"]);
        assert!(analysis.requires_manual_review);

        let notes = state.audit_notes.join("\n");
        assert!(notes.contains("Fraud score: 50/100"));
        assert!(notes.contains("Risk level: MEDIUM"));
    }

    #[tokio::test]
    async fn test_extraction_outage_propagates_for_retry() {
        let llm = MockLlmClient::new();
        llm.push_error(LlmError::Http("503 from upstream".to_string()));
        let engine = engine_with(images_with_receipt(), llm);

        let err = engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Llm(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_fraud_score_is_clamped() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::extraction_json());
        llm.push_response(
            r#"{"score": 140, "risk_level": "CRITICAL", "flags": [], "explanation": "", "requires_manual_review": true}"#,
        );
        let engine = engine_with(images_with_receipt(), llm);

        let state = engine
            .run("r-1", "receipts/r-1.jpg", "rep-1")
            .await
            .unwrap();

        assert_eq!(state.fraud_score, 100);
        assert_eq!(state.status, ProcessingStatus::FlaggedFraud);
        assert_eq!(state.fraud_analysis.unwrap().score, 100);
    }

    #[tokio::test]
    async fn test_expired_soft_deadline_aborts_between_stages() {
        let llm = MockLlmClient::new();
        llm.push_response(fixtures::extraction_json());
        llm.push_response(fixtures::low_risk_fraud_json());
        let engine = engine_with(images_with_receipt(), llm);

        let err = engine
            .run_with_deadline("r-1", "receipts/r-1.jpg", "rep-1", Some(Instant::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded));

        // The stage in flight still got checkpointed before the abort.
        assert_eq!(engine.checkpoints().history("r-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_validate_without_data_records_single_error() {
        let engine = engine_with(MockImageSource::new(), MockLlmClient::new());
        let state = RunState::new("r-1", "receipts/r-1.jpg", "rep-1");

        let update = engine.validate_data(&state);
        assert_eq!(update.status, Some(ProcessingStatus::Analyzing));
        assert_eq!(update.validation_passed, Some(false));
        assert_eq!(update.validation_errors, vec!["No extracted data to validate"]);
        assert!(update.audit_notes.is_empty());
    }

    #[tokio::test]
    async fn test_fraud_check_without_data_synthesizes_critical() {
        let engine = engine_with(MockImageSource::new(), MockLlmClient::new());
        let state = RunState::new("r-1", "receipts/r-1.jpg", "rep-1");

        let update = engine.fraud_check(&state).await;
        assert_eq!(update.status, Some(ProcessingStatus::NeedsReview));
        assert_eq!(update.fraud_score, Some(100));
        let analysis = update.fraud_analysis.unwrap();
        assert_eq!(analysis.flags, vec!["No extracted data"]);
        assert!(analysis.requires_manual_review);
        assert_eq!(update.audit_notes, vec!["FRAUD CHECK: No data to analyze"]);
    }

    #[test]
    fn test_mermaid_diagram_lists_every_edge() {
        let diagram = mermaid_diagram();
        assert!(diagram.starts_with("graph TD"));
        for (from, to) in EDGES {
            assert!(diagram.contains(&format!("{from} --> {to}")));
        }
        assert_eq!(diagram.lines().count(), 1 + EDGES.len());
    }
}
