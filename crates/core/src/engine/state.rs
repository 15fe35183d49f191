//! Run state threaded through the receipt processing pipeline.
//!
//! One [`RunState`] exists per receipt per execution. Stages never mutate it
//! directly: each stage returns a sparse [`StageUpdate`] which the engine
//! folds in via [`RunState::apply`]. Log-like fields (`audit_notes`,
//! `validation_errors`) append-combine; everything else is last-write-wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Processing status
// =============================================================================

/// Where a run currently is in the pipeline.
///
/// Statuses only move forward: `pending → loading → extracting → validating
/// → analyzing` and then into one of the four terminal statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Loading,
    Extracting,
    Validating,
    Analyzing,
    Completed,
    FlaggedFraud,
    NeedsReview,
    Failed,
}

impl ProcessingStatus {
    /// Stable string form, matches the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Loading => "loading",
            ProcessingStatus::Extracting => "extracting",
            ProcessingStatus::Validating => "validating",
            ProcessingStatus::Analyzing => "analyzing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::FlaggedFraud => "flagged_fraud",
            ProcessingStatus::NeedsReview => "needs_review",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// True once no further stage will execute.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed
                | ProcessingStatus::FlaggedFraud
                | ProcessingStatus::NeedsReview
                | ProcessingStatus::Failed
        )
    }

    /// True for terminal statuses that must flag the parent expense report.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::FlaggedFraud | ProcessingStatus::NeedsReview
        )
    }

    /// Position in the forward-only pipeline ordering. All terminal
    /// statuses share the final rank.
    fn rank(&self) -> u8 {
        match self {
            ProcessingStatus::Pending => 0,
            ProcessingStatus::Loading => 1,
            ProcessingStatus::Extracting => 2,
            ProcessingStatus::Validating => 3,
            ProcessingStatus::Analyzing => 4,
            _ => 5,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Extracted receipt data
// =============================================================================

/// A single line item on a receipt.
///
/// Serde defaults keep partial LLM output deserializable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub total_price: f64,
}

/// Structured data extracted from a receipt image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReceiptData {
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub merchant_address: Option<String>,
    /// ISO-like date string as returned by extraction, e.g. "2026-03-15".
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub tax_amount: Option<f64>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Extraction self-assessment in [0, 1]. Absent in the payload counts
    /// as zero, so validation flags the extraction as low confidence.
    #[serde(default)]
    pub confidence_score: f64,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for ExtractedReceiptData {
    fn default() -> Self {
        Self {
            merchant_name: None,
            merchant_address: None,
            transaction_date: None,
            transaction_time: None,
            items: Vec::new(),
            subtotal: None,
            tax_amount: None,
            total_amount: None,
            payment_method: None,
            currency: default_currency(),
            confidence_score: 0.0,
        }
    }
}

// =============================================================================
// Fraud analysis
// =============================================================================

/// Risk classification returned by the fraud scoring service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the fraud check, either from the scoring service or
/// synthesized by a defensive fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAnalysis {
    pub score: i64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub requires_manual_review: bool,
}

// =============================================================================
// Run state
// =============================================================================

/// The complete state for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    // Identity, set once at creation.
    pub receipt_id: String,
    pub image_path: String,
    pub report_id: String,

    // Pipeline data.
    pub image_base64: Option<String>,
    pub extracted_data: Option<ExtractedReceiptData>,
    pub validation_passed: Option<bool>,
    pub validation_errors: Vec<String>,

    // Fraud detection.
    pub fraud_analysis: Option<FraudAnalysis>,
    pub fraud_score: i64,

    // Outcome.
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub audit_notes: Vec<String>,

    // Timing.
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<i64>,
}

impl RunState {
    /// Initial state for a fresh run: `pending`, empty logs, score 0.
    pub fn new(
        receipt_id: impl Into<String>,
        image_path: impl Into<String>,
        report_id: impl Into<String>,
    ) -> Self {
        Self {
            receipt_id: receipt_id.into(),
            image_path: image_path.into(),
            report_id: report_id.into(),
            image_base64: None,
            extracted_data: None,
            validation_passed: None,
            validation_errors: Vec::new(),
            fraud_analysis: None,
            fraud_score: 0,
            status: ProcessingStatus::Pending,
            error_message: None,
            audit_notes: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            elapsed_ms: None,
        }
    }

    /// Fold a stage's partial update into this state.
    ///
    /// `audit_notes` and `validation_errors` append-combine (new entries
    /// after existing, order preserved); every other populated field
    /// overwrites. Fields the stage left unset are untouched.
    pub fn apply(&mut self, update: StageUpdate) {
        if let Some(image_base64) = update.image_base64 {
            self.image_base64 = Some(image_base64);
        }
        if let Some(extracted) = update.extracted_data {
            self.extracted_data = Some(extracted);
        }
        if let Some(passed) = update.validation_passed {
            self.validation_passed = Some(passed);
        }
        self.validation_errors.extend(update.validation_errors);
        if let Some(analysis) = update.fraud_analysis {
            self.fraud_analysis = Some(analysis);
        }
        if let Some(score) = update.fraud_score {
            self.fraud_score = score;
        }
        if let Some(status) = update.status {
            if status.rank() < self.status.rank() {
                tracing::warn!(
                    receipt_id = %self.receipt_id,
                    from = %self.status,
                    to = %status,
                    "status moved backwards, stage update is suspect"
                );
            }
            self.status = status;
        }
        if let Some(error_message) = update.error_message {
            self.error_message = Some(error_message);
        }
        self.audit_notes.extend(update.audit_notes);
        if let Some(completed_at) = update.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(elapsed_ms) = update.elapsed_ms {
            self.elapsed_ms = Some(elapsed_ms);
        }
    }
}

// =============================================================================
// Stage update
// =============================================================================

/// Sparse partial update returned by a stage.
///
/// `audit_notes` and `validation_errors` carry only the NEW entries this
/// stage produced, never restated history.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub image_base64: Option<String>,
    pub extracted_data: Option<ExtractedReceiptData>,
    pub validation_passed: Option<bool>,
    pub validation_errors: Vec<String>,
    pub fraud_analysis: Option<FraudAnalysis>,
    pub fraud_score: Option<i64>,
    pub status: Option<ProcessingStatus>,
    pub error_message: Option<String>,
    pub audit_notes: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<i64>,
}

impl StageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.audit_notes.push(note.into());
        self
    }

    pub fn with_notes(mut self, notes: impl IntoIterator<Item = String>) -> Self {
        self.audit_notes.extend(notes);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new("receipt-1", "/tmp/receipt-1.jpg", "report-1")
    }

    #[test]
    fn test_initial_state_defaults() {
        let s = state();
        assert_eq!(s.status, ProcessingStatus::Pending);
        assert_eq!(s.fraud_score, 0);
        assert!(s.audit_notes.is_empty());
        assert!(s.validation_errors.is_empty());
        assert!(s.extracted_data.is_none());
        assert!(s.completed_at.is_none());
    }

    #[test]
    fn test_apply_appends_audit_notes_in_order() {
        let mut s = state();
        s.apply(StageUpdate::new().with_note("first"));
        s.apply(StageUpdate::new().with_note("second").with_note("third"));
        assert_eq!(s.audit_notes, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_apply_appends_validation_errors_after_existing() {
        let mut s = state();
        let mut update = StageUpdate::new();
        update.validation_errors = vec!["a".to_string(), "b".to_string()];
        s.apply(update);

        let mut update = StageUpdate::new();
        update.validation_errors = vec!["c".to_string()];
        s.apply(update);

        assert_eq!(s.validation_errors, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_apply_overwrites_scalar_fields() {
        let mut s = state();
        let mut update = StageUpdate::new().with_status(ProcessingStatus::Loading);
        update.fraud_score = Some(42);
        s.apply(update);
        assert_eq!(s.status, ProcessingStatus::Loading);
        assert_eq!(s.fraud_score, 42);

        let mut update = StageUpdate::new();
        update.fraud_score = Some(80);
        s.apply(update);
        assert_eq!(s.fraud_score, 80);
    }

    #[test]
    fn test_apply_leaves_unset_fields_untouched() {
        let mut s = state();
        let mut update = StageUpdate::new();
        update.validation_passed = Some(true);
        s.apply(update);

        s.apply(StageUpdate::new().with_note("only a note"));
        assert_eq!(s.validation_passed, Some(true));
        assert_eq!(s.status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_logs_never_shrink_across_updates() {
        let mut s = state();
        for i in 0..5 {
            let before_notes = s.audit_notes.len();
            let before_errors = s.validation_errors.len();
            let mut update = StageUpdate::new().with_note(format!("note {i}"));
            if i % 2 == 0 {
                update.validation_errors.push(format!("error {i}"));
            }
            s.apply(update);
            assert!(s.audit_notes.len() >= before_notes);
            assert!(s.validation_errors.len() >= before_errors);
        }
        assert_eq!(s.audit_notes.len(), 5);
        assert_eq!(s.validation_errors.len(), 3);
    }

    #[test]
    fn test_status_serialization_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProcessingStatus::FlaggedFraud).unwrap(),
            "\"flagged_fraud\""
        );
        assert_eq!(
            serde_json::from_str::<ProcessingStatus>("\"needs_review\"").unwrap(),
            ProcessingStatus::NeedsReview
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::FlaggedFraud.is_terminal());
        assert!(ProcessingStatus::NeedsReview.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Pending.is_terminal());
        assert!(!ProcessingStatus::Analyzing.is_terminal());
    }

    #[test]
    fn test_needs_attention_only_for_flagged_and_review() {
        assert!(ProcessingStatus::FlaggedFraud.needs_attention());
        assert!(ProcessingStatus::NeedsReview.needs_attention());
        assert!(!ProcessingStatus::Completed.needs_attention());
        assert!(!ProcessingStatus::Failed.needs_attention());
    }

    #[test]
    fn test_risk_level_screaming_case() {
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            "\"CRITICAL\""
        );
        assert_eq!(
            serde_json::from_str::<RiskLevel>("\"MEDIUM\"").unwrap(),
            RiskLevel::Medium
        );
    }

    #[test]
    fn test_extracted_data_deserializes_with_missing_fields() {
        let data: ExtractedReceiptData =
            serde_json::from_str(r#"{"merchant_name": "Corner Deli"}"#).unwrap();
        assert_eq!(data.merchant_name.as_deref(), Some("Corner Deli"));
        assert_eq!(data.currency, "USD");
        assert_eq!(data.confidence_score, 0.0);
        assert!(data.items.is_empty());
    }

    #[test]
    fn test_receipt_item_defaults() {
        let item: ReceiptItem = serde_json::from_str(r#"{"name": "Latte"}"#).unwrap();
        assert_eq!(item.name, "Latte");
        assert_eq!(item.quantity, 0);
        assert_eq!(item.total_price, 0.0);
    }

    #[test]
    fn test_run_state_round_trips_through_json() {
        let mut s = state();
        s.apply(
            StageUpdate::new()
                .with_status(ProcessingStatus::Analyzing)
                .with_note("checkpointed"),
        );
        let json = serde_json::to_string(&s).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.receipt_id, "receipt-1");
        assert_eq!(back.status, ProcessingStatus::Analyzing);
        assert_eq!(back.audit_notes, vec!["checkpointed"]);
    }
}
