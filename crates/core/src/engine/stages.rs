//! Stage functions for the receipt pipeline.
//!
//! Each stage reads the current [`RunState`] and returns a sparse
//! [`StageUpdate`]; the engine owns the fold. Business failures are encoded
//! into the state so every run still reaches a terminal stage. Extraction is
//! the one exception: its service failures escape as [`EngineError`], which
//! is what makes a run retryable from the orchestrator.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{NaiveDate, Utc};

use crate::images::{media_type_for, ImageSourceError};
use crate::llm::{prompts, CompletionRequest, LlmClient, LlmError};
use crate::metrics;

use super::graph::{EngineError, WorkflowEngine};
use super::state::{
    ExtractedReceiptData, FraudAnalysis, ProcessingStatus, RiskLevel, RunState, StageUpdate,
};

impl<C: LlmClient> WorkflowEngine<C> {
    /// Read the receipt image and stash it as base64.
    ///
    /// Load failures never abort the run; they are encoded into the state
    /// so the graph still walks to a terminal stage.
    pub(super) async fn load_image(&self, state: &RunState) -> StageUpdate {
        match self.images.load(&state.image_path).await {
            Ok(bytes) => {
                let kb = bytes.len() as f64 / 1024.0;
                let mut update = StageUpdate::new()
                    .with_status(ProcessingStatus::Extracting)
                    .with_note(format!("Image loaded successfully ({kb:.1} KB)"));
                update.image_base64 = Some(BASE64.encode(&bytes));
                update
            }
            Err(e @ ImageSourceError::NotFound(_)) => StageUpdate::new()
                .with_status(ProcessingStatus::Failed)
                .with_error(e.to_string())
                .with_note("ERROR: Image file not found"),
            Err(e) => StageUpdate::new()
                .with_status(ProcessingStatus::Failed)
                .with_error(format!("Error loading image: {e}"))
                .with_note(format!("ERROR loading image: {e}")),
        }
    }

    /// Run vision extraction over the loaded image.
    pub(super) async fn extract_data(
        &self,
        state: &RunState,
    ) -> Result<StageUpdate, EngineError> {
        let Some(image_base64) = state.image_base64.as_deref() else {
            return Ok(StageUpdate::new()
                .with_status(ProcessingStatus::Failed)
                .with_error("No image data available for extraction")
                .with_note("ERROR: Missing image data"));
        };

        let request = CompletionRequest::new(prompts::EXTRACTION_PROMPT)
            .with_image(media_type_for(&state.image_path), image_base64);

        let (data, usage) = match self
            .llm
            .complete_json::<ExtractedReceiptData>(request)
            .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                metrics::LLM_REQUESTS
                    .with_label_values(&[self.llm.provider(), "error"])
                    .inc();
                return Err(e.into());
            }
        };

        metrics::LLM_REQUESTS
            .with_label_values(&[self.llm.provider(), "success"])
            .inc();
        metrics::LLM_TOKENS
            .with_label_values(&[self.llm.provider(), "input"])
            .inc_by(usage.input_tokens as u64);
        metrics::LLM_TOKENS
            .with_label_values(&[self.llm.provider(), "output"])
            .inc_by(usage.output_tokens as u64);

        tracing::debug!(
            receipt_id = %state.receipt_id,
            merchant = ?data.merchant_name,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "extraction complete"
        );

        let merchant = data
            .merchant_name
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());
        let total = data.total_amount.unwrap_or_default();
        let currency = data.currency.clone();

        let mut update = StageUpdate::new()
            .with_status(ProcessingStatus::Validating)
            .with_note(format!("Extraction complete: {merchant}"))
            .with_note(format!("Total: {currency} {total}"));
        update.extracted_data = Some(data);
        Ok(update)
    }

    /// Apply the validation rule set to the extracted data.
    pub(super) fn validate_data(&self, state: &RunState) -> StageUpdate {
        let Some(data) = state.extracted_data.as_ref() else {
            let mut update = StageUpdate::new().with_status(ProcessingStatus::Analyzing);
            update.validation_passed = Some(false);
            update.validation_errors = vec!["No extracted data to validate".to_string()];
            return update;
        };

        let errors = validation_errors_for(data);
        metrics::VALIDATION_ERRORS_FOUND
            .with_label_values(&[])
            .observe(errors.len() as f64);

        let note = if errors.is_empty() {
            "Validation passed".to_string()
        } else {
            format!("Validation: {} issues found", errors.len())
        };

        let mut update = StageUpdate::new()
            .with_status(ProcessingStatus::Analyzing)
            .with_note(note);
        update.validation_passed = Some(errors.is_empty());
        update.validation_errors = errors;
        update
    }

    /// Score the receipt for fraud indicators.
    ///
    /// This stage never fails the run: a degraded scoring service always
    /// downgrades to a conservative medium-risk result requiring review.
    pub(super) async fn fraud_check(&self, state: &RunState) -> StageUpdate {
        let Some(data) = state.extracted_data.as_ref() else {
            let analysis = FraudAnalysis {
                score: 100,
                risk_level: RiskLevel::Critical,
                flags: vec!["No extracted data".to_string()],
                explanation: "Cannot analyze without data".to_string(),
                requires_manual_review: true,
            };
            metrics::FRAUD_SCORES
                .with_label_values(&[])
                .observe(analysis.score as f64);

            let mut update = StageUpdate::new()
                .with_status(ProcessingStatus::NeedsReview)
                .with_note("FRAUD CHECK: No data to analyze");
            update.fraud_score = Some(analysis.score);
            update.fraud_analysis = Some(analysis);
            return update;
        };

        let payload = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
        let request = CompletionRequest::new(prompts::fraud_prompt(&payload))
            .with_system(prompts::FRAUD_SYSTEM_PROMPT);

        let analysis = match self.llm.complete_json::<FraudAnalysis>(request).await {
            Ok((analysis, usage)) => {
                metrics::LLM_REQUESTS
                    .with_label_values(&[self.llm.provider(), "success"])
                    .inc();
                metrics::LLM_TOKENS
                    .with_label_values(&[self.llm.provider(), "input"])
                    .inc_by(usage.input_tokens as u64);
                metrics::LLM_TOKENS
                    .with_label_values(&[self.llm.provider(), "output"])
                    .inc_by(usage.output_tokens as u64);
                analysis
            }
            Err(LlmError::Json(e)) => {
                metrics::LLM_REQUESTS
                    .with_label_values(&[self.llm.provider(), "error"])
                    .inc();
                tracing::warn!(
                    receipt_id = %state.receipt_id,
                    error = %e,
                    "fraud response unparseable, downgrading to medium risk"
                );
                FraudAnalysis {
                    score: 50,
                    risk_level: RiskLevel::Medium,
                    flags: vec!["Could not parse AI response".to_string()],
                    explanation: "Fraud analysis inconclusive".to_string(),
                    requires_manual_review: true,
                }
            }
            Err(e) => {
                metrics::LLM_REQUESTS
                    .with_label_values(&[self.llm.provider(), "error"])
                    .inc();
                tracing::warn!(
                    receipt_id = %state.receipt_id,
                    error = %e,
                    "fraud check failed, routing to manual review"
                );
                let analysis = FraudAnalysis {
                    score: 50,
                    risk_level: RiskLevel::Medium,
                    flags: vec![format!("Analysis error: {e}")],
                    explanation: "Fraud analysis failed".to_string(),
                    requires_manual_review: true,
                };
                metrics::FRAUD_SCORES
                    .with_label_values(&[])
                    .observe(analysis.score as f64);

                let mut update = StageUpdate::new()
                    .with_status(ProcessingStatus::NeedsReview)
                    .with_note(format!("FRAUD CHECK ERROR: {e}"));
                update.fraud_score = Some(analysis.score);
                update.fraud_analysis = Some(analysis);
                return update;
            }
        };

        let score = analysis.score.clamp(0, 100);
        metrics::FRAUD_SCORES
            .with_label_values(&[])
            .observe(score as f64);

        // Advisory only. The router still decides whether a high score
        // lands in the flag_fraud terminal stage.
        let status = if score >= 70 {
            ProcessingStatus::NeedsReview
        } else {
            ProcessingStatus::Completed
        };

        let mut update = StageUpdate::new()
            .with_status(status)
            .with_note(format!("Fraud score: {score}/100"))
            .with_note(format!("Risk level: {}", analysis.risk_level));
        update.fraud_score = Some(score);
        update.fraud_analysis = Some(FraudAnalysis { score, ..analysis });
        update
    }

    /// Close out a successful run with summary audit notes.
    pub(super) fn finalize(&self, state: &RunState) -> StageUpdate {
        let now = Utc::now();
        let elapsed_ms = (now - state.started_at).num_milliseconds();

        let merchant = state
            .extracted_data
            .as_ref()
            .and_then(|d| d.merchant_name.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let currency = state
            .extracted_data
            .as_ref()
            .map(|d| d.currency.clone())
            .unwrap_or_else(|| "USD".to_string());
        let total = state
            .extracted_data
            .as_ref()
            .and_then(|d| d.total_amount)
            .unwrap_or_default();

        let mut update = StageUpdate::new()
            .with_note("PROCESSING COMPLETE")
            .with_note(format!("Merchant: {merchant}"))
            .with_note(format!("Total: {currency} {total:.2}"))
            .with_completed_at(now);
        update.elapsed_ms = Some(elapsed_ms);
        update
    }

    /// Terminal stage for high fraud scores.
    pub(super) fn flag_fraud(&self, state: &RunState) -> StageUpdate {
        let score = state.fraud_analysis.as_ref().map_or(0, |a| a.score);
        let risk = state
            .fraud_analysis
            .as_ref()
            .map_or("UNKNOWN", |a| a.risk_level.as_str());
        let flags = state
            .fraud_analysis
            .as_ref()
            .map(|a| a.flags.join(", "))
            .unwrap_or_default();

        tracing::warn!(
            receipt_id = %state.receipt_id,
            score,
            risk,
            "receipt flagged for fraud"
        );

        StageUpdate::new()
            .with_status(ProcessingStatus::FlaggedFraud)
            .with_note(format!("FRAUD ALERT: Score {score}/100"))
            .with_note(format!("Risk level: {risk}"))
            .with_note(format!("Flags: {flags}"))
            .with_completed_at(Utc::now())
    }

    /// Terminal stage when validation found too many problems.
    pub(super) fn needs_review(&self, state: &RunState) -> StageUpdate {
        let mut notes = vec![format!(
            "MANUAL REVIEW REQUIRED: {} validation errors",
            state.validation_errors.len()
        )];
        notes.extend(state.validation_errors.iter().map(|e| format!("  - {e}")));

        StageUpdate::new()
            .with_status(ProcessingStatus::NeedsReview)
            .with_notes(notes)
            .with_completed_at(Utc::now())
    }

    /// Terminal stage for failed runs.
    pub(super) fn error_handler(&self, state: &RunState) -> StageUpdate {
        let message = state
            .error_message
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string());

        StageUpdate::new()
            .with_status(ProcessingStatus::Failed)
            .with_note("PROCESSING FAILED")
            .with_note(format!("Error: {message}"))
            .with_note("Receipt flagged for manual review")
            .with_completed_at(Utc::now())
    }
}

/// The validation rule set, applied in a fixed order. Every violation is
/// appended; no rule short-circuits. Empty strings and zero amounts count
/// as absent, matching how extraction reports unknowns.
pub(crate) fn validation_errors_for(data: &ExtractedReceiptData) -> Vec<String> {
    let mut errors = Vec::new();

    let merchant_missing = data.merchant_name.as_deref().is_none_or(str::is_empty);
    if merchant_missing {
        errors.push("Missing merchant name".to_string());
    }

    let total_missing = data.total_amount.is_none_or(|t| t == 0.0);
    if total_missing {
        errors.push("Missing total amount".to_string());
    }

    let date = data.transaction_date.as_deref().filter(|d| !d.is_empty());
    if date.is_none() {
        errors.push("Missing transaction date".to_string());
    }

    if let Some(total) = data.total_amount {
        if total < 0.0 {
            errors.push("Total amount cannot be negative".to_string());
        }
    }

    if !data.items.is_empty() {
        if let Some(subtotal) = data.subtotal.filter(|s| *s != 0.0) {
            let calculated: f64 = data.items.iter().map(|i| i.total_price).sum();
            if (calculated - subtotal).abs() > 0.01 {
                errors.push(format!(
                    "Items total ({calculated:.2}) doesn't match subtotal ({subtotal:.2})"
                ));
            }
        }
    }

    if let Some(date) = date {
        match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            Ok(parsed) => {
                if parsed > Utc::now().date_naive() {
                    errors.push("Transaction date is in the future".to_string());
                }
            }
            Err(_) => errors.push("Invalid date format".to_string()),
        }
    }

    if data.confidence_score < 0.5 {
        errors.push("Low extraction confidence".to_string());
    }

    errors
}
