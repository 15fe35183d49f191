//! Persistent records for expense reports and receipts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::ReceiptItem;

/// Lifecycle of an expense report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Approved,
    Rejected,
    Flagged,
}

impl ReportStatus {
    /// Stable string form, matches the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "PENDING",
            ReportStatus::Approved => "APPROVED",
            ReportStatus::Rejected => "REJECTED",
            ReportStatus::Flagged => "FLAGGED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ReportStatus::Pending),
            "APPROVED" => Some(ReportStatus::Approved),
            "REJECTED" => Some(ReportStatus::Rejected),
            "FLAGGED" => Some(ReportStatus::Flagged),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An expense report, the parent of one or more receipts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseReportRecord {
    pub id: String,
    pub status: ReportStatus,
    /// Sum of child receipt totals, recomputed after each run.
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
}

impl ExpenseReportRecord {
    /// A fresh report: pending, zero total.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ReportStatus::Pending,
            total_amount: 0.0,
            created_at: Utc::now(),
        }
    }
}

/// A stored receipt with whatever the pipeline has extracted so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub id: String,
    pub report_id: String,
    /// Path of the uploaded image, resolved by the image source.
    pub image_path: String,
    pub merchant_name: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub scanned_items: Vec<ReceiptItem>,
    pub fraud_score: i64,
    /// Newline-joined audit trail from the most recent run.
    pub audit_notes: String,
    pub created_at: DateTime<Utc>,
}

impl ReceiptRecord {
    /// A freshly uploaded receipt: nothing extracted, score 0.
    pub fn new(
        id: impl Into<String>,
        report_id: impl Into<String>,
        image_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            report_id: report_id.into(),
            image_path: image_path.into(),
            merchant_name: None,
            transaction_date: None,
            total_amount: None,
            tax_amount: None,
            scanned_items: Vec::new(),
            fraud_score: 0,
            audit_notes: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Extraction-derived columns written back after a run.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    pub merchant_name: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub scanned_items: Vec<ReceiptItem>,
}

/// Everything the orchestrator persists after a run.
///
/// `extraction` is `None` when the run produced no extracted data; in that
/// case the extraction columns keep their previous values and only the
/// score and audit trail are rewritten.
#[derive(Debug, Clone)]
pub struct ReceiptResults {
    pub extraction: Option<ExtractedFields>,
    pub fraud_score: i64,
    pub audit_notes: String,
}
