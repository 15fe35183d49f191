//! Receipt orchestrator: retries, timeouts, result persistence.
//!
//! The workflow engine knows nothing about the database. The orchestrator
//! sits above it: it loads receipt rows, runs the engine under retry and
//! timeout policies, writes results back to the receipt and report stores,
//! and periodically rescans recent low-score receipts.

mod config;
mod runner;
mod types;

pub use config::{OrchestratorConfig, RetryConfig, SweepConfig};
pub use runner::{parse_receipt_date, ReceiptOrchestrator, RunHandle};
pub use types::{
    BatchItem, BatchReport, OrchestratorError, OrchestratorStatus, RunOutcome, RunProgress,
    RunReport, SweepOutcome,
};
