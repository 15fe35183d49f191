//! Core library for tally, the receipt processing service.
//!
//! The crate is organized around a small workflow engine:
//!
//! - [`engine`]: the stage graph that takes a receipt image through
//!   extraction, validation, fraud analysis, and finalization.
//! - [`orchestrator`]: retries, timeouts, and persistence around the engine.
//! - [`store`]: SQLite-backed receipt and expense report records.
//! - [`llm`]: Groq and Ollama clients used for extraction and fraud scoring.
//! - [`images`]: receipt image loading.
//! - [`audit`]: append-only audit trail of processing events.
//! - [`config`]: TOML + environment configuration.
//! - [`metrics`]: Prometheus metrics shared across the crate.

pub mod audit;
pub mod config;
pub mod engine;
pub mod images;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod testing;

pub use audit::{create_audit_system, AuditEvent, AuditHandle, AuditStore, SqliteAuditStore};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use engine::{CheckpointStore, ProcessingStatus, SqliteCheckpointStore, WorkflowEngine};
pub use images::{FsImageSource, ImageSource};
pub use llm::{GroqClient, LlmClient, OllamaClient};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorStatus, ReceiptOrchestrator, RunHandle, RunReport,
    SweepOutcome,
};
pub use store::{
    ExpenseReportRecord, ReceiptRecord, ReceiptStore, ReportStatus, ReportStore,
    SqliteReceiptStore, SqliteReportStore,
};
