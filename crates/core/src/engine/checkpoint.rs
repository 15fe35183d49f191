//! Checkpointing of run state after every stage, keyed by receipt id.
//!
//! Checkpoints exist for inspection and replay of a run's history, never
//! for concurrent re-entry. A retried run restarts from `pending` and
//! appends a fresh sequence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;

use super::router::StageName;
use super::state::RunState;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A snapshot of run state taken after one stage completed.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub receipt_id: String,
    /// Position within one execution, starting at 0.
    pub seq: u32,
    /// The stage whose output this snapshot reflects.
    pub stage: StageName,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
}

/// Trait for checkpoint storage.
pub trait CheckpointStore: Send + Sync {
    /// Persist one checkpoint.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// All checkpoints for a receipt, in insertion order.
    fn history(&self, receipt_id: &str) -> Result<Vec<Checkpoint>, CheckpointError>;

    /// The most recent checkpoint for a receipt, if any.
    fn latest(&self, receipt_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory checkpoint store, the default for tests and single-process use.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut runs = self.runs.lock().unwrap();
        runs.entry(checkpoint.receipt_id.clone())
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }

    fn history(&self, receipt_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(receipt_id).cloned().unwrap_or_default())
    }

    fn latest(&self, receipt_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(receipt_id).and_then(|v| v.last().cloned()))
    }
}

// =============================================================================
// SQLite implementation
// =============================================================================

/// SQLite-backed checkpoint store.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open or create the database file and ensure the schema exists.
    pub fn new(path: &Path) -> Result<Self, CheckpointError> {
        let conn =
            Connection::open(path).map_err(|e| CheckpointError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory checkpoint store (useful for testing).
    pub fn in_memory() -> Result<Self, CheckpointError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CheckpointError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CheckpointError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS run_checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                receipt_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                stage TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_run_checkpoints_receipt_id ON run_checkpoints(receipt_id);
            "#,
        )
        .map_err(|e| CheckpointError::Database(e.to_string()))
    }

    fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> Result<Checkpoint, CheckpointError> {
        let receipt_id: String = row
            .get(0)
            .map_err(|e| CheckpointError::Database(e.to_string()))?;
        let seq: u32 = row
            .get(1)
            .map_err(|e| CheckpointError::Database(e.to_string()))?;
        let stage_str: String = row
            .get(2)
            .map_err(|e| CheckpointError::Database(e.to_string()))?;
        let state_json: String = row
            .get(3)
            .map_err(|e| CheckpointError::Database(e.to_string()))?;
        let created_at_str: String = row
            .get(4)
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        let stage = StageName::parse(&stage_str).ok_or_else(|| {
            CheckpointError::Serialization(format!("unknown stage: {stage_str}"))
        })?;
        let state: RunState = serde_json::from_str(&state_json)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Checkpoint {
            receipt_id,
            seq,
            stage,
            state,
            created_at,
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let conn = self.conn.lock().unwrap();

        let state_json = serde_json::to_string(&checkpoint.state)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO run_checkpoints (receipt_id, seq, stage, state, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                checkpoint.receipt_id,
                checkpoint.seq,
                checkpoint.stage.as_str(),
                state_json,
                checkpoint.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CheckpointError::Database(e.to_string()))?;

        Ok(())
    }

    fn history(&self, receipt_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT receipt_id, seq, stage, state, created_at FROM run_checkpoints WHERE receipt_id = ? ORDER BY id ASC",
            )
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![receipt_id], |row| {
                Ok(Self::row_to_checkpoint(row))
            })
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(row.map_err(|e| CheckpointError::Database(e.to_string()))??);
        }
        Ok(checkpoints)
    }

    fn latest(&self, receipt_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT receipt_id, seq, stage, state, created_at FROM run_checkpoints WHERE receipt_id = ? ORDER BY id DESC LIMIT 1",
            )
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        let mut rows = stmt
            .query_map(params![receipt_id], |row| {
                Ok(Self::row_to_checkpoint(row))
            })
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        match rows.next() {
            Some(row) => Ok(Some(
                row.map_err(|e| CheckpointError::Database(e.to_string()))??,
            )),
            None => Ok(None),
        }
    }
}
