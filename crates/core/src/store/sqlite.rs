//! SQLite-backed receipt and report storage.
//!
//! Each store opens its own connection; pointing both at the same
//! database file gives one shared datastore per deployment.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};

use super::receipt::{ReceiptStore, ReportStore, StoreError};
use super::types::{ExpenseReportRecord, ReceiptRecord, ReceiptResults, ReportStatus};

/// SQLite-backed receipt store
pub struct SqliteReceiptStore {
    conn: Mutex<Connection>,
}

impl SqliteReceiptStore {
    /// Open or create the database file and ensure the receipts table exists.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory receipt store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS receipts (
                id TEXT PRIMARY KEY,
                report_id TEXT NOT NULL,
                image_path TEXT NOT NULL,
                merchant_name TEXT,
                transaction_date TEXT,
                total_amount REAL,
                tax_amount REAL,
                scanned_items TEXT NOT NULL DEFAULT '[]',
                fraud_score INTEGER NOT NULL DEFAULT 0,
                audit_notes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_receipts_report_id ON receipts(report_id);
            CREATE INDEX IF NOT EXISTS idx_receipts_created_at ON receipts(created_at);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn row_to_receipt(row: &rusqlite::Row<'_>) -> Result<ReceiptRecord, StoreError> {
        let map_db = |e: rusqlite::Error| StoreError::Database(e.to_string());

        let transaction_date: Option<String> = row.get(4).map_err(map_db)?;
        let scanned_items_json: String = row.get(7).map_err(map_db)?;
        let created_at_str: String = row.get(10).map_err(map_db)?;

        Ok(ReceiptRecord {
            id: row.get(0).map_err(map_db)?,
            report_id: row.get(1).map_err(map_db)?,
            image_path: row.get(2).map_err(map_db)?,
            merchant_name: row.get(3).map_err(map_db)?,
            transaction_date: transaction_date
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            total_amount: row.get(5).map_err(map_db)?,
            tax_amount: row.get(6).map_err(map_db)?,
            scanned_items: serde_json::from_str(&scanned_items_json)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            fraud_score: row.get(8).map_err(map_db)?,
            audit_notes: row.get(9).map_err(map_db)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

const RECEIPT_COLUMNS: &str = "id, report_id, image_path, merchant_name, transaction_date, \
     total_amount, tax_amount, scanned_items, fraud_score, audit_notes, created_at";

impl ReceiptStore for SqliteReceiptStore {
    fn create(&self, receipt: &ReceiptRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let scanned_items = serde_json::to_string(&receipt.scanned_items)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO receipts (id, report_id, image_path, merchant_name, transaction_date, \
             total_amount, tax_amount, scanned_items, fraud_score, audit_notes, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                receipt.id,
                receipt.report_id,
                receipt.image_path,
                receipt.merchant_name,
                receipt.transaction_date.map(|d| d.to_string()),
                receipt.total_amount,
                receipt.tax_amount,
                scanned_items,
                receipt.fraud_score,
                receipt.audit_notes,
                receipt.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get(&self, receipt_id: &str) -> Result<Option<ReceiptRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?"
            ))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut rows = stmt
            .query_map(params![receipt_id], |row| Ok(Self::row_to_receipt(row)))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match rows.next() {
            Some(row) => Ok(Some(row.map_err(|e| StoreError::Database(e.to_string()))??)),
            None => Ok(None),
        }
    }

    fn save_results(&self, receipt_id: &str, results: &ReceiptResults) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let affected = match &results.extraction {
            Some(extraction) => {
                let scanned_items = serde_json::to_string(&extraction.scanned_items)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                conn.execute(
                    "UPDATE receipts SET merchant_name = ?, transaction_date = ?, \
                     total_amount = ?, tax_amount = ?, scanned_items = ?, fraud_score = ?, \
                     audit_notes = ? WHERE id = ?",
                    params![
                        extraction.merchant_name,
                        extraction.transaction_date.map(|d| d.to_string()),
                        extraction.total_amount,
                        extraction.tax_amount,
                        scanned_items,
                        results.fraud_score,
                        results.audit_notes,
                        receipt_id,
                    ],
                )
                .map_err(|e| StoreError::Database(e.to_string()))?
            }
            None => conn
                .execute(
                    "UPDATE receipts SET fraud_score = ?, audit_notes = ? WHERE id = ?",
                    params![results.fraud_score, results.audit_notes, receipt_id],
                )
                .map_err(|e| StoreError::Database(e.to_string()))?,
        };

        if affected == 0 {
            return Err(StoreError::ReceiptNotFound(receipt_id.to_string()));
        }
        Ok(())
    }

    fn annotate_failure(&self, receipt_id: &str, note: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let affected = conn
            .execute(
                "UPDATE receipts SET audit_notes = ? WHERE id = ?",
                params![note, receipt_id],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if affected == 0 {
            return Err(StoreError::ReceiptNotFound(receipt_id.to_string()));
        }
        Ok(())
    }

    fn report_total(&self, report_id: &str) -> Result<f64, StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT COALESCE(SUM(total_amount), 0) FROM receipts \
             WHERE report_id = ? AND total_amount IS NOT NULL",
            params![report_id],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn rescan_candidates(
        &self,
        since: DateTime<Utc>,
        max_score: i64,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT id FROM receipts WHERE created_at >= ? AND fraud_score < ? \
                 ORDER BY created_at ASC",
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![since.to_rfc3339(), max_score], |row| row.get(0))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<String>, _>>()
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

/// SQLite-backed expense report store
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Open or create the database file and ensure the reports table exists.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory report store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS expense_reports (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'PENDING',
                total_amount REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl ReportStore for SqliteReportStore {
    fn create(&self, report: &ExpenseReportRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO expense_reports (id, status, total_amount, created_at) \
             VALUES (?, ?, ?, ?)",
            params![
                report.id,
                report.status.as_str(),
                report.total_amount,
                report.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get(&self, report_id: &str) -> Result<Option<ExpenseReportRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT id, status, total_amount, created_at FROM expense_reports WHERE id = ?",
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut rows = stmt
            .query_map(params![report_id], |row| {
                let id: String = row.get(0)?;
                let status: String = row.get(1)?;
                let total_amount: f64 = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok((id, status, total_amount, created_at))
            })
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match rows.next() {
            Some(row) => {
                let (id, status, total_amount, created_at) =
                    row.map_err(|e| StoreError::Database(e.to_string()))?;
                let status = ReportStatus::parse(&status).ok_or_else(|| {
                    StoreError::Serialization(format!("unknown report status: {status}"))
                })?;
                Ok(Some(ExpenseReportRecord {
                    id,
                    status,
                    total_amount,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                }))
            }
            None => Ok(None),
        }
    }

    fn set_status(&self, report_id: &str, status: ReportStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let affected = conn
            .execute(
                "UPDATE expense_reports SET status = ? WHERE id = ?",
                params![status.as_str(), report_id],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if affected == 0 {
            return Err(StoreError::ReportNotFound(report_id.to_string()));
        }
        Ok(())
    }

    fn set_total(&self, report_id: &str, total: f64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let affected = conn
            .execute(
                "UPDATE expense_reports SET total_amount = ? WHERE id = ?",
                params![total, report_id],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if affected == 0 {
            return Err(StoreError::ReportNotFound(report_id.to_string()));
        }
        Ok(())
    }
}
