//! Persistence for expense reports and their receipts.
//!
//! The workflow engine never touches the database directly. The
//! orchestrator loads a [`ReceiptRecord`] before a run, then writes the
//! run's results back through [`ReceiptStore`] and adjusts the owning
//! report through [`ReportStore`]. [`SqliteReceiptStore`] and
//! [`SqliteReportStore`] implement the traits, usually over the same
//! database file.

mod receipt;
mod sqlite;
mod types;

pub use receipt::*;
pub use sqlite::*;
pub use types::*;
