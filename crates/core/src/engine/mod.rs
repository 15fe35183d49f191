//! The receipt processing workflow engine.
//!
//! Drives one receipt through a directed graph of stages, folding each
//! stage's partial update into the accumulating run state and
//! checkpointing after every fold.
//!
//! ```text
//!  load_image ──► extract_data ──┬──► validate ──┬──► fraud_check ──┬──► finalize
//!                                │               │                  │
//!                                │               └──► needs_review  └──► flag_fraud
//!                                └──► error
//! ```
//!
//! Routing is pure and deterministic: after extraction, a failed status or
//! absent data goes to the error handler; more than three validation
//! errors goes to manual review; a fraud score of 70 or above gets
//! flagged. Everything else finalizes as completed.

mod checkpoint;
mod graph;
mod router;
mod stages;
mod state;

pub use checkpoint::*;
pub use graph::*;
pub use router::*;
pub use state::*;
