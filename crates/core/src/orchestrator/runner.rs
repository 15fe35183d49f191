//! Receipt orchestrator implementation.
//!
//! Wraps the workflow engine with the operational concerns the engine
//! stays out of: loading receipt rows, retries with exponential backoff,
//! hard and soft time limits, persisting results back to the stores, and
//! the periodic rescan sweep.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::engine::{RunState, WorkflowEngine};
use crate::llm::LlmClient;
use crate::metrics;
use crate::store::{
    ExtractedFields, ReceiptRecord, ReceiptResults, ReceiptStore, ReportStatus, ReportStore,
    StoreError,
};

use super::config::{OrchestratorConfig, RetryConfig};
use super::types::{
    BatchItem, BatchReport, OrchestratorError, OrchestratorStatus, RunOutcome, RunProgress,
    RunReport, SweepOutcome,
};

/// Formats tried when normalizing an extracted transaction date.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d"];

/// Buffer size for a scheduled run's progress channel.
const PROGRESS_BUFFER: usize = 16;

/// Parse a date string from extraction output, trying each known format
/// in order. Returns `None` when nothing matches.
pub fn parse_receipt_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Handle to a run scheduled with
/// [`ReceiptOrchestrator::schedule`]. Receive on `progress` to follow the
/// run's milestones; the channel closes when the run finishes, after
/// which [`wait`](Self::wait) resolves immediately.
pub struct RunHandle {
    pub receipt_id: String,
    pub progress: mpsc::Receiver<RunProgress>,
    task: tokio::task::JoinHandle<Result<RunReport, OrchestratorError>>,
}

impl RunHandle {
    /// Wait for the run to finish and return its final report.
    pub async fn wait(self) -> Result<RunReport, OrchestratorError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(OrchestratorError::TaskFailed(e.to_string())),
        }
    }
}

/// The receipt orchestrator. Drives receipts through the workflow engine
/// and writes the outcome back to the receipt and report stores.
///
/// Cloning is cheap; all state is shared behind `Arc`s, so a clone can be
/// moved into a spawned task.
pub struct ReceiptOrchestrator<C: LlmClient + 'static> {
    config: OrchestratorConfig,
    engine: Arc<WorkflowEngine<C>>,
    receipts: Arc<dyn ReceiptStore>,
    reports: Arc<dyn ReportStore>,
    audit: Option<AuditHandle>,

    // Runtime state
    running: Arc<AtomicBool>,
    active_runs: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<C: LlmClient + 'static> Clone for ReceiptOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            engine: Arc::clone(&self.engine),
            receipts: Arc::clone(&self.receipts),
            reports: Arc::clone(&self.reports),
            audit: self.audit.clone(),
            running: Arc::clone(&self.running),
            active_runs: Arc::clone(&self.active_runs),
            semaphore: Arc::clone(&self.semaphore),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

impl<C: LlmClient + 'static> ReceiptOrchestrator<C> {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        engine: Arc<WorkflowEngine<C>>,
        receipts: Arc<dyn ReceiptStore>,
        reports: Arc<dyn ReportStore>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_runs));

        Self {
            config,
            engine,
            receipts,
            reports,
            audit,
            running: Arc::new(AtomicBool::new(false)),
            active_runs: Arc::new(AtomicUsize::new(0)),
            semaphore,
            shutdown_tx,
        }
    }

    /// Start the orchestrator (spawns background tasks).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting receipt orchestrator");

        if self.config.sweep.enabled {
            self.spawn_sweep_loop();
        }

        info!("Receipt orchestrator started");
    }

    /// Stop the orchestrator. Background loops wind down and new runs are
    /// rejected with [`OrchestratorError::ShuttingDown`]. Stopping is
    /// final; a stopped orchestrator cannot be restarted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping receipt orchestrator");
        let _ = self.shutdown_tx.send(());
        self.semaphore.close();

        // Let background loops observe the signal.
        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("Receipt orchestrator stopped");
    }

    /// Snapshot of the orchestrator state.
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            running: self.running.load(Ordering::Relaxed),
            active_runs: self.active_runs.load(Ordering::Relaxed),
            max_concurrent_runs: self.config.max_concurrent_runs,
        }
    }

    /// Process a single receipt end to end, retrying failed attempts per
    /// the configured retry policy.
    pub async fn process_receipt(&self, receipt_id: &str) -> Result<RunReport, OrchestratorError> {
        self.process_receipt_with_progress(receipt_id, None).await
    }

    /// Like [`process_receipt`](Self::process_receipt), reporting progress
    /// milestones on the given channel as the run advances.
    pub async fn process_receipt_with_progress(
        &self,
        receipt_id: &str,
        progress: Option<mpsc::Sender<RunProgress>>,
    ) -> Result<RunReport, OrchestratorError> {
        self.run(receipt_id, &self.config.retry, progress).await
    }

    /// Run one receipt under an explicit retry policy. The configured
    /// policy is only a default; callers can tighten or loosen it per run.
    pub async fn run(
        &self,
        receipt_id: &str,
        policy: &RetryConfig,
        progress: Option<mpsc::Sender<RunProgress>>,
    ) -> Result<RunReport, OrchestratorError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| OrchestratorError::ShuttingDown)?;

        self.active_runs.fetch_add(1, Ordering::SeqCst);
        let result = self.process_with_retries(receipt_id, policy, progress).await;
        self.active_runs.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Schedule a run in the background and hand back a handle. Progress
    /// milestones arrive on the handle while the run executes; the channel
    /// closes once the run finishes.
    pub fn schedule(&self, receipt_id: &str) -> RunHandle {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let runner = self.clone();
        let id = receipt_id.to_string();
        let task = tokio::spawn(async move {
            runner.process_receipt_with_progress(&id, Some(tx)).await
        });

        RunHandle {
            receipt_id: receipt_id.to_string(),
            progress: rx,
            task,
        }
    }

    /// Process a batch of receipts sequentially. One receipt erroring out
    /// does not stop the rest of the batch.
    pub async fn process_batch(&self, receipt_ids: &[String]) -> BatchReport {
        let batch_timer = Instant::now();
        info!("Processing batch of {} receipts", receipt_ids.len());

        let mut results = Vec::with_capacity(receipt_ids.len());
        let mut successful = 0usize;
        let mut failed = 0usize;

        for receipt_id in receipt_ids {
            match self.process_receipt(receipt_id).await {
                Ok(report) => {
                    successful += 1;
                    results.push(BatchItem {
                        receipt_id: receipt_id.clone(),
                        outcome: RunOutcome::Success,
                        report: Some(report),
                        error: None,
                    });
                }
                Err(e) => {
                    failed += 1;
                    results.push(BatchItem {
                        receipt_id: receipt_id.clone(),
                        outcome: RunOutcome::Failed,
                        report: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.emit(AuditEvent::BatchCompleted {
            total_processed: receipt_ids.len(),
            successful,
            failed,
            duration_ms: batch_timer.elapsed().as_millis() as u64,
        })
        .await;
        info!("Batch finished: {} successful, {} failed", successful, failed);

        BatchReport {
            total_processed: receipt_ids.len(),
            successful,
            failed,
            results,
        }
    }

    /// Queue recent low-score receipts for reprocessing. Each candidate
    /// runs in its own task, bounded by `max_concurrent_runs`.
    pub async fn rescan_recent(&self) -> Result<SweepOutcome, OrchestratorError> {
        let sweep = &self.config.sweep;
        let since = Utc::now() - chrono::Duration::days(sweep.window_days);
        let candidates = self.receipts.rescan_candidates(since, sweep.max_score)?;
        let queued = candidates.len();

        for receipt_id in candidates {
            let runner = self.clone();
            tokio::spawn(async move {
                if let Err(e) = runner.process_receipt(&receipt_id).await {
                    warn!("Rescan of receipt {} failed: {}", receipt_id, e);
                }
            });
        }

        metrics::SWEEP_QUEUED.inc_by(queued as u64);
        self.emit(AuditEvent::SweepCompleted {
            queued,
            window_days: sweep.window_days,
            max_score: sweep.max_score,
        })
        .await;
        info!("Rescan sweep queued {} receipts", queued);

        Ok(SweepOutcome { queued })
    }

    fn spawn_sweep_loop(&self) {
        let runner = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let interval = Duration::from_secs(runner.config.sweep.interval_secs);
            info!("Rescan sweep loop started (every {:?})", interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Rescan sweep loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !runner.running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = runner.rescan_recent().await {
                            warn!("Rescan sweep failed: {}", e);
                        }
                    }
                }
            }

            info!("Rescan sweep loop stopped");
        });
    }

    async fn process_with_retries(
        &self,
        receipt_id: &str,
        policy: &RetryConfig,
        progress: Option<mpsc::Sender<RunProgress>>,
    ) -> Result<RunReport, OrchestratorError> {
        let run_timer = Instant::now();
        let max_retries = policy.max_retries;
        let mut attempt: u32 = 1;

        loop {
            match self
                .process_attempt(receipt_id, attempt, policy, &progress, run_timer)
                .await
            {
                Ok(report) => {
                    metrics::TASK_ATTEMPTS.with_label_values(&["success"]).inc();
                    return Ok(report);
                }
                Err(e) if attempt > max_retries => {
                    metrics::TASK_ATTEMPTS.with_label_values(&["failed"]).inc();
                    warn!(
                        "Receipt {} failed after {} attempts: {}",
                        receipt_id, attempt, e
                    );

                    // Best effort: leave a trace on the receipt itself.
                    let note = format!("Processing failed: {e}");
                    if let Err(store_err) = self.receipts.annotate_failure(receipt_id, &note) {
                        debug!(
                            "Could not annotate failed receipt {}: {}",
                            receipt_id, store_err
                        );
                    }

                    self.emit(AuditEvent::RunFailed {
                        receipt_id: receipt_id.to_string(),
                        attempts: attempt,
                        error: e.to_string(),
                    })
                    .await;

                    return Err(OrchestratorError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = policy.backoff_delay(attempt);
                    metrics::TASK_ATTEMPTS.with_label_values(&["retried"]).inc();
                    metrics::RETRY_ATTEMPTS.inc();
                    warn!(
                        "Attempt {} for receipt {} failed: {} (retrying in {:?})",
                        attempt, receipt_id, e, delay
                    );

                    self.emit(AuditEvent::RunRetryScheduled {
                        receipt_id: receipt_id.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: e.to_string(),
                    })
                    .await;

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One full execution: load the row, run the workflow under the hard
    /// time limit, persist results. Retried runs restart from here, so the
    /// receipt row is re-read on every attempt.
    async fn process_attempt(
        &self,
        receipt_id: &str,
        attempt: u32,
        policy: &RetryConfig,
        progress: &Option<mpsc::Sender<RunProgress>>,
        run_timer: Instant,
    ) -> Result<RunReport, OrchestratorError> {
        send_progress(progress, receipt_id, 10, "loading");

        let Some(receipt) = self.receipts.get(receipt_id)? else {
            warn!("Receipt {} not found, nothing to process", receipt_id);
            return Ok(RunReport::failed(
                receipt_id,
                format!("Receipt {receipt_id} not found"),
            ));
        };

        self.emit(AuditEvent::RunStarted {
            receipt_id: receipt.id.clone(),
            report_id: receipt.report_id.clone(),
            attempt,
        })
        .await;

        send_progress(progress, receipt_id, 30, "extracting");
        let soft_deadline = Instant::now() + policy.soft_timeout();
        let state = match tokio::time::timeout(
            policy.hard_timeout(),
            self.engine.run_with_deadline(
                receipt_id,
                &receipt.image_path,
                &receipt.report_id,
                Some(soft_deadline),
            ),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                metrics::TASK_TIMEOUTS.with_label_values(&["hard"]).inc();
                warn!("Receipt {} exceeded the hard time limit", receipt_id);
                return Err(OrchestratorError::HardTimeout {
                    secs: policy.hard_timeout_secs,
                });
            }
        };

        send_progress(progress, receipt_id, 80, "saving");
        self.persist_results(&receipt, &state).await?;
        send_progress(progress, receipt_id, 100, "complete");

        self.emit(AuditEvent::RunCompleted {
            receipt_id: receipt.id.clone(),
            status: state.status.as_str().to_string(),
            fraud_score: state.fraud_score,
            duration_ms: run_timer.elapsed().as_millis() as u64,
        })
        .await;

        let (merchant_name, total_amount) = match &state.extracted_data {
            Some(data) => (data.merchant_name.clone(), data.total_amount),
            None => (None, None),
        };
        info!(
            "Receipt {} processed with status {}",
            receipt_id,
            state.status.as_str()
        );

        Ok(RunReport::success(
            receipt_id,
            state.status,
            state.fraud_score,
            merchant_name,
            total_amount,
        ))
    }

    /// Write the run outcome back to the stores: receipt columns, the
    /// report running total, and the report flag when the run needs
    /// attention. A missing report is logged, not an error.
    async fn persist_results(
        &self,
        receipt: &ReceiptRecord,
        state: &RunState,
    ) -> Result<(), OrchestratorError> {
        let extraction = state.extracted_data.as_ref().map(|data| ExtractedFields {
            merchant_name: data.merchant_name.clone(),
            transaction_date: data.transaction_date.as_deref().and_then(parse_receipt_date),
            total_amount: data.total_amount,
            tax_amount: data.tax_amount,
            scanned_items: data.items.clone(),
        });

        let results = ReceiptResults {
            extraction,
            fraud_score: state.fraud_score,
            audit_notes: state.audit_notes.join("\n"),
        };
        self.receipts.save_results(&receipt.id, &results)?;

        let has_total = state
            .extracted_data
            .as_ref()
            .and_then(|data| data.total_amount)
            .unwrap_or(0.0)
            != 0.0;
        if has_total {
            let total = self.receipts.report_total(&receipt.report_id)?;
            match self.reports.set_total(&receipt.report_id, total) {
                Ok(()) => {
                    debug!("Report {} total updated to {:.2}", receipt.report_id, total);
                }
                Err(StoreError::ReportNotFound(_)) => {
                    warn!("Report {} not found while updating total", receipt.report_id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if state.status.needs_attention() {
            match self
                .reports
                .set_status(&receipt.report_id, ReportStatus::Flagged)
            {
                Ok(()) => {
                    info!(
                        "Report {} flagged (receipt {} is {})",
                        receipt.report_id,
                        receipt.id,
                        state.status.as_str()
                    );
                    self.emit(AuditEvent::ReportFlagged {
                        report_id: receipt.report_id.clone(),
                        receipt_id: receipt.id.clone(),
                        status: state.status.as_str().to_string(),
                    })
                    .await;
                }
                Err(StoreError::ReportNotFound(_)) => {
                    warn!("Report {} not found while flagging", receipt.report_id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

fn send_progress(
    progress: &Option<mpsc::Sender<RunProgress>>,
    receipt_id: &str,
    percent: u8,
    step: &str,
) {
    if let Some(tx) = progress {
        let update = RunProgress {
            receipt_id: receipt_id.to_string(),
            percent,
            step: step.to_string(),
        };
        if tx.try_send(update).is_err() {
            debug!("Progress listener lagging for receipt {}", receipt_id);
        }
    }
}
