use login_common::loader::PgLoader;
use login_common::mask::RecordMasker;
use login_common::metrics_consts::{RECORDS_FILTERED, RECORDS_MASKED, WORKER_FAILURES};
use login_common::record::{Batch, BatchId};
use login_common::validate::validate_batch;
use tracing::{error, info};

use crate::error::WorkerError;

/// Outcome of a worker that reached its end without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub batch: BatchId,
    pub received: usize,
    pub persisted: u64,
}

/// Runs one batch end to end: mask every body, validate, load in a single transaction.
#[derive(Debug, Clone)]
pub struct LoginWorker {
    masker: RecordMasker,
    loader: PgLoader,
}

impl LoginWorker {
    pub fn new(masker: RecordMasker, loader: PgLoader) -> Self {
        Self { masker, loader }
    }

    /// Process a batch. The first body that fails to mask aborts the worker, and nothing from
    /// this batch is persisted. A batch with no row worth persisting never touches the store.
    pub async fn run(&self, batch: Batch) -> Result<WorkerReport, WorkerError> {
        let result = self.process(batch).await;

        if let Err(e) = &result {
            metrics::counter!(WORKER_FAILURES).increment(1);
            error!(batch = %e.batch(), "worker failed: {}", e);
        }

        result
    }

    async fn process(&self, batch: Batch) -> Result<WorkerReport, WorkerError> {
        let Batch { id, bodies } = batch;
        let received = bodies.len();
        info!(batch = %id, messages = received, "worker started");

        let mut records = Vec::with_capacity(received);
        for (index, body) in bodies.iter().enumerate() {
            let record = self
                .masker
                .mask(body)
                .map_err(|source| WorkerError::Mask {
                    batch: id,
                    index,
                    source,
                })?;
            records.push(record);
        }
        metrics::counter!(RECORDS_MASKED).increment(records.len() as u64);

        let rows = validate_batch(records);
        let filtered = received - rows.len();
        if filtered > 0 {
            metrics::counter!(RECORDS_FILTERED).increment(filtered as u64);
        }

        if rows.is_empty() {
            info!(batch = %id, "no rows left to persist after validation");
            return Ok(WorkerReport {
                batch: id,
                received,
                persisted: 0,
            });
        }

        let persisted = self.loader.load(id, &rows).await?;

        Ok(WorkerReport {
            batch: id,
            received,
            persisted,
        })
    }
}
