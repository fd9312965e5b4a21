use login_common::loader::LoadError;
use login_common::mask::MaskError;
use login_common::queue::QueueError;
use login_common::record::BatchId;
use thiserror::Error;

/// Enumeration of errors that abort a single worker. Other workers are not affected.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("{batch}: failed to mask record {index}: {source}")]
    Mask {
        batch: BatchId,
        index: usize,
        #[source]
        source: MaskError,
    },
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl WorkerError {
    pub fn batch(&self) -> BatchId {
        match self {
            WorkerError::Mask { batch, .. } => *batch,
            WorkerError::Load(error) => error.batch(),
        }
    }
}

/// Enumeration of errors that fail a whole run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("queue service error: {0}")]
    Queue(#[from] QueueError),
    #[error("invalid database url: {0}")]
    InvalidDatabaseUrl(sqlx::Error),
    #[error("{} of {launched} workers failed, first failure: {}", .failures.len(), first_failure(.failures))]
    WorkersFailed {
        launched: usize,
        failures: Vec<WorkerError>,
    },
    #[error("a worker task panicked: {0}")]
    WorkerPanicked(#[from] tokio::task::JoinError),
}

fn first_failure(failures: &[WorkerError]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}
