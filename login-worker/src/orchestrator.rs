//! Drive one run: drain the queue, deduplicate, partition, dispatch workers and join them.
use std::fmt;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::future::join_all;
use login_common::dedup::dedup;
use login_common::loader::PgLoader;
use login_common::mask::RecordMasker;
use login_common::queue::{MessageQueue, SqsQueue};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::drain::drain_queue;
use crate::error::{RunError, WorkerError};
use crate::partition::{batch_size, partition};
use crate::worker::{LoginWorker, WorkerReport};

/// Stages of a run. `Done` may be reached straight from `Draining` when the queue is empty, and
/// `Failed` from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Draining,
    Deduping,
    Partitioning,
    Dispatched,
    Joining,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::Draining => "draining",
            RunState::Deduping => "deduping",
            RunState::Partitioning => "partitioning",
            RunState::Dispatched => "dispatched",
            RunState::Joining => "joining",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    /// Queue depth reported before draining.
    pub approximate_depth: usize,
    /// Messages received and acknowledged, duplicates included.
    pub drained: usize,
    pub deduplicated: usize,
    pub workers_launched: usize,
    pub rows_persisted: u64,
    pub elapsed: Duration,
}

impl RunReport {
    fn empty(elapsed: Duration) -> Self {
        Self {
            state: RunState::Done,
            approximate_depth: 0,
            drained: 0,
            deduplicated: 0,
            workers_launched: 0,
            rows_persisted: 0,
            elapsed,
        }
    }

    pub fn messages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.drained as f64 / secs
        } else {
            0.0
        }
    }
}

pub struct Orchestrator<Q> {
    queue: Q,
    loader: PgLoader,
    workers: usize,
    create_date: Option<NaiveDate>,
}

impl Orchestrator<SqsQueue> {
    /// Build an orchestrator reading from SQS. Neither the queue nor the database is contacted here.
    pub async fn from_config(config: &Config) -> Result<Self, RunError> {
        let queue = SqsQueue::with_endpoint(
            &config.queue_endpoint,
            &config.aws_region,
            &config.queue_url,
        )
        .await;
        let loader = PgLoader::from_url(&config.database_url, config.table_name.as_str())
            .map_err(RunError::InvalidDatabaseUrl)?;

        Ok(Self::new(queue, loader, config.worker_count()))
    }
}

impl<Q: MessageQueue> Orchestrator<Q> {
    pub fn new(queue: Q, loader: PgLoader, workers: usize) -> Self {
        Self {
            queue,
            loader,
            workers: workers.max(1),
            create_date: None,
        }
    }

    /// Stamp records with a fixed date instead of the date the workers are dispatched on.
    pub fn with_create_date(mut self, create_date: NaiveDate) -> Self {
        self.create_date = Some(create_date);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run(&self) -> Result<RunReport, RunError> {
        let start = Instant::now();
        let mut state = RunState::Init;

        match self.execute(&mut state, start).await {
            Ok(report) => Ok(report),
            Err(e) => {
                transition(&mut state, RunState::Failed);
                error!("run failed: {}", e);
                Err(e)
            }
        }
    }

    async fn execute(&self, state: &mut RunState, start: Instant) -> Result<RunReport, RunError> {
        transition(state, RunState::Draining);
        let approximate_depth = self.queue.approximate_count().await?;
        if approximate_depth == 0 {
            info!("no new messages to receive");
            transition(state, RunState::Done);
            return Ok(RunReport::empty(start.elapsed()));
        }
        info!(approximate_depth, "minimum number of messages to be processed");

        let receive_size = batch_size(approximate_depth, self.workers);
        let bodies = drain_queue(&self.queue, receive_size).await?;
        let drained = bodies.len();

        transition(state, RunState::Deduping);
        let unique = dedup(bodies);
        let deduplicated = unique.len();
        info!(drained, deduplicated, "removed duplicate messages");

        transition(state, RunState::Partitioning);
        let batches = partition(unique, self.workers);

        let masker = self
            .create_date
            .map(RecordMasker::new)
            .unwrap_or_else(RecordMasker::for_today);
        let handles: Vec<JoinHandle<Result<WorkerReport, WorkerError>>> = batches
            .into_iter()
            .map(|batch| {
                let worker = LoginWorker::new(masker, self.loader.clone());
                tokio::spawn(async move { worker.run(batch).await })
            })
            .collect();
        let workers_launched = handles.len();
        transition(state, RunState::Dispatched);
        info!(workers_launched, workers = self.workers, "workers dispatched");

        transition(state, RunState::Joining);
        let mut rows_persisted = 0;
        let mut failures = Vec::new();
        let mut panicked = None;
        for result in join_all(handles).await {
            match result {
                Ok(Ok(report)) => rows_persisted += report.persisted,
                Ok(Err(e)) => failures.push(e),
                Err(join_error) => {
                    error!("worker task did not complete: {}", join_error);
                    if panicked.is_none() {
                        panicked = Some(join_error);
                    }
                }
            }
        }

        let mut report = RunReport {
            state: *state,
            approximate_depth,
            drained,
            deduplicated,
            workers_launched,
            rows_persisted,
            elapsed: start.elapsed(),
        };
        info!(
            drained = report.drained,
            deduplicated = report.deduplicated,
            workers = report.workers_launched,
            rows_persisted = report.rows_persisted,
            elapsed_ms = report.elapsed.as_millis() as u64,
            messages_per_second = report.messages_per_second(),
            "number of messages processed: {}",
            report.drained
        );

        // Batches are committed independently: a failure here does not undo any other batch.
        if let Some(join_error) = panicked {
            return Err(RunError::WorkerPanicked(join_error));
        }
        if !failures.is_empty() {
            return Err(RunError::WorkersFailed {
                launched: workers_launched,
                failures,
            });
        }

        transition(state, RunState::Done);
        report.state = *state;
        Ok(report)
    }
}

fn transition(state: &mut RunState, next: RunState) {
    info!(from = %state, to = %next, "run state changed");
    *state = next;
}

#[cfg(test)]
mod tests {
    use login_common::queue::MemoryQueue;
    use sqlx::postgres::PgConnectOptions;

    use super::*;

    fn unreachable_loader() -> PgLoader {
        PgLoader::new(
            PgConnectOptions::new().host("127.0.0.1").port(1),
            "user_logins",
        )
    }

    #[tokio::test]
    async fn test_empty_queue_finishes_without_workers() {
        let orchestrator = Orchestrator::new(MemoryQueue::new(), unreachable_loader(), 4);

        let report = orchestrator.run().await.expect("empty run should succeed");

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.drained, 0);
        assert_eq!(report.workers_launched, 0);
        assert_eq!(report.rows_persisted, 0);
        assert_eq!(orchestrator.queue.receive_calls(), 0);
    }

    #[tokio::test]
    async fn test_uninformative_messages_never_reach_the_store() {
        let queue = MemoryQueue::with_bodies(["{}", "{}", r#"{"referrer":"x"}"#]);
        let orchestrator = Orchestrator::new(queue, unreachable_loader(), 2);

        let report = orchestrator.run().await.expect("no worker should touch the store");

        assert_eq!(report.drained, 3);
        assert_eq!(report.deduplicated, 2);
        assert_eq!(report.workers_launched, 2);
        assert_eq!(report.rows_persisted, 0);
        assert!(orchestrator.queue.is_empty());
    }

    #[tokio::test]
    async fn test_queue_failure_fails_the_run() {
        let queue = MemoryQueue::with_bodies([r#"{"user_id":"u1"}"#]).failing_deletes();
        let orchestrator = Orchestrator::new(queue, unreachable_loader(), 1);

        let error = orchestrator.run().await.unwrap_err();

        assert!(matches!(error, RunError::Queue(_)));
    }

    #[tokio::test]
    async fn test_worker_failures_are_all_reported() {
        let queue = MemoryQueue::with_bodies(["bad one", "bad two", r#"{"user_id":"u1"}"#]);
        let orchestrator = Orchestrator::new(queue, unreachable_loader(), 3);

        let error = orchestrator.run().await.unwrap_err();

        match error {
            RunError::WorkersFailed { launched, failures } => {
                assert_eq!(launched, 3);
                // Two decode failures and one connection failure.
                assert_eq!(failures.len(), 3);
            }
            other => panic!("expected worker failures, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let orchestrator = Orchestrator::new(MemoryQueue::new(), unreachable_loader(), 0);

        assert_eq!(orchestrator.workers(), 1);
    }
}
