//! Queue service contract consumed by the drainer, with an SQS client and an in-memory queue.
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use thiserror::Error;
use tracing::debug;

/// SQS refuses to return more than this many messages per receive call.
pub const SQS_MAX_RECEIVE: usize = 10;

/// Enumeration of errors talking to the queue service. Every one of these is fatal to the run.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("failed to fetch the approximate number of messages: {0}")]
    Count(String),
    #[error("queue attribute {0} missing or not a number")]
    MissingAttribute(&'static str),
    #[error("failed to receive messages: {0}")]
    Receive(String),
    #[error("failed to delete message {receipt_handle}: {reason}")]
    Delete {
        receipt_handle: String,
        reason: String,
    },
}

/// A message as handed out by the queue service. The receipt handle is single-use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub body: String,
    pub receipt_handle: String,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Approximate number of messages available for retrieval.
    async fn approximate_count(&self) -> Result<usize, QueueError>;

    /// Fetch up to `max` messages with zero visibility timeout and zero wait.
    /// An empty result means the queue is drained.
    async fn receive(&self, max: usize) -> Result<Vec<RawMessage>, QueueError>;

    /// Acknowledge a message, removing it from the queue for good.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

/// `MessageQueue` backed by an SQS (or SQS-compatible, e.g. LocalStack) queue.
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: &str) -> Self {
        Self {
            client,
            queue_url: queue_url.to_owned(),
        }
    }

    /// Build a client for a custom endpoint. Credentials come from the default provider chain.
    pub async fn with_endpoint(endpoint_url: &str, region: &str, queue_url: &str) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_sqs::config::Region::new(region.to_owned()))
            .endpoint_url(endpoint_url)
            .load()
            .await;

        Self::new(Client::new(&aws_config), queue_url)
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn approximate_count(&self) -> Result<usize, QueueError> {
        let response = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Count(DisplayErrorContext(&e).to_string()))?;

        response
            .attributes
            .and_then(|mut attributes| {
                attributes.remove(&QueueAttributeName::ApproximateNumberOfMessages)
            })
            .and_then(|count| count.parse::<usize>().ok())
            .ok_or(QueueError::MissingAttribute("ApproximateNumberOfMessages"))
    }

    async fn receive(&self, max: usize) -> Result<Vec<RawMessage>, QueueError> {
        let max = max.clamp(1, SQS_MAX_RECEIVE) as i32;

        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .visibility_timeout(0)
            .wait_time_seconds(0)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        let messages: Vec<RawMessage> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|message| RawMessage {
                body: message.body.unwrap_or_default(),
                receipt_handle: message.receipt_handle.unwrap_or_default(),
            })
            .collect();

        debug!("received {} messages from {}", messages.len(), self.queue_url);

        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        if receipt_handle.is_empty() {
            return Err(QueueError::Delete {
                receipt_handle: receipt_handle.to_owned(),
                reason: "message has no receipt handle".to_owned(),
            });
        }

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete {
                receipt_handle: receipt_handle.to_owned(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }
}

/// An in-process queue with SQS-like semantics for a zero visibility timeout: a received message
/// stays visible until it is deleted. Useful for local runs and tests.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
    fail_deletes: bool,
}

#[derive(Default)]
struct MemoryQueueState {
    messages: VecDeque<RawMessage>,
    next_handle: u64,
    receive_calls: usize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bodies<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = Self::new();
        for body in bodies {
            queue.send(body);
        }
        queue
    }

    /// Make every `delete` call fail, as an unreachable queue service would.
    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn send(&self, body: impl Into<String>) {
        let mut state = self.lock();
        state.next_handle += 1;
        let receipt_handle = format!("receipt-{}", state.next_handle);
        state.messages.push_back(RawMessage {
            body: body.into(),
            receipt_handle,
        });
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `receive` calls served so far.
    pub fn receive_calls(&self) -> usize {
        self.lock().receive_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryQueueState> {
        // The state holds no invariant a panicking holder could break.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn approximate_count(&self) -> Result<usize, QueueError> {
        Ok(self.len())
    }

    async fn receive(&self, max: usize) -> Result<Vec<RawMessage>, QueueError> {
        let mut state = self.lock();
        state.receive_calls += 1;
        Ok(state.messages.iter().take(max).cloned().collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        if self.fail_deletes {
            return Err(QueueError::Delete {
                receipt_handle: receipt_handle.to_owned(),
                reason: "queue service unavailable".to_owned(),
            });
        }

        let mut state = self.lock();
        match state
            .messages
            .iter()
            .position(|m| m.receipt_handle == receipt_handle)
        {
            Some(index) => {
                state.messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::Delete {
                receipt_handle: receipt_handle.to_owned(),
                reason: "unknown receipt handle".to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_queue_keeps_messages_until_deleted() {
        let queue = MemoryQueue::with_bodies(["a", "b", "c"]);

        let first = queue.receive(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(queue.approximate_count().await.unwrap(), 3);

        // Zero visibility timeout: undeleted messages come back straight away.
        let again = queue.receive(2).await.unwrap();
        assert_eq!(first, again);

        for message in &first {
            queue.delete(&message.receipt_handle).await.unwrap();
        }

        let rest = queue.receive(2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].body, "c");
        assert_eq!(queue.receive_calls(), 3);
    }

    #[tokio::test]
    async fn test_memory_queue_receipt_handles_are_single_use() {
        let queue = MemoryQueue::with_bodies(["a"]);
        let message = queue.receive(1).await.unwrap().remove(0);

        queue.delete(&message.receipt_handle).await.unwrap();

        assert!(queue.delete(&message.receipt_handle).await.is_err());
        assert!(queue.is_empty());
        assert!(queue.receive(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_queue_failing_deletes() {
        let queue = MemoryQueue::with_bodies(["a"]).failing_deletes();
        let message = queue.receive(1).await.unwrap().remove(0);

        let error = queue.delete(&message.receipt_handle).await.unwrap_err();

        assert!(matches!(error, QueueError::Delete { .. }));
        assert_eq!(queue.len(), 1);
    }
}
