use login_common::metrics_consts::MESSAGES_DRAINED;
use login_common::queue::{MessageQueue, QueueError};
use tracing::{debug, info};

/// Poll the queue until a receive returns nothing, acknowledging every message as soon as it is
/// fetched, and return the bodies in arrival order.
///
/// Messages are deleted before they are masked or persisted. A message deleted here and then lost
/// to a downstream failure is not recoverable: there is no redelivery. Any queue error aborts the
/// drain, and the bodies collected so far are dropped with it.
pub async fn drain_queue<Q>(queue: &Q, receive_size: usize) -> Result<Vec<String>, QueueError>
where
    Q: MessageQueue + ?Sized,
{
    let mut bodies = Vec::new();

    loop {
        let messages = queue.receive(receive_size).await?;
        if messages.is_empty() {
            info!("no more messages to receive");
            break;
        }

        debug!("received {} messages", messages.len());
        metrics::counter!(MESSAGES_DRAINED).increment(messages.len() as u64);

        for message in messages {
            queue.delete(&message.receipt_handle).await?;
            bodies.push(message.body);
        }
    }

    Ok(bodies)
}
