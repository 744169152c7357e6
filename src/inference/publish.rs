//! Fire-and-forget hand-off of inference summaries to an external publisher

use flume::{Receiver, Sender, TrySendError};
use tracing::{error, warn};

/// Sending half of the bounded summary queue.
///
/// Never blocks: a full queue drops the message.
#[derive(Clone)]
pub struct ResultPublisher {
    tx: Sender<String>,
}

impl ResultPublisher {
    pub fn channel(depth: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = flume::bounded(depth);
        (Self { tx }, rx)
    }

    /// Returns whether the message was queued
    pub fn publish(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                metrics::counter!("argus_publish_dropped_total").increment(1);
                error!("Failed to queue inference result, queue full: {}", message);
                false
            }
            Err(TrySendError::Disconnected(message)) => {
                metrics::counter!("argus_publish_dropped_total").increment(1);
                warn!("Result publisher is gone, dropping: {}", message);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (publisher, rx) = ResultPublisher::channel(2);
        assert!(publisher.publish("Detected faces: 1".into()));
        assert!(publisher.publish("Detected faces: 2".into()));
        assert!(!publisher.publish("Detected faces: 3".into()));

        let drained: Vec<_> = rx.try_iter().collect();
        assert_eq!(drained, vec!["Detected faces: 1", "Detected faces: 2"]);
    }

    #[test]
    fn test_disconnected_consumer() {
        let (publisher, rx) = ResultPublisher::channel(1);
        drop(rx);
        assert!(!publisher.publish("Detected faces: 0".into()));
    }
}
