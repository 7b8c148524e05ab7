//! Event publishing
//!
//! Subscribers receive events through bounded mpsc channels. Publishing never
//! blocks: a subscriber that falls behind loses events, and closed channels
//! are dropped on the next publish.

use crate::error::RetryError;
use crate::models::Segment;
use tokio::sync::mpsc;

/// Default capacity of subscriber channels
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Fan-out of events to mpsc subscribers
#[derive(Debug)]
pub struct EventPublisher<E: Clone> {
    subscribers: Vec<mpsc::Sender<E>>,
}

impl<E: Clone> EventPublisher<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&mut self, tx: mpsc::Sender<E>) {
        self.subscribers.push(tx);
    }

    /// Create a channel, register its sender and return the receiver
    pub fn channel(&mut self, buffer: usize) -> mpsc::Receiver<E> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.subscribe(tx);
        rx
    }

    /// Send `event` to every live subscriber
    pub fn publish(&mut self, event: E) {
        self.subscribers.retain(|tx| !tx.is_closed());
        for tx in &self.subscribers {
            let _ = tx.try_send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone> Default for EventPublisher<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Notifications emitted by [`crate::StreamController`]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The current segment changed (advance, selection, switch, load)
    SegmentChanged {
        stream_id: String,
        index: usize,
        segment: Segment,
    },
    /// A generation run started or finished
    GenerationStateChanged { generating: bool },
    /// Segments were appended to the current stream
    TimelineExtended { stream_id: String, total: usize },
    /// The next display window finished generating
    NextStreamReady { stream_id: String, segments: usize },
    /// The current stream was replaced by the prefetched window
    StreamSwitched { previous: String, stream_id: String },
    /// A generation run failed for good
    GenerationFailed {
        key: String,
        error: RetryError,
        /// A substitute batch was used in place of the generated one
        substituted: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let mut publisher = EventPublisher::<u32>::new();
        let mut rx1 = publisher.channel(4);
        let mut rx2 = publisher.channel(4);

        publisher.publish(7);

        assert_eq!(rx1.recv().await, Some(7));
        assert_eq!(rx2.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_dropped() {
        let mut publisher = EventPublisher::<u32>::new();
        let rx = publisher.channel(4);
        let _keep = publisher.channel(4);
        drop(rx);

        publisher.publish(1);
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block() {
        let mut publisher = EventPublisher::<u32>::new();
        let mut rx = publisher.channel(1);
        publisher.publish(1);
        publisher.publish(2);
        assert_eq!(rx.recv().await, Some(1));
        assert!(rx.try_recv().is_err());
    }
}
