//! Downstream output stream.
//!
//! Uses a [`tokio::sync::broadcast`] channel so that every subscriber receives
//! every [`OutputEvent`] without any single subscriber blocking the tracker.
//! A subscriber that falls more than `capacity` events behind loses the
//! oldest ones and is told how many via [`broadcast::error::RecvError::Lagged`].

use permanence_types::{OutputEvent, PermanenceError};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_OUTPUT_CAPACITY: usize = 64;

/// Shared output bus. Clone it cheaply – all clones share the same channel.
#[derive(Clone, Debug)]
pub struct OutputBus {
    sender: broadcast::Sender<OutputEvent>,
}

impl OutputBus {
    /// Create a new bus with the given channel capacity (at least one).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of subscribers that were handed the event, or a
    /// [`PermanenceError::Channel`] error when nobody is listening.
    pub fn publish(&self, event: OutputEvent) -> Result<usize, PermanenceError> {
        self.sender
            .send(event)
            .map_err(|e| PermanenceError::Channel(format!("no output subscribers: {}", e.0.label)))
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> OutputReceiver {
        OutputReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for OutputBus {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CAPACITY)
    }
}

/// An async receiver of [`OutputEvent`]s.
pub struct OutputReceiver {
    receiver: broadcast::Receiver<OutputEvent>,
}

impl OutputReceiver {
    /// Wait for the next event.
    ///
    /// Lag is logged and skipped over.  Returns `None` once every
    /// [`OutputBus`] clone has been dropped.
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "output subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv]; `None` when nothing is
    /// waiting.
    pub fn try_recv(&mut self) -> Option<OutputEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permanence_types::{AnchorId, PerceptionEvent};

    fn make_event(label: &str) -> OutputEvent {
        let source = PerceptionEvent::detection("vision::test", vec![]);
        OutputEvent::grounded(&source, label, AnchorId(1))
    }

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = OutputBus::default();
        let mut rx = bus.subscribe();

        let event = make_event("mug");
        assert_eq!(bus.publish(event.clone())?, 1);

        let received = rx.recv().await.ok_or("no event received")?;
        assert_eq!(received.id, event.id);
        assert_eq!(received.grounded_in, event.grounded_in);
        Ok(())
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = OutputBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = make_event("book");
        bus.publish(event.clone())?;

        assert_eq!(rx1.recv().await.ok_or("rx1 empty")?.id, event.id);
        assert_eq!(rx2.recv().await.ok_or("rx2 empty")?.id, event.id);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = OutputBus::default();
        assert!(matches!(
            bus.publish(make_event("mug")),
            Err(PermanenceError::Channel(_))
        ));
    }

    #[tokio::test]
    async fn slow_subscriber_skips_lagged_events() {
        let bus = OutputBus::new(4);
        let mut slow = bus.subscribe();
        for i in 0..20 {
            let _ = bus.publish(make_event(&format!("obj{i}")));
        }
        let first = slow.recv().await.expect("must still receive after lag");
        assert_eq!(first.label, "obj16");
    }

    #[tokio::test]
    async fn recv_returns_none_when_bus_dropped() {
        let bus = OutputBus::default();
        let mut rx = bus.subscribe();
        drop(bus);
        assert!(rx.recv().await.is_none());
    }
}
