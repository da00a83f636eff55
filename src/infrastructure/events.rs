use tokio::sync::broadcast;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Typed lifecycle event stream.
///
/// Each component owns one bus for its own event enum. Subscribers hold a
/// `broadcast::Receiver`; dropping it ends the subscription. Emitting with no
/// subscribers is a no-op, and slow subscribers observe `Lagged` rather than
/// slowing the emitter down.
#[derive(Debug, Clone)]
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: E) {
        let _ = self.sender.send(event);
    }

    /// Build the event only when someone is listening.
    pub fn emit_with<F>(&self, make_event: F)
    where
        F: FnOnce() -> E,
    {
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(make_event());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(7);

        assert_eq!(first.recv().await.unwrap(), 7);
        assert_eq!(second.recv().await.unwrap(), 7);
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus: EventBus<&'static str> = EventBus::default();
        bus.emit("nobody listening");
        assert_eq!(bus.subscriber_count(), 0);

        let receiver = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(receiver);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
