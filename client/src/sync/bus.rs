use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::events::ServerEvent;

/// Source of decoded server events. A live connection yields events in
/// arrival order; reconnection is the implementor's responsibility. The
/// engine resubscribes explicitly on session changes.
#[async_trait]
pub trait EventTransport: Send {
    /// Next event, or `None` once the connection is gone for good.
    async fn next_event(&mut self) -> Option<ServerEvent>;
}

/// An [`EventTransport`] backed by an in-process channel. Used by tests to
/// script event sequences and by adapters that decode frames elsewhere.
pub struct ChannelTransport {
    rx: mpsc::Receiver<ServerEvent>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (mpsc::Sender<ServerEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }
}

/// Single ordered, multi-subscriber stream of decoded events.
///
/// Delivery order matches publish order. A bounded window of recent events
/// is replayed to late subscribers, so a consumer started slightly after
/// connection still observes the Ready/Create events it would otherwise miss.
pub struct EventBus {
    live: broadcast::Sender<ServerEvent>,
    /// Recent events for late subscribers. Guarded by the same lock that
    /// orders publish against subscribe, so an event lands either in a
    /// subscriber's backlog or in its live receiver, never both.
    replay: Mutex<VecDeque<ServerEvent>>,
    replay_window: usize,
}

impl EventBus {
    pub fn new(capacity: usize, replay_window: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            live,
            replay: Mutex::new(VecDeque::with_capacity(replay_window)),
            replay_window,
        }
    }

    /// Publish one event to all current subscribers and the replay window.
    pub fn publish(&self, event: ServerEvent) {
        let mut replay = self.replay.lock().expect("replay window lock poisoned");
        if self.replay_window > 0 {
            if replay.len() == self.replay_window {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }
        // A send error just means nobody is subscribed yet; the replay
        // window covers them when they arrive.
        let _ = self.live.send(event);
    }

    /// Subscribe, receiving the replay window first and then live events.
    pub fn subscribe(&self) -> EventStream {
        let replay = self.replay.lock().expect("replay window lock poisoned");
        let rx = self.live.subscribe();
        EventStream {
            backlog: replay.iter().cloned().collect(),
            live: rx,
        }
    }
}

/// One subscriber's view of the bus: buffered replay, then the live feed.
pub struct EventStream {
    backlog: VecDeque<ServerEvent>,
    live: broadcast::Receiver<ServerEvent>,
}

impl EventStream {
    /// Next event in order, or `None` when the bus has shut down.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.live.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged; events were skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Pump a transport into the bus until the transport ends or the token is
/// cancelled. Unrecognized events are dropped here with a debug line; they
/// never reach subscribers.
pub async fn pump(
    bus: std::sync::Arc<EventBus>,
    mut transport: Box<dyn EventTransport>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = transport.next_event() => match event {
                Some(ServerEvent::Unknown) => {
                    debug!("dropping unrecognized event kind");
                }
                Some(event) => {
                    debug!(kind = event.kind(), "event received");
                    bus.publish(event);
                }
                None => {
                    debug!("event transport ended");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sync::entities::testutil;

    fn channel_delete(id: &str) -> ServerEvent {
        ServerEvent::ChannelDelete { id: id.to_string() }
    }

    #[tokio::test]
    async fn test_delivery_order_matches_publish_order() {
        let bus = EventBus::new(16, 0);
        let mut stream = bus.subscribe();
        bus.publish(channel_delete("a"));
        bus.publish(channel_delete("b"));
        bus.publish(channel_delete("c"));

        for expected in ["a", "b", "c"] {
            match stream.recv().await {
                Some(ServerEvent::ChannelDelete { id }) => assert_eq!(id, expected),
                other => panic!("expected ChannelDelete, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_replay_window() {
        let bus = EventBus::new(16, 2);
        bus.publish(channel_delete("a"));
        bus.publish(channel_delete("b"));
        bus.publish(channel_delete("c"));

        // Window holds the last two events; "a" fell out.
        let mut stream = bus.subscribe();
        match stream.recv().await {
            Some(ServerEvent::ChannelDelete { id }) => assert_eq!(id, "b"),
            other => panic!("unexpected {:?}", other),
        }
        match stream.recv().await {
            Some(ServerEvent::ChannelDelete { id }) => assert_eq!(id, "c"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_then_live_without_duplicates() {
        let bus = EventBus::new(16, 8);
        bus.publish(channel_delete("a"));
        let mut stream = bus.subscribe();
        bus.publish(channel_delete("b"));

        let mut seen = Vec::new();
        for _ in 0..2 {
            match stream.recv().await {
                Some(ServerEvent::ChannelDelete { id }) => seen.push(id),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_each_event_once() {
        let bus = EventBus::new(16, 4);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish(ServerEvent::MessageCreate {
            message: testutil::message("m1", "ch", "hi"),
        });

        for stream in [&mut first, &mut second] {
            match stream.recv().await {
                Some(ServerEvent::MessageCreate { message }) => assert_eq!(message.id, "m1"),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_pump_drops_unknown_events() {
        let bus = Arc::new(EventBus::new(16, 8));
        let (tx, transport) = ChannelTransport::new(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pump(bus.clone(), Box::new(transport), cancel));

        tx.send(ServerEvent::Unknown).await.unwrap();
        tx.send(channel_delete("a")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let mut stream = bus.subscribe();
        match stream.recv().await {
            Some(ServerEvent::ChannelDelete { id }) => assert_eq!(id, "a"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancellation() {
        let bus = Arc::new(EventBus::new(16, 8));
        let (_tx, transport) = ChannelTransport::new(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pump(bus.clone(), Box::new(transport), cancel.clone()));

        cancel.cancel();
        handle.await.unwrap();
    }
}
