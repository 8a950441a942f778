//! Per-mission publish/subscribe event distribution.

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use legion_protocol::{EventMsg, EventSink, MissionId};
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::BroadcastStream;

/// Boxed stream of mission events.
pub type EventStream = BoxStream<'static, EventMsg>;

/// Fan-out of mission events to any number of live subscribers.
///
/// Each subscriber gets a bounded buffer; when it falls behind, its oldest
/// events are dropped and counted in [`MissionSubscription::lagged`]. Publishing
/// never waits on subscribers.
pub struct EventBus {
    channels: RwLock<HashMap<MissionId, broadcast::Sender<EventMsg>>>,
    buffer: usize,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Open the channel for a mission; a no-op when already open.
    pub fn open(&self, mission_id: MissionId) {
        self.channels
            .write()
            .entry(mission_id)
            .or_insert_with(|| broadcast::channel(self.buffer).0);
    }

    /// Deliver an event to the mission's current subscribers.
    pub fn publish(&self, event: EventMsg) {
        let sender = self.channels.read().get(&event.mission_id).cloned();
        match sender {
            Some(sender) => {
                let receivers = sender.send(event).unwrap_or(0);
                debug!("published event (receivers={})", receivers);
            }
            None => debug!(
                "dropping event for closed mission (mission_id={}, seq={})",
                event.mission_id, event.seq
            ),
        }
    }

    /// Subscribe to events published from now on.
    ///
    /// A mission that is closed or unknown yields a subscription that has
    /// already ended; read the store snapshot for its history.
    pub fn subscribe(&self, mission_id: MissionId) -> MissionSubscription {
        let receiver = self
            .channels
            .read()
            .get(&mission_id)
            .map(|sender| sender.subscribe());
        MissionSubscription {
            mission_id,
            receiver,
            lagged: 0,
        }
    }

    /// Close a mission channel; subscribers drain what is buffered, then end.
    pub fn close(&self, mission_id: MissionId) {
        if self.channels.write().remove(&mission_id).is_some() {
            debug!("closed mission channel (mission_id={})", mission_id);
        }
    }

    pub fn subscriber_count(&self, mission_id: MissionId) -> usize {
        self.channels
            .read()
            .get(&mission_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: EventMsg) {
        self.publish(event);
    }
}

/// A live subscription to one mission's events.
pub struct MissionSubscription {
    mission_id: MissionId,
    receiver: Option<broadcast::Receiver<EventMsg>>,
    lagged: u64,
}

impl MissionSubscription {
    pub fn mission_id(&self) -> MissionId {
        self.mission_id
    }

    /// Wait for the next event; `None` once the mission stream has ended
    /// or the subscription was dropped.
    pub async fn recv(&mut self) -> Option<EventMsg> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<EventMsg> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Events dropped because this subscriber fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Stop receiving. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            debug!("unsubscribed (mission_id={})", self.mission_id);
        }
    }

    /// Convert into a stream; lagged gaps are skipped.
    pub fn into_stream(self) -> EventStream {
        let mission_id = self.mission_id;
        match self.receiver {
            Some(receiver) => BroadcastStream::new(receiver)
                .filter_map(move |item| async move {
                    match item {
                        Ok(event) => Some(event),
                        Err(err) => {
                            warn!("subscriber lagged (mission_id={}, error={})", mission_id, err);
                            None
                        }
                    }
                })
                .boxed(),
            None => stream::empty().boxed(),
        }
    }

    fn record_lag(&mut self, skipped: u64) {
        warn!(
            "subscriber lagged (mission_id={}, skipped={})",
            self.mission_id, skipped
        );
        self.lagged += skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use legion_protocol::EventPayload;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn event(mission_id: MissionId, seq: u64) -> EventMsg {
        EventMsg {
            id: Uuid::new_v4(),
            mission_id,
            seq,
            created_at: Utc::now(),
            payload: EventPayload::AnalysisReady {
                insight_count: seq as usize,
            },
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_publish_order() {
        let bus = EventBus::new(16);
        let mission_id = Uuid::new_v4();
        bus.open(mission_id);
        let mut first = bus.subscribe(mission_id);
        let mut second = bus.subscribe(mission_id);
        for seq in 1..=3 {
            bus.publish(event(mission_id, seq));
        }
        for subscription in [&mut first, &mut second] {
            let mut seqs = Vec::new();
            while let Some(event) = subscription.try_recv() {
                seqs.push(event.seq);
            }
            assert_eq!(seqs, vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_without_blocking() {
        let bus = EventBus::new(2);
        let mission_id = Uuid::new_v4();
        bus.open(mission_id);
        let mut slow = bus.subscribe(mission_id);
        for seq in 1..=5 {
            bus.publish(event(mission_id, seq));
        }
        let first = slow.recv().await.expect("event");
        assert_eq!(first.seq, 4);
        assert_eq!(slow.lagged(), 3);
    }

    #[tokio::test]
    async fn close_ends_subscriptions_after_draining() {
        let bus = EventBus::new(8);
        let mission_id = Uuid::new_v4();
        bus.open(mission_id);
        let mut subscription = bus.subscribe(mission_id);
        bus.publish(event(mission_id, 1));
        bus.close(mission_id);
        assert_eq!(subscription.recv().await.map(|event| event.seq), Some(1));
        assert_eq!(subscription.recv().await, None);
        assert_eq!(bus.subscribe(mission_id).is_active(), false);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new(8);
        let mission_id = Uuid::new_v4();
        bus.open(mission_id);
        let mut subscription = bus.subscribe(mission_id);
        assert_eq!(bus.subscriber_count(mission_id), 1);
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(bus.subscriber_count(mission_id), 0);
        bus.publish(event(mission_id, 1));
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn stream_yields_published_events() {
        let bus = EventBus::new(8);
        let mission_id = Uuid::new_v4();
        bus.open(mission_id);
        let stream = bus.subscribe(mission_id).into_stream();
        bus.publish(event(mission_id, 1));
        bus.publish(event(mission_id, 2));
        bus.close(mission_id);
        let seqs: Vec<u64> = stream.map(|event| event.seq).collect().await;
        assert_eq!(seqs, vec![1, 2]);
    }
}
