use legion_core::MissionSubscription;
use legion_protocol::{EventMsg, EventPayload, Phase};
use std::time::Duration;

/// Drain a subscription until its mission stream ends or `timeout` elapses.
pub async fn drain_events(subscription: &mut MissionSubscription, timeout: Duration) -> Vec<EventMsg> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Some(event) = subscription.recv().await {
            events.push(event);
        }
    })
    .await;
    events
}

/// Phases entered, in the order the events announced them.
pub fn phase_trail(events: &[EventMsg]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

/// Wire names of the event payloads, in order.
pub fn event_names(events: &[EventMsg]) -> Vec<&'static str> {
    events.iter().map(|event| event.payload.kind()).collect()
}
