//! In-process event fan-out.
//!
//! Successful dispatches, workflow triggers, and `emit` side effects publish
//! here. Delivery is best-effort: with no subscribers the event is dropped,
//! and a subscriber that falls more than the channel capacity behind loses
//! the oldest events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn new(event_type: impl Into<String>, tenant_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            tenant_id: tenant_id.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `event`. Returns the number of subscribers reached.
    pub fn emit(&self, event: Event) -> usize {
        let event_type = event.event_type.clone();
        match self.sender.send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(event = %event_type, "event dropped, no subscribers");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        assert_eq!(bus.emit(Event::new("task.create", "t1", json!({}))), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(Event::new("a", "t1", json!(1)));
        bus.emit(Event::new("b", "t1", json!(2)));
        assert_eq!(rx.recv().await.unwrap().event_type, "a");
        assert_eq!(rx.recv().await.unwrap().event_type, "b");
    }

    #[test]
    fn serializes_with_type_key() {
        let event = Event::new("task.transition", "t1", json!({"to": "done"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("task.transition"));
        assert_eq!(value["tenantId"], json!("t1"));
    }
}
