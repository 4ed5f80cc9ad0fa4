use stagehand_core::unit::{UnitEvent, UnitPhase};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Fan-out of unit transitions to any number of subscribers (status API,
/// CLI, tests). Every published event is also emitted as a tracing event.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UnitEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UnitEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: UnitEvent) {
        let detail = event.detail.as_deref().unwrap_or("");
        match event.phase {
            UnitPhase::Failed | UnitPhase::Skipped => {
                warn!(unit = %event.unit, phase = %event.phase, detail, "unit transition")
            }
            _ => info!(unit = %event.unit, phase = %event.phase, detail, "unit transition"),
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(UnitEvent::new("db", UnitPhase::Starting, None));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.unit, "db");
        assert_eq!(ev.phase, UnitPhase::Starting);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        EventBus::new(1).publish(UnitEvent::new("db", UnitPhase::Queued, None));
    }
}
