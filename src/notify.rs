use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Change feed per professional. Persistence collaborators subscribe and
/// write what they receive.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to one professional's events. Creates the channel if needed.
    pub fn subscribe(&self, professional_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(professional_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, professional_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&professional_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn remove(&self, professional_id: &Ulid) {
        self.channels.remove(professional_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        let mut rx = hub.subscribe(pid);

        let event = Event::RotationAdvanced {
            service_id: Ulid::new(),
            professional_id: pid,
        };
        hub.send(pid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        // No subscriber, must not panic
        hub.send(
            pid,
            &Event::BlockRemoved {
                id: Ulid::new(),
                scope: crate::model::BlockScope::Professional(pid),
            },
        );
    }

    #[tokio::test]
    async fn removed_channel_stops_delivery() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        let mut rx = hub.subscribe(pid);
        hub.remove(&pid);
        hub.send(
            pid,
            &Event::RotationAdvanced {
                service_id: Ulid::new(),
                professional_id: pid,
            },
        );
        assert!(rx.try_recv().is_err());
    }
}
