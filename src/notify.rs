use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Notice;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking notices: one feed with everything, plus one feed
/// per resource name.
pub struct NotifyHub {
    all: broadcast::Sender<Notice>,
    channels: DashMap<String, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            channels: DashMap::new(),
        }
    }

    /// Every notice, whatever the resource. This is what the message dispatcher listens to.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notice> {
        self.all.subscribe()
    }

    /// Notices about one resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_name: &str) -> broadcast::Receiver<Notice> {
        self.channels
            .entry(resource_name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, notice: Notice) {
        if let Some(sender) = self.channels.get(notice.resource_name()) {
            let _ = sender.send(notice.clone());
        }
        let _ = self.all.send(notice);
    }

    /// Drop the per-resource channels nobody listens to anymore.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Booking;
    use chrono::{TimeZone, Utc};

    fn taken(resource: &str) -> Notice {
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        Notice::Taken {
            booking: Booking {
                id: 1,
                resource_name: resource.into(),
                email: "a@example.com".into(),
                take_date: at,
                return_date: at,
                created_at: at,
            },
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("stage-1");
        let mut all = hub.subscribe_all();

        hub.send(taken("stage-1"));

        assert_eq!(rx.recv().await.unwrap(), taken("stage-1"));
        assert_eq!(all.recv().await.unwrap(), taken("stage-1"));
    }

    #[tokio::test]
    async fn resource_feed_ignores_other_resources() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("stage-1");
        hub.send(taken("stage-2"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(taken("stage-1"));
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe("stage-1");
        let _kept = hub.subscribe("stage-2");
        drop(rx);
        hub.prune();
        assert_eq!(hub.channels.len(), 1);
        assert!(hub.channels.contains_key("stage-2"));
    }
}
