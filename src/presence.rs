//! Счётчик активных участников, зеркалируемый с relay.

use crate::signaling::events::{RelayEvent, PRESENCE_COUNT};
use crate::signaling::{SignalingChannel, Subscription};
use once_cell::sync::Lazy;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Общий для процесса счётчик
static GLOBAL: Lazy<PresenceCounter> = Lazy::new(PresenceCounter::new);

/// Только для чтения со стороны клиента: значение меняется лишь событиями relay.
#[derive(Clone)]
pub struct PresenceCounter {
    tx: watch::Sender<u32>,
}

impl PresenceCounter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    pub fn global() -> &'static PresenceCounter {
        &GLOBAL
    }

    pub fn count(&self) -> u32 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.tx.subscribe()
    }

    /// Подписывает счётчик на `presence-count`; отписка при drop подписки
    pub fn attach(&self, channel: &SignalingChannel) -> Subscription {
        let tx = self.tx.clone();
        channel.on(PRESENCE_COUNT, move |data| {
            match RelayEvent::parse(PRESENCE_COUNT, data) {
                Ok(RelayEvent::Presence(p)) => {
                    debug!(count = p.count, "presence updated");
                    tx.send_replace(p.count);
                }
                Ok(_) => {}
                Err(e) => warn!("malformed presence-count payload: {}", e),
            }
        })
    }
}

impl Default for PresenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRelay;
    use serde_json::json;

    #[tokio::test]
    async fn mirrors_relay_count() {
        let relay = ScriptedRelay::new();
        let channel = relay.connected_channel().await;
        let presence = PresenceCounter::new();
        let mut rx = presence.subscribe();
        let _sub = presence.attach(&channel);

        relay.push(PRESENCE_COUNT, json!({ "count": 42 }));
        rx.changed().await.unwrap();
        assert_eq!(presence.count(), 42);
    }

    #[tokio::test]
    async fn malformed_payload_keeps_previous_value() {
        let relay = ScriptedRelay::new();
        let channel = relay.connected_channel().await;
        let presence = PresenceCounter::new();
        let mut rx = presence.subscribe();
        let _sub = presence.attach(&channel);

        relay.push(PRESENCE_COUNT, json!({ "count": 3 }));
        rx.changed().await.unwrap();
        relay.push(PRESENCE_COUNT, json!({ "count": "many" }));
        relay.push(PRESENCE_COUNT, json!({ "count": 4 }));
        rx.changed().await.unwrap();
        assert_eq!(presence.count(), 4);
    }

    #[tokio::test]
    async fn detached_counter_stops_updating() {
        let relay = ScriptedRelay::new();
        let channel = relay.connected_channel().await;
        let presence = PresenceCounter::new();
        let sub = presence.attach(&channel);
        drop(sub);

        relay.push(PRESENCE_COUNT, json!({ "count": 9 }));
        relay.flush(&channel).await;
        assert_eq!(presence.count(), 0);
    }
}
