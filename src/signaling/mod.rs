//! Канал сигналинга к relay-серверу.
//!
//! Один живой транспорт на канал: `connect` всегда заменяет предыдущий.
//! Подписчики получают события в порядке прихода; `Subscription` снимает
//! обработчик при drop.

pub mod events;
pub mod memory;
pub mod ws;

use crate::config::Config;
use crate::error::SignalingError;
use async_trait::async_trait;
use events::{RelayFrame, CONNECT, DISCONNECT};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub use memory::{MemoryConnector, RelayEnd};
pub use ws::WsConnector;

/// Открытый транспорт: исходящие и входящие кадры
pub struct RelayLink {
    pub outbound: mpsc::UnboundedSender<RelayFrame>,
    pub inbound: mpsc::UnboundedReceiver<RelayFrame>,
}

/// Фабрика транспортов к relay
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self) -> Result<RelayLink, SignalingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl From<&Config> for ChannelConfig {
    fn from(config: &Config) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Inner {
    handlers: HashMap<String, Vec<(u64, Handler)>>,
    next_handler: u64,
    outbound: Option<mpsc::UnboundedSender<RelayFrame>>,
    pump: Option<JoinHandle<()>>,
    // поколение транспорта: всё, что относится к старому, игнорируется
    generation: u64,
    closed: bool,
}

#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<Mutex<Inner>>,
    connector: Arc<dyn RelayConnector>,
    config: ChannelConfig,
}

impl SignalingChannel {
    pub fn new(connector: Arc<dyn RelayConnector>, config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                handlers: HashMap::new(),
                next_handler: 0,
                outbound: None,
                pump: None,
                generation: 0,
                closed: false,
            })),
            connector,
            config,
        }
    }

    /// Канал поверх WebSocket по `relay_url` из конфигурации
    pub fn websocket(config: &Config) -> Self {
        Self::new(
            Arc::new(WsConnector::new(config.relay_url.clone())),
            ChannelConfig::from(config),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Открывает транспорт, заменяя предыдущий (если был)
    pub async fn connect(&self) -> Result<(), SignalingError> {
        let link = self.connector.open().await?;

        let (generation, replaced_live) = {
            let mut inner = self.lock();
            if let Some(old) = inner.pump.take() {
                debug!("replacing previous relay transport");
                old.abort();
            }
            inner.generation += 1;
            let replaced_live = inner.outbound.replace(link.outbound).is_some();
            inner.closed = false;
            (inner.generation, replaced_live)
        };

        // пары, собранные на старом транспорте, мертвы: подписчики должны узнать о разрыве
        if replaced_live {
            warn!(generation, "live relay transport replaced");
            self.dispatch(DISCONNECT, &Value::Null);
        }
        info!(generation, "relay transport connected");
        self.dispatch(CONNECT, &Value::Null);

        let pump = self.spawn_pump(generation, link.inbound);
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.pump = Some(pump);
        } else {
            pump.abort();
        }
        Ok(())
    }

    /// Закрывает транспорт без переподключения
    pub fn disconnect(&self) {
        let was_connected = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.closed = true;
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            inner.outbound.take().is_some()
        };
        if was_connected {
            info!("relay transport closed");
            self.dispatch(DISCONNECT, &Value::Null);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().outbound.is_some()
    }

    pub fn emit<T: Serialize + ?Sized>(
        &self,
        event: &str,
        payload: &T,
    ) -> Result<(), SignalingError> {
        let data = serde_json::to_value(payload)?;
        self.send(RelayFrame::new(event, data))
    }

    /// Событие без полезной нагрузки
    pub fn emit_empty(&self, event: &str) -> Result<(), SignalingError> {
        self.send(RelayFrame::new(event, Value::Null))
    }

    fn send(&self, frame: RelayFrame) -> Result<(), SignalingError> {
        let tx = self.lock().outbound.clone().ok_or(SignalingError::NotConnected)?;
        debug!(event = %frame.event, "emit");
        tx.send(frame).map_err(|_| SignalingError::NotConnected)
    }

    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_handler += 1;
        let id = inner.next_handler;
        inner
            .handlers
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    /// Число живых обработчиков (для проверки утечек подписок)
    pub fn handler_count(&self) -> usize {
        self.lock().handlers.values().map(Vec::len).sum()
    }

    fn dispatch(&self, event: &str, data: &Value) {
        let handlers: Vec<Handler> = self
            .lock()
            .handlers
            .get(event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(event, "no subscribers for relay event");
        }
        for handler in handlers {
            handler(data);
        }
    }

    fn spawn_pump(
        &self,
        generation: u64,
        inbound: mpsc::UnboundedReceiver<RelayFrame>,
    ) -> JoinHandle<()> {
        let channel = self.clone();
        let fut: Pin<Box<dyn Future<Output = ()> + Send>> =
            Box::pin(async move { channel.pump(generation, inbound).await });
        tokio::spawn(fut)
    }

    async fn pump(self, generation: u64, mut inbound: mpsc::UnboundedReceiver<RelayFrame>) {
        while let Some(frame) = inbound.recv().await {
            self.dispatch(&frame.event, &frame.data);
        }

        let current = {
            let mut inner = self.lock();
            if inner.generation == generation && !inner.closed {
                inner.outbound = None;
                // задача больше не отменяется через handle: она сама уходит в переподключение
                inner.pump.take();
                true
            } else {
                false
            }
        };
        if !current {
            return;
        }

        warn!(generation, "relay transport lost");
        self.dispatch(DISCONNECT, &Value::Null);
        self.reconnect(generation).await;
    }

    async fn reconnect(&self, generation: u64) {
        for attempt in 1..=self.config.max_reconnect_attempts {
            sleep(self.config.reconnect_delay).await;
            {
                let inner = self.lock();
                if inner.closed || inner.generation != generation {
                    return;
                }
            }
            match self.connect().await {
                Ok(()) => return,
                Err(e) => warn!(attempt, "relay reconnect failed: {}", e),
            }
        }
        error!(
            attempts = self.config.max_reconnect_attempts,
            "giving up on relay reconnect"
        );
    }
}

/// Подписка на событие; обработчик снимается при drop
pub struct Subscription {
    inner: Weak<Mutex<Inner>>,
    event: String,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = inner.handlers.get_mut(&self.event) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                inner.handlers.remove(&self.event);
            }
        }
    }
}
