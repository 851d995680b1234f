//! Транспорт внутри процесса: сторона relay получает `RelayEnd` на каждое подключение.

use super::events::RelayFrame;
use super::{RelayConnector, RelayLink};
use crate::error::SignalingError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Конец транспорта со стороны relay
pub struct RelayEnd {
    to_client: mpsc::UnboundedSender<RelayFrame>,
    from_client: mpsc::UnboundedReceiver<RelayFrame>,
}

impl RelayEnd {
    /// Доставляет событие клиенту; `false`, если клиент уже закрыл транспорт
    pub fn send(&self, event: &str, data: Value) -> bool {
        self.to_client.send(RelayFrame::new(event, data)).is_ok()
    }

    /// Следующий кадр от клиента; `None`, когда клиент закрыл исходящую сторону
    pub async fn recv(&mut self) -> Option<RelayFrame> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RelayFrame> {
        self.from_client.try_recv().ok()
    }

    /// Клиент перестал читать этот транспорт
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }

    pub async fn closed(&self) {
        self.to_client.closed().await
    }
}

pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<RelayEnd>,
    refuse: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RelayEnd>) {
        let (accepted, ends) = mpsc::unbounded_channel();
        (
            Self {
                accepted,
                refuse: AtomicBool::new(false),
            },
            ends,
        )
    }

    /// Включает отказ в подключении (имитация недоступного relay)
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl RelayConnector for MemoryConnector {
    async fn open(&self) -> Result<RelayLink, SignalingError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SignalingError::Connect("relay refused connection".into()));
        }
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(RelayEnd {
                to_client,
                from_client,
            })
            .map_err(|_| SignalingError::Connect("in-memory relay is gone".into()))?;
        Ok(RelayLink { outbound, inbound })
    }
}
