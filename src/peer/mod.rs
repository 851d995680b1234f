//! Абстракция peer connection: контроллер звонка работает только через эти трейты,
//! реализация на webrtc-rs лежит в `connection`.

pub mod connection;
pub mod ice;
pub mod types;

use crate::error::NegotiationError;
use crate::media::LocalStream;
use async_trait::async_trait;
use std::sync::Arc;

pub use connection::WebRtcConnector;
pub use types::{NegotiationPayload, RemoteTrack, SdpKind, ServerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// сами создаём offer
    Initiator,
    /// отвечаем на входящий offer
    Responder,
}

/// Событие от peer connection, пришедшее вне вызовов `PeerLink`; после `close` их нет
#[derive(Debug, Clone)]
pub enum PeerSignal {
    RemoteTrack(RemoteTrack),
    Failed(String),
}

type Deliver = Arc<dyn Fn(u64, PeerSignal) + Send + Sync>;

/// Куда peer connection отправляет свои события; помечены поколением соединения,
/// чтобы события уже закрытого соединения можно было отбросить
#[derive(Clone)]
pub struct PeerEventSink {
    generation: u64,
    deliver: Deliver,
}

impl PeerEventSink {
    pub fn new<F>(generation: u64, deliver: F) -> Self
    where
        F: Fn(u64, PeerSignal) + Send + Sync + 'static,
    {
        Self {
            generation,
            deliver: Arc::new(deliver),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, signal: PeerSignal) {
        (self.deliver)(self.generation, signal);
    }
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(
        &self,
        role: PeerRole,
        media: Option<Arc<LocalStream>>,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, NegotiationError>;
}

/// Одно peer connection. Закрывается явно через `close`.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn create_offer(&self) -> Result<NegotiationPayload, NegotiationError>;

    /// Применяет удалённый offer и возвращает готовый answer
    async fn accept_offer(
        &self,
        offer: NegotiationPayload,
    ) -> Result<NegotiationPayload, NegotiationError>;

    async fn apply_answer(&self, answer: NegotiationPayload) -> Result<(), NegotiationError>;

    async fn close(&self);
}
