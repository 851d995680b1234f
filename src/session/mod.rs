//! Контроллеры сессий чата. Каждый смонтированный экран чата получает свою
//! сессию: конечный автомат, который крутится в одной задаче и получает все
//! события (relay, пользователь, peer connection, таймеры) через одну очередь.

pub mod call;
pub mod text;

use crate::config::Config;
use crate::presence::PresenceCounter;
use crate::signaling::events::RelayEvent;
use crate::signaling::{SignalingChannel, Subscription};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

pub use call::{CallSession, CallSnapshot, CallState, Reaction};
pub use text::{Author, TextSession, TextSnapshot, TextState, TranscriptEntry};

/// Режим экрана чата
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Video,
    Text,
}

/// Общее окружение сессий одного процесса. Счётчик присутствия подписан на
/// канал, пока жив хотя бы один клон контекста, а не только смонтированная сессия.
#[derive(Clone)]
pub struct SessionContext {
    pub channel: SignalingChannel,
    pub presence: PresenceCounter,
    pub config: Config,
    _presence_feed: Arc<Subscription>,
}

impl SessionContext {
    pub fn new(channel: SignalingChannel, config: Config) -> Self {
        Self::with_presence(channel, PresenceCounter::global().clone(), config)
    }

    pub fn with_presence(
        channel: SignalingChannel,
        presence: PresenceCounter,
        config: Config,
    ) -> Self {
        let _presence_feed = Arc::new(presence.attach(&channel));
        Self {
            channel,
            presence,
            config,
            _presence_feed,
        }
    }
}

/// Подписывает `forward` на перечисленные события; подписки живут, пока жив вектор
pub(crate) fn subscribe_relay<F>(
    channel: &SignalingChannel,
    events: &[&str],
    forward: F,
) -> Vec<Subscription>
where
    F: Fn(RelayEvent) + Clone + Send + Sync + 'static,
{
    events
        .iter()
        .map(|name| {
            let forward = forward.clone();
            let event = name.to_string();
            channel.on(name, move |data| match RelayEvent::parse(&event, data) {
                Ok(parsed) => forward(parsed),
                Err(e) => warn!("dropping relay event: {}", e),
            })
        })
        .collect()
}
