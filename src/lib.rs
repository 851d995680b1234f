//! Ядро анонимного видео- и текстового чата один на один: сессии, сигналинг
//! через relay, локальные медиа, индикаторы и счётчик присутствия.

pub mod config;
pub mod ephemeral;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{ConfigError, MediaError, NegotiationError, SessionError, SignalingError};
pub use media::{MediaConstraints, MediaLease, MediaSource};
pub use peer::WebRtcConnector;
pub use presence::PresenceCounter;
pub use session::{
    CallSession, CallSnapshot, CallState, Reaction, SessionContext, SessionMode, TextSession,
    TextSnapshot, TextState,
};
pub use signaling::SignalingChannel;
