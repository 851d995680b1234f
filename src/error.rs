use thiserror::Error;

/// Ошибки захвата локального аудио/видео
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("camera or microphone permission denied")]
    PermissionDenied,

    #[error("capture device unavailable: {0}")]
    Unavailable(String),

    #[error("local media already stopped")]
    Stopped,
}

/// Ошибки установки и согласования peer connection
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("webrtc: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("peer connection has no local description")]
    MissingLocalDescription,

    #[error("negotiation timed out")]
    Timeout,

    #[error("peer connection already closed")]
    Closed,
}

/// Ошибки канала сигналинга
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("relay transport is not connected")]
    NotConnected,

    #[error("failed to connect to relay: {0}")]
    Connect(String),

    #[error("failed to encode relay frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("malformed payload for `{event}`: {source}")]
    Decode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown relay event `{0}`")]
    UnknownEvent(String),
}

/// Ошибки, которые видит слой представления
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("session is not paired with a partner")]
    NotConnected,

    #[error("session has been unmounted")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid relay url `{url}`: {source}")]
    InvalidRelayUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("ICE server `{0}` has an empty url")]
    EmptyIceUrl(String),

    #[error("TURN server `{0}` requires username and credential")]
    TurnWithoutCredentials(String),
}
