// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::ConfigError;
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено по умолчанию

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    // ВАЖНО: Эта настройка работает только в debug режиме!
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    // В продакшене эта константа не может быть изменена
    pub const ENABLE_LOGGING: bool = false;
}

pub const RELAY_URL_ENV: &str = "STRANGERS_RELAY_URL";
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:5000";

/// Время жизни индикатора "собеседник печатает"
pub const TYPING_TTL: Duration = Duration::from_secs(2);

/// Минимальный интервал между исходящими `typing`
pub const TYPING_COOLDOWN: Duration = Duration::from_secs(2);

/// Время показа реакции
pub const REACTION_TTL: Duration = Duration::from_secs(3);

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub relay_url: String,
    pub ice_servers: Vec<ServerConfig>,
    #[serde(with = "secs")]
    pub negotiation_timeout: Duration,
    #[serde(with = "secs")]
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub logging_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.into(),
            ice_servers: default_ice_servers(),
            negotiation_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            logging_enabled: LOGGING_ENABLED,
        }
    }
}

impl Config {
    /// Дефолты → файл → переменные окружения → валидация
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => Config::default(),
        };

        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            if !url.trim().is_empty() {
                config.relay_url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.relay_url).map_err(|source| ConfigError::InvalidRelayUrl {
            url: self.relay_url.clone(),
            source,
        })?;

        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::EmptyIceUrl(server.id.clone()));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::TurnWithoutCredentials(server.id.clone()));
            }
        }
        Ok(())
    }
}

/// Дефолтные STUN серверы в формате ServerConfig
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
