use crate::config::Config;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Формат временных меток в логах
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Включено ли логирование с учётом сборки и конфигурации
pub fn logging_enabled(config: &Config) -> bool {
    if !config.logging_enabled {
        return false;
    }
    // В режиме разработки дополнительно проверяем dev::ENABLE_LOGGING
    #[cfg(debug_assertions)]
    {
        if !crate::config::dev::ENABLE_LOGGING {
            return false;
        }
    }
    true
}

/// Устанавливает глобальный tracing subscriber; повторный вызов ничего не делает
pub fn init(config: &Config) {
    if !logging_enabled(config) {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false)
        .try_init();
}
