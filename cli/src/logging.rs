//! Tracing / logging initialisation.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// "trace" | "debug" | "info" | "warn" | "error", or a full filter
    /// directive such as "info,chainpubsub_ws=debug".
    pub level: String,
    /// Emit JSON structured logs instead of human-readable text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// `RUST_LOG` wins over the configured level when set.
fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &LogConfig) {
    let filter = build_filter(config);

    // Logs go to stderr so command output on stdout stays pipeable.
    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_info_text() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
    }

    #[test]
    fn directives_are_accepted() {
        let config = LogConfig {
            level: "warn,chainpubsub_ws=debug".into(),
            json: false,
        };
        // Only checks that construction does not panic on a directive list.
        let _ = build_filter(&config);
    }
}
