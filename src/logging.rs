//! Logging setup

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the configured level. Returns an error if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> crate::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.as_str().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format.as_str() {
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        other => {
            return Err(crate::Error::Config(format!(
                "unknown logging.format '{}'",
                other
            )))
        }
    };

    result.map_err(|e| crate::Error::Config(format!("logging already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_rejected() {
        let config = LoggingConfig {
            level: "debug".into(),
            format: "xml".into(),
        };
        assert!(matches!(init_logging(&config), Err(crate::Error::Config(_))));
    }
}
