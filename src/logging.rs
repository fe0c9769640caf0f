//! Runtime log initialisation.
//!
//! `RUST_LOG` wins when set. Otherwise the config's `logLevel` is used, falling back to
//! `info`. `LOG_FORMAT=json` switches to one JSON object per line.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer as _};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// Unknown values fall back to [`LogFormat::Pretty`] with a warning on stderr.
    pub fn parse(s: &str) -> Self {
        match s {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            other => {
                eprintln!("WARNING: unknown LOG_FORMAT={other:?}, falling back to pretty");
                Self::Pretty
            }
        }
    }

    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(val) => Self::parse(&val),
            Err(_) => Self::default(),
        }
    }
}

/// Directive used when `RUST_LOG` is unset.
pub fn default_directive(log_level: Option<&str>) -> String {
    match log_level.map(str::trim).filter(|l| !l.is_empty()) {
        Some(level) => level.to_lowercase(),
        None => "info".to_string(),
    }
}

/// Installs the global subscriber. A second call is ignored, so tests can call it freely.
pub fn init_tracing(log_level: Option<&str>, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    }

    #[test]
    fn unknown_format_falls_back_to_pretty() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
    }

    #[test]
    fn config_level_is_used_when_present() {
        assert_eq!(default_directive(Some("DEBUG")), "debug");
        assert_eq!(default_directive(Some("  ")), "info");
        assert_eq!(default_directive(None), "info");
    }
}
