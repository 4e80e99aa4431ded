use crate::config::TelemetryConfig;
use std::fmt;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
pub enum TelemetryError {
    Filter { value: String, source: ParseError },
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::Filter { value, .. } => write!(f, "invalid log filter '{value}'"),
            TelemetryError::Subscriber(err) => write!(f, "tracing subscriber error: {err}"),
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::Filter { source, .. } => Some(source),
            TelemetryError::Subscriber(err) => Some(&**err),
        }
    }
}

/// Install the global subscriber. A non-empty `RUST_LOG` takes precedence over
/// `APP_LOG_LEVEL`.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(rust_log.as_deref(), &config.log_level)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(TelemetryError::Subscriber)?;

    tracing::debug!(log_level = %config.log_level, "telemetry initialised");
    Ok(())
}

/// Pick the directives to run with. An explicit override must parse; it never silently falls
/// back to the configured level.
pub(crate) fn build_filter(
    override_directives: Option<&str>,
    configured: &str,
) -> Result<EnvFilter, TelemetryError> {
    let directives = override_directives
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(configured);

    EnvFilter::try_new(directives).map_err(|source| TelemetryError::Filter {
        value: directives.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn configured_level_applies_without_override() {
        let filter = build_filter(None, "warn").expect("valid level");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));

        let blank = build_filter(Some("  "), "debug").expect("blank override ignored");
        assert_eq!(blank.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn override_wins_over_configured_level() {
        let filter = build_filter(Some("mortgage_router=trace"), "info").expect("valid");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn malformed_directives_are_reported() {
        let err = build_filter(Some("mortgage_router=loud"), "info").expect_err("rejected");
        assert_eq!(err.to_string(), "invalid log filter 'mortgage_router=loud'");
    }
}
