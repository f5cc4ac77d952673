// Structured Logging for the Flow Score Engine
// tracing + tracing-subscriber, installed once per process

use tracing::Level;
use tracing_subscriber::EnvFilter;
use std::sync::Once;

use crate::core::config::MonitoringConfig;

static INIT: Once = Once::new();

fn parse_level(log_level: &str) -> Level {
    match log_level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Setup structured logging for the entire application
pub fn setup_logging(
    log_level: Option<&str>,
    json_format: Option<bool>,
    console_output: Option<bool>,
) {
    let log_level_str = log_level.unwrap_or("INFO");
    let json_format = json_format.unwrap_or(false);
    let console_output = console_output.unwrap_or(true);
    let level = parse_level(log_level_str);

    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env().add_directive(level.into());
        // Keep the runtime quiet unless asked
        if let Ok(directive) = "tokio=warn".parse() {
            filter = filter.add_directive(directive);
        }

        // try_init: a host application may already own the global subscriber
        let result = if console_output && json_format {
            tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_env_filter(filter)
                .try_init()
        } else if console_output {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_writer(std::io::sink)
                .with_env_filter(filter)
                .try_init()
        };

        match result {
            Ok(()) => tracing::info!(log_level = %log_level_str, json = json_format, "Logging initialized"),
            Err(e) => tracing::debug!(error = %e, "Global subscriber already installed"),
        }
    });
}

/// Setup logging from the monitoring section of the engine config
pub fn setup_from_config(monitoring: &MonitoringConfig) {
    setup_logging(
        Some(&monitoring.log_level),
        Some(monitoring.json_logs),
        Some(monitoring.console_output),
    );
}

/// Span wrapping everything a pipeline task does for one instrument
pub fn instrument_span(instrument: &str) -> tracing::Span {
    tracing::info_span!(target: "flowscore", "pipeline", instrument = %instrument)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging() {
        setup_logging(Some("DEBUG"), Some(false), Some(true));
        // Second call is a no-op
        setup_from_config(&MonitoringConfig::default());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_instrument_span() {
        let span = instrument_span("BTCUSDT");
        let _enter = span.enter();
        tracing::debug!("inside span");
    }
}
