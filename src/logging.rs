use std::io;

use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "BUNDLE_IMPORT_LOG";
pub const LOG_FORMAT_ENV: &str = "BUNDLE_IMPORT_LOG_FORMAT";
pub const DEFAULT_FILTER: &str = "bundle_import=info,sqlx=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

fn filter_directives(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Installs the global subscriber. Events go to stderr so stdout stays free
/// for command output. Calling this more than once is harmless.
pub fn init_logging() {
    let filter = EnvFilter::new(filter_directives(std::env::var(LOG_ENV).ok()));
    let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());

    let installed = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
    };
    if installed.is_ok() {
        // `log` records from dependencies go through the same subscriber.
        let _ = tracing_log::LogTracer::init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_text() {
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Text);
        assert_eq!(LogFormat::from_env_value(Some("pretty")), LogFormat::Text);
        assert_eq!(LogFormat::from_env_value(Some(" JSON ")), LogFormat::Json);
    }

    #[test]
    fn blank_filter_falls_back_to_default() {
        assert_eq!(filter_directives(None), DEFAULT_FILTER);
        assert_eq!(filter_directives(Some("  ".into())), DEFAULT_FILTER);
        assert_eq!(filter_directives(Some("debug".into())), "debug");
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging();
        init_logging();
        tracing::info!(target: "bundle_import", event = "logging_test");
    }
}
