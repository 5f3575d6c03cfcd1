//! Process logging: stdout plus an optional daily-rolling file.
//!
//! `RUST_LOG` overrides the default directives, which log the launcher at the
//! configured level and keep the cluster and HTTP clients at `warn`.

use std::path::Path;

use tracing::{Level, Subscriber};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    fmt::{time::ChronoUtc, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const LOG_FILE_NAME: &str = "workload-launcher";
const QUIET_TARGETS: [&str; 3] = ["kube", "hyper", "reqwest"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub json_format: bool,
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            log_dir: None,
        }
    }
}

/// Keeps the file writer thread alive; drop it last.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Parse a level name; unknown names fall back to INFO.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn default_directives(level: Level) -> String {
    let level = match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    };
    let mut directives = format!("workload_launcher={}", level);
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{}=warn", target));
    }
    directives
}

fn format_layer<S, W>(writer: W, json: bool, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()));
    if json {
        layer.json().flatten_event(true).boxed()
    } else {
        layer.boxed()
    }
}

fn file_writer(log_dir: &Path) -> std::io::Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)?;
    Ok(RollingFileAppender::new(
        Rotation::DAILY,
        log_dir,
        LOG_FILE_NAME,
    ))
}

pub fn init_logging(config: LoggingConfig) -> LogGuard {
    // Records from crates using `log` go through the same subscriber
    let _ = LogTracer::init();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    let mut layers = vec![format_layer(
        std::io::stdout,
        config.json_format,
        !config.json_format,
    )];

    let mut file_guard = None;
    if let Some(log_dir) = config.log_dir.as_deref() {
        match file_writer(Path::new(log_dir)) {
            Ok(appender) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                file_guard = Some(guard);
                layers.push(format_layer(non_blocking, config.json_format, false));
            }
            Err(e) => eprintln!("Failed to open log directory {}: {}", log_dir, e),
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init();

    LogGuard {
        _file_guard: file_guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }

    #[test]
    fn test_default_directives_quiet_clients() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "workload_launcher=debug,kube=warn,hyper=warn,reqwest=warn"
        );
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");
        assert!(file_writer(&log_dir).is_ok());
        assert!(log_dir.is_dir());
    }
}
