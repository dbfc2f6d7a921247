//! Logging setup: tracing-subscriber with a console layer on stderr and an
//! optional daily-rotated file.
//!
//! stdout carries command output (JSON lines, responses), so nothing here
//! ever writes to it. `RUST_LOG` replaces the base level when set.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Dependencies that are only interesting when they fail
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "reqwest", "tokio_tungstenite", "tungstenite"];

const DEFAULT_FILE_NAME: &str = "bili2text-client.log";

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer flushing; drop it last
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber for a long-running command
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);

    let (file_layer, file_guard) = match settings.file.as_deref().filter(|f| !f.is_empty()) {
        Some(log_file) => {
            let (writer, guard) = rolling_writer(log_file, settings.max_files)?;
            (Some(format_layer(writer, settings.json_format, Target::File)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(level)?)
        .with(format_layer(std::io::stderr, settings.json_format, Target::Console))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(
        level = %level,
        file = ?settings.file,
        json = settings.json_format,
        "Logging initialized"
    );

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

/// Console-only logging for short-lived commands such as `config`
pub fn init_simple(level: Level) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(format_layer(std::io::stderr, false, Target::Console))
        .try_init()
        .map_err(|e| Error::Logging(format!("Failed to initialize logging: {}", e)))
}

/// `--quiet` beats `-v`, which beats the configured level
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::from_str(&settings.level).unwrap_or(Level::INFO),
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let base = level.to_string().to_lowercase();
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&base))
        .add_directive(directive(&format!("bili2text_client={}", base))?);

    for dependency in QUIET_DEPENDENCIES {
        filter = filter.add_directive(directive(&format!("{}=warn", dependency))?);
    }
    Ok(filter)
}

fn directive(s: &str) -> Result<Directive> {
    s.parse()
        .map_err(|e| Error::Logging(format!("Invalid log directive '{}': {}", s, e)))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Target {
    Console,
    File,
}

/// Text or JSON formatting for one destination. Files get targets, thread
/// ids and no colors; the console stays compact.
fn format_layer<S, W>(writer: W, json: bool, target: Target) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let to_file = target == Target::File;

    if json {
        return Box::new(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE),
        );
    }

    if to_file {
        Box::new(
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false),
        )
    } else {
        Box::new(fmt::layer().with_writer(writer).with_target(false).compact())
    }
}

/// Non-blocking writer over a daily-rotated file, creating its directory
fn rolling_writer(
    log_file: &str,
    max_files: u32,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let path = Path::new(log_file);
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(directory).map_err(|e| Error::WriteFile {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_FILE_NAME);

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(max_files.max(1) as usize)
        .build(directory)
        .map_err(|e| Error::Logging(format!("Failed to create log file appender: {}", e)))?;

    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(level: &str) -> LoggingSettings {
        LoggingSettings {
            level: level.to_string(),
            ..LoggingSettings::default()
        }
    }

    #[test]
    fn test_effective_level() {
        assert_eq!(effective_level(&settings("info"), 0, false), Level::INFO);
        assert_eq!(effective_level(&settings("WARN"), 0, false), Level::WARN);
        assert_eq!(effective_level(&settings("nonsense"), 0, false), Level::INFO);
        assert_eq!(effective_level(&settings("error"), 1, false), Level::DEBUG);
        assert_eq!(effective_level(&settings("info"), 4, false), Level::TRACE);
    }

    #[test]
    fn test_quiet_wins() {
        assert_eq!(effective_level(&settings("trace"), 2, true), Level::ERROR);
    }

    #[test]
    fn test_env_filter_builds_for_every_level() {
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            assert!(env_filter(level).is_ok());
        }
    }

    #[test]
    fn test_rolling_writer_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("nested").join("logs").join("client.log");

        let result = rolling_writer(&log_path.to_string_lossy(), 3);

        assert!(result.is_ok());
        assert!(temp_dir.path().join("nested").join("logs").is_dir());
    }
}
