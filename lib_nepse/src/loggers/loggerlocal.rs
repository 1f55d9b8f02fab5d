use chrono::Local;
use glob::{glob, Pattern};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Cannot create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown log level: {0}")]
    UnknownLevel(String),

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// # Logger Local Options
///
/// Where and how log events are written.
pub struct LoggerLocalOptions {
    /// Print events to the TTY (stderr).
    pub use_tty: bool,
    /// Write events to `{app_name}-{YYYYmmdd_HHMMSS}.log` in `log_dir`.
    pub use_file: bool,
    /// Format events as JSON lines instead of text.
    pub json: bool,
    /// Minimum level, by name (`silly` .. `fatal`) or number (0 .. 6).
    /// `RUST_LOG`, when set, takes precedence.
    pub level: String,
    /// The directory for log files. If `None`, defaults to `./logs`.
    pub log_dir: Option<PathBuf>,
    /// How many log files of this application to keep, the new one included.
    pub keep_files: usize,
}

impl Default for LoggerLocalOptions {
    fn default() -> Self {
        Self {
            use_tty: true,
            use_file: false,
            json: false,
            level: "info".to_string(),
            log_dir: None,
            keep_files: 5,
        }
    }
}

/// Maps the level vocabulary (0 silly, 1 trace, 2 debug, 3 info, 4 warn,
/// 5 error, 6 fatal) onto tracing level filters.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggerError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "0" | "silly" | "1" | "trace" => Ok(LevelFilter::TRACE),
        "2" | "debug" => Ok(LevelFilter::DEBUG),
        "3" | "info" => Ok(LevelFilter::INFO),
        "4" | "warn" | "warning" => Ok(LevelFilter::WARN),
        "5" | "error" | "6" | "fatal" => Ok(LevelFilter::ERROR),
        "off" => Ok(LevelFilter::OFF),
        _ => Err(LoggerError::UnknownLevel(level.to_string())),
    }
}

/// Rotates log files for a given application and log directory.
///
/// Keeps the `keep` newest files (by the timestamp in the file name) and
/// deletes the rest. Returns how many files were removed.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> usize {
    let pattern = format!(
        "{}/{}-*.log",
        Pattern::escape(&log_dir.display().to_string()),
        Pattern::escape(app_name)
    );
    let mut log_files: Vec<PathBuf> = match glob(&pattern) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).collect(),
        Err(e) => {
            eprintln!("Invalid glob pattern for log rotation {pattern}: {e}");
            return 0;
        }
    };

    // Newest first.
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old_file in log_files.iter().skip(keep) {
        match std::fs::remove_file(old_file) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    removed
}

/// Installs the global tracing subscriber for a binary.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the lifetime of the program or buffered events are lost.
pub fn init_logging(
    app_name: &str,
    options: LoggerLocalOptions,
) -> Result<Option<WorkerGuard>, LoggerError> {
    let level = parse_level(&options.level)?;
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::builder()
            .with_default_directive(level.into())
            .parse("")
            .map_err(|e| LoggerError::Filter(e.to_string()))?,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guard = None;

    if options.use_tty {
        let tty = fmt::layer().with_target(true).with_writer(std::io::stderr);
        layers.push(if options.json { tty.json().boxed() } else { tty.boxed() });
    }

    if options.use_file {
        let log_dir = options.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
        std::fs::create_dir_all(&log_dir).map_err(|source| LoggerError::LogDir {
            path: log_dir.clone(),
            source,
        })?;
        rotate_logs(app_name, &log_dir, options.keep_files.saturating_sub(1));

        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let file_name = format!("{app_name}-{timestamp}.log");
        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, file_name));
        guard = Some(file_guard);

        let file = fmt::layer().with_ansi(false).with_writer(writer);
        layers.push(if options.json { file.json().boxed() } else { file.boxed() });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(app = app_name, level = %level, "Logging initialized");
    Ok(guard)
}
