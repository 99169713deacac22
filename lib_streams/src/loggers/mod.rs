//! # Logging Bootstrap
//!
//! Installs the process-wide `tracing` subscriber: an `EnvFilter` (the
//! configured level unless `RUST_LOG` is set), a console layer (plain or
//! JSON) and, when a directory is given, a non-blocking daily-rolling JSON
//! file layer. Library components never install a subscriber themselves;
//! they log through spans handed to them at construction.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Failed to prepare log directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log filter \"{filter}\": {reason}")]
    Filter { filter: String, reason: String },

    #[error("Invalid log file pattern: {0}")]
    Pattern(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// File name prefix for rolled log files.
    pub app_name: String,
    /// Level or filter directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Directory for rolled files. `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
    /// Emit console output as JSON instead of plain text.
    pub json_console: bool,
    /// Rolled files of this app kept at startup, newest first.
    pub keep_files: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            app_name: "streams".to_string(),
            level: "info".to_string(),
            log_dir: None,
            json_console: false,
            keep_files: 1,
        }
    }
}

impl LogOptions {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_json_console(mut self, json: bool) -> Self {
        self.json_console = json;
        self
    }
}

/// Builds the filter: `RUST_LOG` wins, then the configured level.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(level).map_err(|e| LoggerError::Filter {
            filter: level.to_string(),
            reason: e.to_string(),
        })
    })
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer. `None` when no log directory is set.
pub fn init_tracing(options: &LogOptions) -> Result<Option<WorkerGuard>, LoggerError> {
    let filter = build_filter(&options.level)?;

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|source| LoggerError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let removed = prune_old_logs(dir, &options.app_name, options.keep_files)?;
            if !removed.is_empty() {
                eprintln!("Removed {} old log file(s) from {}", removed.len(), dir.display());
            }

            let appender = rolling::daily(dir, &options.app_name);
            let (writer, guard) = non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let plain_console = (!options.json_console).then(|| fmt::layer().with_target(true));
    let json_console = options.json_console.then(|| fmt::layer().with_target(true).json());

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_console)
        .with(json_console)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::Init(e.to_string()))?;

    tracing::info!(
        app = %options.app_name,
        level = %options.level,
        log_dir = ?options.log_dir,
        "Logging initialized"
    );
    Ok(guard)
}

/// Deletes rolled files of `app_name` in `dir`, keeping the `keep` newest.
///
/// Returns the removed paths. Files that cannot be removed are reported on
/// stderr and skipped.
pub fn prune_old_logs(dir: &Path, app_name: &str, keep: usize) -> Result<Vec<PathBuf>, LoggerError> {
    let pattern = dir.join(format!("{}*", glob::Pattern::escape(app_name)));
    let pattern = pattern.to_string_lossy();

    let mut files: Vec<(SystemTime, PathBuf)> = glob::glob(&pattern)
        .map_err(|e| LoggerError::Pattern(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .collect();

    // Newest first; ties broken by name so the latest rolled date wins.
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = Vec::new();
    for (_, path) in files.into_iter().skip(keep) {
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
