use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const DEFAULT_LOG_FILE: &str = "sf_account_manager.log";

/// Where log output goes and how much of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub verbose: bool,
    /// Log file appended to alongside the console.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    fn directive(&self) -> String {
        let level = if self.verbose { "debug" } else { "info" };
        format!("sf_account_cli={level}")
    }

    /// `RUST_LOG` wins over the verbosity flag.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }
}

/// Keeps the file writer alive; buffered lines are flushed on drop.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Drop the guard held in `slot`, flushing buffered file output. Used on
/// normal exit and from the interrupt handler before `process::exit`.
pub fn release(slot: &Mutex<Option<LogGuard>>) {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take();
}

/// Install console (stderr) and file logging. Failing to open the log file
/// only disables the file output.
pub fn init(config: &LogConfig) -> LogGuard {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(config.filter());

    let (file_layer, guard) = match config.file.as_deref().map(open_log_file) {
        Some(Ok(file)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(config.filter());
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("Warning: {e:#}");
            (None, None)
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
    LogGuard { _file: guard }
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_follows_verbosity() {
        let quiet = LogConfig {
            verbose: false,
            file: None,
        };
        let verbose = LogConfig {
            verbose: true,
            file: None,
        };
        assert_eq!(quiet.directive(), "sf_account_cli=info");
        assert_eq!(verbose.directive(), "sf_account_cli=debug");
    }

    #[test]
    fn release_empties_slot_and_is_idempotent() {
        let slot = Mutex::new(Some(LogGuard { _file: None }));
        release(&slot);
        assert!(slot.lock().unwrap().is_none());
        release(&slot);
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn release_flushes_file_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let (mut writer, guard) = tracing_appender::non_blocking(open_log_file(&path).unwrap());
        let slot = Mutex::new(Some(LogGuard { _file: Some(guard) }));
        {
            use std::io::Write;
            writeln!(writer, "buffered line").unwrap();
        }
        release(&slot);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "buffered line\n");
    }

    #[test]
    fn open_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, "first\n").unwrap();
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "second").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn open_log_file_reports_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_log_file(&dir.path().join("nope").join("run.log")).unwrap_err();
        assert!(err.to_string().contains("failed to open log file"));
    }
}
