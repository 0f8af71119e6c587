//! Progress reporting via JSON on stdout, with an optional rotating log file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::models::{LogLevel, LogMessage, ProgressInfo, WorkerMessage};

/// Rotate the log file once it would exceed this size.
pub const LOG_MAX_BYTES: u64 = 1024 * 1024;

/// Number of rotated files kept (`worker.log.1`, `worker.log.2`).
pub const LOG_BACKUPS: usize = 2;

/// Thread-safe progress reporter that outputs JSON messages to stdout.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<ProgressReporterInner>,
}

struct ProgressReporterInner {
    to_stdout: bool,
    state: Mutex<ReporterState>,
}

struct ReporterState {
    log_file: Option<RotatingLog>,
}

impl ProgressReporter {
    /// Create a new progress reporter.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A reporter that writes nothing to stdout. Used by tests and library callers.
    pub fn silent() -> Self {
        Self::build(false)
    }

    fn build(to_stdout: bool) -> Self {
        Self {
            inner: Arc::new(ProgressReporterInner {
                to_stdout,
                state: Mutex::new(ReporterState { log_file: None }),
            }),
        }
    }

    /// Also append log and error messages to a rotating file at `path`.
    pub fn enable_log_file(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = RotatingLog::new(path.to_path_buf(), LOG_MAX_BYTES, LOG_BACKUPS);
        self.lock_state().log_file = Some(log);
        Ok(())
    }

    /// Send a progress update.
    pub fn send_progress(&self, progress: &ProgressInfo) {
        let message = WorkerMessage::progress(progress);
        self.send_message(&message);
    }

    /// Send a log message.
    pub fn send_log(&self, level: LogLevel, message: &str) {
        self.append_to_file(level, message);
        let msg = WorkerMessage::log(level, message);
        self.send_message(&msg);
    }

    /// Send an error message.
    pub fn send_error(&self, message: &str) {
        self.append_to_file(LogLevel::Error, message);
        let msg = WorkerMessage::error(message);
        self.send_message(&msg);
    }

    /// Send the pipeline trace.
    pub fn send_trace(&self, lines: &[String]) {
        let msg = WorkerMessage::trace(lines);
        self.send_message(&msg);
    }

    /// Send a completion message.
    pub fn send_complete(&self, success: bool, output_path: Option<&str>) {
        let msg = WorkerMessage::complete(success, output_path);
        self.send_message(&msg);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ReporterState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append_to_file(&self, level: LogLevel, message: &str) {
        let mut state = self.lock_state();
        if let Some(log) = state.log_file.as_mut() {
            let line = LogMessage::new(level, message).to_log_line();
            if let Err(e) = log.append(&line) {
                eprintln!("Failed to write log file: {}", e);
            }
        }
    }

    /// Send a raw message (thread-safe).
    fn send_message(&self, message: &WorkerMessage) {
        if !self.inner.to_stdout {
            return;
        }
        let _lock = self.lock_state();

        match serde_json::to_string(message) {
            Ok(json) => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                if let Err(e) = writeln!(handle, "{}", json) {
                    eprintln!("Failed to write to stdout: {}", e);
                }
                let _ = handle.flush();
            }
            Err(e) => {
                eprintln!("Failed to serialize message: {}", e);
            }
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Size-capped log file with numbered backups.
struct RotatingLog {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
}

impl RotatingLog {
    fn new(path: PathBuf, max_bytes: u64, backups: usize) -> Self {
        Self {
            path,
            max_bytes,
            backups,
        }
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        let current = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current > 0 && current + line.len() as u64 + 1 > self.max_bytes {
            self.rotate()?;
        }

        let mut file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }

    fn rotate(&self) -> io::Result<()> {
        if self.backups == 0 {
            return fs::remove_file(&self.path);
        }
        let oldest = self.backup_path(self.backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_creation() {
        let reporter = ProgressReporter::new();
        let _clone = reporter.clone();
    }

    #[test]
    fn test_log_file_receives_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("worker.log");

        let reporter = ProgressReporter::silent();
        reporter.enable_log_file(&path).unwrap();
        reporter.send_log(LogLevel::Info, "Building engine");
        reporter.send_error("Engine build failed");

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO     Building engine"));
        assert!(lines[1].ends_with("ERROR    Engine build failed"));
    }

    #[test]
    fn test_rotation_keeps_two_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.log");
        let mut log = RotatingLog::new(path.clone(), 16, 2);

        for line in ["aaaaaaaaaa", "bbbbbbbbbb", "cccccccccc", "dddddddddd"] {
            log.append(line).unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddddddd\n");
        assert_eq!(fs::read_to_string(log.backup_path(1)).unwrap(), "cccccccccc\n");
        assert_eq!(fs::read_to_string(log.backup_path(2)).unwrap(), "bbbbbbbbbb\n");
        assert!(!log.backup_path(3).exists());
    }
}
