//! Progress information and worker messages.

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Encoding progress, sent to the GUI as `WorkerMessage::Progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    /// Output frames encoded so far.
    pub frame: i32,

    /// Expected output frames, after interpolation.
    pub total_frames: i32,

    /// Encoding speed in frames per second.
    pub fps: f64,

    /// Seconds remaining.
    pub eta: f64,
}

impl ProgressInfo {
    pub fn new(frame: i32, total_frames: i32, fps: f64, eta: f64) -> Self {
        Self {
            frame,
            total_frames,
            fps,
            eta,
        }
    }

    /// Progress with the ETA derived from the current speed; zero when it cannot be known.
    pub fn estimate(frame: i32, total_frames: i32, fps: f64) -> Self {
        let eta = if fps > 0.0 && total_frames > frame {
            (total_frames - frame) as f64 / fps
        } else {
            0.0
        };
        Self::new(frame, total_frames, fps, eta)
    }
}

/// Messages sent from worker to main app via stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Progress update
    Progress {
        frame: i32,
        #[serde(rename = "totalFrames")]
        total_frames: i32,
        fps: f64,
        eta: f64,
    },

    /// Log message
    Log {
        level: String,
        message: String,
    },

    /// Error message
    Error {
        message: String,
    },

    /// Steps applied by the pipeline, in order
    Trace {
        lines: Vec<String>,
    },

    /// Job completion
    Complete {
        success: bool,
        #[serde(rename = "outputPath", skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
    },
}

impl WorkerMessage {
    /// Create a progress message.
    pub fn progress(info: &ProgressInfo) -> Self {
        WorkerMessage::Progress {
            frame: info.frame,
            total_frames: info.total_frames,
            fps: info.fps,
            eta: info.eta,
        }
    }

    /// Create a log message.
    pub fn log(level: LogLevel, message: &str) -> Self {
        WorkerMessage::Log {
            level: level.as_str().to_string(),
            message: message.to_string(),
        }
    }

    /// Create an error message.
    pub fn error(message: &str) -> Self {
        WorkerMessage::Error {
            message: message.to_string(),
        }
    }

    /// Create a trace message.
    pub fn trace(lines: &[String]) -> Self {
        WorkerMessage::Trace {
            lines: lines.to_vec(),
        }
    }

    /// Create a completion message.
    pub fn complete(success: bool, output_path: Option<&str>) -> Self {
        WorkerMessage::Complete {
            success,
            output_path: output_path.map(String::from),
        }
    }
}

/// Log message from worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(level: LogLevel, message: &str) -> Self {
        Self {
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Single line for the log file, e.g. `2024-05-01 12:00:00 DEBUG    message`.
    pub fn to_log_line(&self) -> String {
        format!(
            "{} {:<8} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level.as_str().to_uppercase(),
            self.message
        )
    }
}

/// Log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_estimate() {
        let info = ProgressInfo::estimate(500, 1000, 25.0);
        assert_eq!(info.eta, 20.0);
        assert_eq!(ProgressInfo::estimate(500, 1000, 0.0).eta, 0.0);
        // Interpolated output can run past the probed source count.
        assert_eq!(ProgressInfo::estimate(1200, 1000, 25.0).eta, 0.0);
    }

    #[test]
    fn test_worker_message_serialization() {
        let msg = WorkerMessage::progress(&ProgressInfo::new(100, 1000, 30.0, 30.0));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"frame\":100"));
    }

    #[test]
    fn test_log_line_format() {
        let msg = LogMessage::new(LogLevel::Debug, "building engine");
        let line = msg.to_log_line();
        assert!(line.ends_with("DEBUG    building engine"));
    }

    #[test]
    fn test_trace_message_serialization() {
        let msg = WorkerMessage::trace(&["Applied Model: A".to_string()]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"trace\""));
        assert!(json.contains("Applied Model: A"));
    }

    #[test]
    fn test_log_message_serialization() {
        let msg = WorkerMessage::log(LogLevel::Info, "Test message");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"log\""));
        assert!(json.contains("\"level\":\"info\""));
    }
}
