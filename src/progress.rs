//! Upload progress reporting.
//!
//! Reports how much of a `docchat upload` request has been sent. Progress
//! is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use docchat_core::backend::UploadProgress;

/// A single progress event for an upload.
#[derive(Clone, Debug, PartialEq)]
pub enum UploadProgressEvent {
    /// Bytes are being sent; `fraction` is in `[0.0, 1.0]`.
    Sending { fraction: f64, total_bytes: u64 },
    /// The service answered; `files` results are available.
    Done { files: usize },
}

/// Reports upload progress. Implementations write to stderr (human or JSON).
pub trait UploadProgressReporter: Send + Sync {
    fn report(&self, event: UploadProgressEvent);
}

/// Human-friendly progress on stderr: "upload  42%  of 1,234,567 bytes".
pub struct StderrProgress {
    /// Last whole percentage printed, to keep output to one line per step.
    last: AtomicU8,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            last: AtomicU8::new(u8::MAX),
        }
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadProgressReporter for StderrProgress {
    fn report(&self, event: UploadProgressEvent) {
        let line = match &event {
            UploadProgressEvent::Sending {
                fraction,
                total_bytes,
            } => {
                let pct = percent(*fraction);
                if self.last.swap(pct, Ordering::Relaxed) == pct {
                    return;
                }
                format!(
                    "upload  {:>3}%  of {} bytes\n",
                    pct,
                    format_number(*total_bytes)
                )
            }
            UploadProgressEvent::Done { files } => {
                format!("upload  done  {} file(s)\n", format_number(*files as u64))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl UploadProgressReporter for JsonProgress {
    fn report(&self, event: UploadProgressEvent) {
        let obj = match &event {
            UploadProgressEvent::Sending {
                fraction,
                total_bytes,
            } => serde_json::json!({
                "event": "progress",
                "phase": "sending",
                "fraction": fraction,
                "total_bytes": total_bytes
            }),
            UploadProgressEvent::Done { files } => serde_json::json!({
                "event": "progress",
                "phase": "done",
                "files": files
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl UploadProgressReporter for NoProgress {
    fn report(&self, _event: UploadProgressEvent) {}
}

fn percent(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0).floor() as u8
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Parse the `--progress` flag; `None` picks the TTY default.
    pub fn from_flag(flag: Option<&str>) -> anyhow::Result<Self> {
        match flag {
            None => Ok(Self::default_for_tty()),
            Some("off") => Ok(ProgressMode::Off),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some(other) => anyhow::bail!(
                "Unknown progress mode: '{}'. Must be off, human, or json.",
                other
            ),
        }
    }

    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn UploadProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress::new()),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

/// Adapt a reporter to the fraction callback the backend expects.
pub fn upload_callback(reporter: Arc<dyn UploadProgressReporter>, total_bytes: u64) -> UploadProgress {
    Arc::new(move |fraction| {
        reporter.report(UploadProgressEvent::Sending {
            fraction,
            total_bytes,
        })
    })
}
