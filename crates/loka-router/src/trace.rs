// crates/loka-router/src/trace.rs

//! Per-request trace buffer and the rotating routing log
//!
//! Each request accumulates one line per pipeline step with a
//! timing-relative label, then flushes the whole buffer to a plain-text log.
//! The appender is best-effort: a full disk or missing directory never fails
//! the request. At 10 MB the file is renamed to `.1` (replacing any earlier
//! rollover) and a fresh file starts.

use log::debug;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// One request's step-by-step trace
pub struct TraceBuffer {
    request_id: String,
    started: Instant,
    lines: Vec<String>,
}

impl TraceBuffer {
    pub fn new(request_id: &str) -> Self {
        TraceBuffer {
            request_id: request_id.to_string(),
            started: Instant::now(),
            lines: Vec::new(),
        }
    }

    pub fn step(&mut self, label: &str) {
        let mut line = String::new();
        let _ = write!(
            line,
            "[{} +{}ms] {}",
            self.request_id,
            self.started.elapsed().as_millis(),
            label
        );
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Rotating plain-text appender shared by all requests
pub struct TraceLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TraceLog {
    pub fn new(path: PathBuf) -> Self {
        TraceLog {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Append a finished trace; errors are swallowed by contract
    pub fn append(&self, buffer: &TraceBuffer) {
        let Ok(_guard) = self.lock.lock() else {
            return;
        };
        self.rotate_if_needed();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                for line in buffer.lines() {
                    writeln!(file, "{}", line)?;
                }
                Ok(())
            });
        if let Err(e) = result {
            debug!("routing log append failed (ignored): {}", e);
        }
    }

    fn rotate_if_needed(&self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        if meta.len() < MAX_LOG_BYTES {
            return;
        }
        let mut rotated = self.path.clone();
        rotated.set_extension("log.1");
        if let Err(e) = std::fs::rename(&self.path, &rotated) {
            debug!("routing log rotation failed (ignored): {}", e);
        }
    }
}
