//! Scoped duration logging for update phases.
//!
//! A [`LogTimer`] starts counting when created and emits one `info!` line when
//! dropped. Timers created with [`LogTimer::with_status`] also report whether
//! the phase succeeded; a phase only counts as succeeded once
//! [`LogTimer::succeeded`] has been called, so early returns through `?` are
//! logged as failures.

use std::time::{Duration, Instant};

use tracing::info;

pub struct LogTimer {
    message: String,
    start: Instant,
    show_status: bool,
    succeeded: bool,
}

impl LogTimer {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            start: Instant::now(),
            show_status: false,
            succeeded: false,
        }
    }

    /// Include a `Succeeded`/`Failed` marker in the log line.
    pub fn with_status(mut self) -> Self {
        self.show_status = true;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Mark the phase as succeeded and log it.
    pub fn succeeded(mut self) {
        self.succeeded = true;
    }
}

impl Drop for LogTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        if self.show_status {
            let status = if self.succeeded { "Succeeded" } else { "Failed" };
            info!(
                elapsed_ms,
                status,
                "{}: {} [LogTimer={}ms]",
                self.message,
                status,
                elapsed_ms
            );
        } else {
            info!(elapsed_ms, "{} [LogTimer={}ms]", self.message, elapsed_ms);
        }
    }
}
