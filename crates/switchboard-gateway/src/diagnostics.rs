//! Per-message transport diagnostics.
//!
//! Every dispatched request is timed from arrival to response. Records are
//! logged under the `switchboard::ws` target according to the configured
//! [`LogStyle`], and counted for the `health` method.

use crate::protocol::{ErrorCode, ResponseFrame};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use switchboard_core::config::{DiagnosticsConfig, LogStyle};
use tokio::time::Instant;
use tracing::{info, warn, Level};

/// Log target for per-message records.
pub const DIAGNOSTICS_TARGET: &str = "switchboard::ws";

/// Timing state for one in-flight message.
#[derive(Debug)]
pub struct MessageTimer {
    conn_id: String,
    method: String,
    started: Instant,
}

impl MessageTimer {
    /// Time since the message arrived.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Method being timed.
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Outcome of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub method: String,
    pub elapsed: Duration,
    pub success: bool,
    pub slow: bool,
    pub code: Option<ErrorCode>,
}

/// Counter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsStats {
    pub style: LogStyle,
    pub slow_message_ms: u64,
    pub total: u64,
    pub failed: u64,
    pub slow: u64,
    pub timed_out: u64,
}

/// Transport diagnostics for one gateway.
pub struct TransportDiagnostics {
    style: RwLock<LogStyle>,
    slow_threshold: Duration,
    response_timeout: Duration,
    total: AtomicU64,
    failed: AtomicU64,
    slow: AtomicU64,
    timed_out: AtomicU64,
}

impl Default for TransportDiagnostics {
    fn default() -> Self {
        Self::new(&DiagnosticsConfig::default())
    }
}

impl TransportDiagnostics {
    /// Create diagnostics from configuration.
    pub fn new(config: &DiagnosticsConfig) -> Self {
        Self::with_thresholds(
            config.style,
            Duration::from_millis(config.slow_message_ms),
            Duration::from_millis(config.response_timeout_ms),
        )
    }

    /// Create diagnostics with explicit thresholds.
    pub fn with_thresholds(style: LogStyle, slow: Duration, response_timeout: Duration) -> Self {
        Self {
            style: RwLock::new(style),
            slow_threshold: slow,
            response_timeout,
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            slow: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Configured style.
    pub fn style(&self) -> LogStyle {
        *self.style.read()
    }

    /// Change the style.
    pub fn set_style(&self, style: LogStyle) {
        *self.style.write() = style;
    }

    /// Style after resolving `auto`.
    pub fn effective_style(&self) -> LogStyle {
        match self.style() {
            LogStyle::Auto => {
                if tracing::enabled!(target: "switchboard::ws", Level::DEBUG) {
                    LogStyle::Full
                } else {
                    LogStyle::Compact
                }
            }
            style => style,
        }
    }

    /// Messages slower than this are flagged.
    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// How long the dispatcher waits for a handler to respond.
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Start timing a message.
    pub fn start(&self, conn_id: &str, method: &str) -> MessageTimer {
        MessageTimer {
            conn_id: conn_id.to_string(),
            method: method.to_string(),
            started: Instant::now(),
        }
    }

    /// Note that a handler did not respond in time.
    ///
    /// The timeout response itself still goes through [`finish`](Self::finish).
    pub fn record_timeout(&self, timer: &MessageTimer) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: "switchboard::ws",
            conn_id = %timer.conn_id,
            method = %timer.method,
            timeout_ms = self.response_timeout.as_millis() as u64,
            "Handler did not respond in time"
        );
    }

    /// Finish timing and log the outcome.
    pub fn finish(&self, timer: MessageTimer, response: &ResponseFrame) -> MessageRecord {
        let elapsed = timer.started.elapsed();
        let slow = elapsed > self.slow_threshold;
        let record = MessageRecord {
            method: timer.method,
            elapsed,
            success: response.success,
            slow,
            code: response.error_code(),
        };

        self.total.fetch_add(1, Ordering::Relaxed);
        if !record.success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow.fetch_add(1, Ordering::Relaxed);
        }

        let elapsed_ms = elapsed.as_millis() as u64;
        let code = record.code.map(|c| c.as_str()).unwrap_or("");
        if slow {
            warn!(
                target: "switchboard::ws",
                conn_id = %timer.conn_id,
                method = %record.method,
                elapsed_ms,
                success = record.success,
                code,
                slow = true,
                "Slow message"
            );
        } else if !record.success {
            info!(
                target: "switchboard::ws",
                conn_id = %timer.conn_id,
                method = %record.method,
                elapsed_ms,
                code,
                "Message failed"
            );
        } else if self.effective_style() == LogStyle::Full {
            info!(
                target: "switchboard::ws",
                conn_id = %timer.conn_id,
                method = %record.method,
                elapsed_ms,
                "Message handled"
            );
        }

        record
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            style: self.style(),
            slow_message_ms: self.slow_threshold.as_millis() as u64,
            total: self.total.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            slow: self.slow.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}
