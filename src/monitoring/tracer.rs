/*!
 * Distributed Tracing
 * Structured tracing for IPC transactions using the tracing crate
 *
 * Features:
 * - Per-transaction trace ids for correlating client and server logs
 * - JSON-formatted logs for structured parsing
 * - Slow transaction warnings with embedded timings
 * - `log` records from library modules bridged into the subscriber
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Transactions slower than this are reported at warn level
const SLOW_TRANSACTION: Duration = Duration::from_millis(10);

static NEXT_TRACE: AtomicU64 = AtomicU64::new(1);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - TCS_IPC_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("TCS_IPC_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Process-unique trace id: `<pid>-<sequence>`
pub fn generate_trace_id(pid: u32) -> String {
    format!("{}-{}", pid, NEXT_TRACE.fetch_add(1, Ordering::Relaxed))
}

/// Span around one IPC transaction (send, dispatch)
pub struct TransactionSpan {
    span: tracing::Span,
    start: Instant,
    operation: &'static str,
    trace_id: String,
}

impl TransactionSpan {
    pub fn new(operation: &'static str, pid: u32) -> Self {
        let trace_id = generate_trace_id(pid);
        let span = span!(
            Level::DEBUG,
            "ipc",
            trace_id = %trace_id,
            operation = operation,
            pid = pid,
            bytes = tracing::field::Empty,
            result = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            operation,
            trace_id,
        }
    }

    pub fn record_bytes(&self, bytes: usize) {
        self.span.record("bytes", bytes);
    }

    /// Record the outcome from any result
    pub fn record_outcome<T, E: std::fmt::Display>(&self, result: &Result<T, E>) {
        match result {
            Ok(_) => {
                self.span.record("result", "success");
            }
            Err(e) => {
                self.span.record("error", tracing::field::display(e));
                self.span.record("result", "error");
            }
        }
    }
}

impl Drop for TransactionSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();

        if duration > SLOW_TRANSACTION {
            warn!(
                trace_id = %self.trace_id,
                operation = self.operation,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow transaction"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                operation = self.operation,
                duration_us = duration.as_micros() as u64,
                "transaction completed"
            );
        }
    }
}
