/*!
 * Monitoring
 * Per-context IPC counters and structured tracing
 */

mod stats;
mod tracer;

pub use stats::{IpcStats, StatsCounters};
pub use tracer::{generate_trace_id, init_tracing, TransactionSpan};
