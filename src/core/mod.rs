/*!
 * Core Module
 * Fundamental types, status taxonomy, limits, timeouts and configuration
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod timeout;
pub mod types;

// Re-export for convenience
pub use config::{IpcConfig, KernelConfig};
pub use errors::*;
pub use timeout::Deadline;
pub use types::*;
