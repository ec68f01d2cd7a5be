/*!
 * IPC Module
 * Channels, connections, pulses, timers, message transport and interrupts
 */

pub mod connection;
pub mod context;
pub mod interrupt;
pub mod mqueue;
pub mod name;
pub mod pulse;
pub mod timer;
pub mod transport;
pub mod types;

// Re-export for convenience
pub use context::IpcContext;
pub use mqueue::MessageQueue;
pub use name::name_path;
pub use timer::TimedPulse;
pub use transport::NoBlockSend;
pub use types::*;
