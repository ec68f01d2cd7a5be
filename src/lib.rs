/*!
 * TCS IPC Library
 * Message-passing layer for telescope node controllers
 */

pub mod backend;
pub mod core;
pub mod ipc;
pub mod monitoring;
pub mod resmgr;

// Re-exports
pub use backend::{default_backend, HostKernel, IpcBackend, LocalKernel, Reply};
pub use crate::core::{
    ChannelHandle, ConnectionHandle, Deadline, Fault, InterruptHandle, IpcConfig, IpcResult,
    KernelConfig, Pid, Status, TimeSpec, TimerHandle,
};
pub use ipc::{
    name_path, Event, IpcContext, Message, MessageHeader, MessageQueue, NoBlockSend, PulseCode,
    ReplyHandle, TimedPulse,
};
pub use monitoring::{init_tracing, IpcStats};
pub use resmgr::{
    device_path, ControlReply, DeviceFile, DeviceHandlers, DeviceState, Ocb, Origin,
    ResourceManager, ResourceRequest,
};
