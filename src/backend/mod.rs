/*!
 * Kernel Backends
 *
 * The primitive set the IPC layer is written against. Each host kernel
 * personality implements `IpcBackend` once; the concrete backend is picked
 * here and nowhere else, so every call site above this module is
 * kernel-agnostic.
 */

pub mod local;
pub mod types;

pub use local::LocalKernel;
pub use types::*;

use crate::core::config::KernelConfig;
use crate::core::types::{ChannelId, Coid, InterruptId, IrqLine, MqId, Pid, RcvId, ScoId, TimerId};
use crate::ipc::types::Message;
use nix::errno::Errno;
use std::sync::Arc;
use std::time::Duration;

/// Kernel primitives used by the IPC layer
///
/// Every call is made on behalf of a process (`pid`), which lets one backend
/// instance host several simulated processes. Failures are raw errnos; the
/// layer above maps them onto its status taxonomy.
#[cfg_attr(test, mockall::automock)]
pub trait IpcBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Create a receive channel
    fn channel_create(&self, pid: Pid, flags: ChannelFlags) -> KernelResult<ChannelId>;

    /// Destroy a channel, failing every sender blocked on it
    fn channel_destroy(&self, pid: Pid, chid: ChannelId) -> KernelResult<()>;

    /// Connect to channel `chid` of process `target`
    fn connect_attach(&self, pid: Pid, target: Pid, chid: ChannelId) -> KernelResult<Coid>;

    /// Drop a client connection
    fn connect_detach(&self, pid: Pid, coid: Coid) -> KernelResult<()>;

    /// Release the server side of a connection after its disconnect pulse
    fn connect_server_detach(&self, pid: Pid, scoid: ScoId) -> KernelResult<()>;

    /// Verify a connection is live without consuming anything
    fn connect_check(&self, pid: Pid, coid: Coid) -> KernelResult<()>;

    /// Send and block until the peer replies
    fn msg_send(
        &self,
        pid: Pid,
        coid: Coid,
        message: &Message,
        timeout: Option<Duration>,
    ) -> KernelResult<Reply>;

    /// Queue a pulse on the connection's channel, never blocks
    fn msg_send_pulse(&self, pid: Pid, coid: Coid, code: i8, value: i32) -> KernelResult<()>;

    /// Block on a channel until a pulse or message arrives
    fn msg_receive(
        &self,
        pid: Pid,
        chid: ChannelId,
        timeout: Option<Duration>,
    ) -> KernelResult<Delivery>;

    /// Unblock a sender with a status and reply message
    fn msg_reply(&self, pid: Pid, rcvid: RcvId, status: i64, message: &Message) -> KernelResult<()>;

    /// Unblock a sender with an error
    fn msg_error(&self, pid: Pid, rcvid: RcvId, errno: Errno) -> KernelResult<()>;

    /// Create a timer delivering `event` on expiry
    fn timer_create(&self, pid: Pid, event: PulseEvent) -> KernelResult<TimerId>;

    /// Arm, rearm or disarm a timer
    fn timer_settime(&self, pid: Pid, timer: TimerId, spec: TimerSpec) -> KernelResult<()>;

    fn timer_delete(&self, pid: Pid, timer: TimerId) -> KernelResult<()>;

    /// Open a named message queue, creating it when absent
    fn mq_open(&self, pid: Pid, name: &str, capacity: usize) -> KernelResult<MqId>;

    fn mq_close(&self, pid: Pid, mq: MqId) -> KernelResult<()>;

    fn mq_send(&self, pid: Pid, mq: MqId, data: &[u8]) -> KernelResult<()>;

    fn mq_receive(&self, pid: Pid, mq: MqId) -> KernelResult<Vec<u8>>;

    /// Deliver `event` every time the queue drains to empty
    fn mq_notify_empty(&self, pid: Pid, mq: MqId, event: PulseEvent) -> KernelResult<()>;

    /// Request hardware I/O privilege for the calling process
    fn io_privilege(&self, pid: Pid) -> KernelResult<()>;

    fn interrupt_attach(
        &self,
        pid: Pid,
        line: IrqLine,
        handler: InterruptHandler,
    ) -> KernelResult<InterruptId>;

    fn interrupt_detach(&self, pid: Pid, id: InterruptId) -> KernelResult<()>;

    /// Mask a line, returning the new mask depth
    fn interrupt_mask(&self, line: IrqLine, id: InterruptId) -> KernelResult<u32>;

    /// Unmask a line, returning the new mask depth
    fn interrupt_unmask(&self, line: IrqLine, id: InterruptId) -> KernelResult<u32>;

    fn interrupt_disable(&self);

    fn interrupt_enable(&self);

    /// Bind a path in the kernel namespace to a channel
    fn path_attach(&self, pid: Pid, path: &str, chid: ChannelId) -> KernelResult<()>;

    fn path_detach(&self, pid: Pid, path: &str) -> KernelResult<()>;

    /// Owner process and channel of a path
    fn path_resolve(&self, path: &str) -> KernelResult<(Pid, ChannelId)>;
}

/// Backend for the host kernel this crate was built for
#[cfg(unix)]
pub type HostKernel = local::LocalKernel;

#[cfg(not(unix))]
compile_error!("tcs-ipc has no kernel backend for this target");

/// Create the host kernel backend with configuration from the environment
#[cfg(unix)]
pub fn default_backend() -> Arc<HostKernel> {
    HostKernel::new(KernelConfig::from_env())
}
