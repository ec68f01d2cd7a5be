/*!
 * Backend Types
 * Kernel-level values exchanged between the IPC layer and a backend
 */

use crate::core::types::{ChannelId, Coid, IrqLine, Pid, RcvId, ScoId, TimeSpec};
use crate::ipc::types::Message;
use nix::errno::Errno;
use std::sync::Arc;

/// Result of a raw kernel call
pub type KernelResult<T> = Result<T, Errno>;

/// Pulse as the kernel delivers it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPulse {
    pub code: i8,
    pub value: i32,
    /// Server connection the pulse arrived through
    pub scoid: ScoId,
}

/// Sender details attached to a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageInfo {
    pub pid: Pid,
    pub chid: ChannelId,
    pub scoid: ScoId,
    pub coid: Coid,
    pub msglen: usize,
}

/// One wakeup of a blocking receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Pulse(RawPulse),
    Message {
        rcvid: RcvId,
        info: MessageInfo,
        message: Message,
    },
}

/// Answer to a blocking send
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    /// Status word passed to `msg_reply`, byte counts for device replies
    pub status: i64,
    pub message: Message,
}

/// Notifications a channel asks the kernel for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFlags {
    pub disconnect: bool,
    pub unblock: bool,
    pub coid_death: bool,
}

impl ChannelFlags {
    pub const NONE: ChannelFlags = ChannelFlags {
        disconnect: false,
        unblock: false,
        coid_death: false,
    };

    pub const ALL: ChannelFlags = ChannelFlags {
        disconnect: true,
        unblock: true,
        coid_death: true,
    };
}

impl Default for ChannelFlags {
    fn default() -> Self {
        Self::ALL
    }
}

/// Pulse to deliver when a kernel event (timer, queue drain) happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent {
    pub coid: Coid,
    pub code: i8,
    pub value: i32,
}

/// Firing schedule of a kernel timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerSpec {
    /// First expiry, zero disarms the timer
    pub delay: TimeSpec,
    /// Repeat period, zero for one-shot
    pub interval: TimeSpec,
}

impl TimerSpec {
    pub fn new(delay: impl Into<TimeSpec>, interval: impl Into<TimeSpec>) -> Self {
        Self {
            delay: delay.into(),
            interval: interval.into(),
        }
    }

    /// Both fields with whole seconds carried out of nanoseconds
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            delay: self.delay.normalized(),
            interval: self.interval.normalized(),
        }
    }
}

/// Interrupt service routine, run on the thread that raised the line
pub type InterruptHandler = Arc<dyn Fn(IrqLine) + Send + Sync>;
