/*!
 * Core Types
 * Identifiers shared by the IPC layer and its kernel backends
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Process ID type
pub type Pid = u32;

/// Kernel channel number, unique within one process
pub type ChannelId = i32;

/// Kernel connection id, unique within one process
pub type Coid = i32;

/// Server-side id of a client connection, unique within the server process
pub type ScoId = i32;

/// Receive id naming a reply-blocked sender
pub type RcvId = i64;

/// Kernel timer id
pub type TimerId = i32;

/// Message queue id
pub type MqId = i32;

/// Hardware interrupt line number
pub type IrqLine = u32;

/// Attached interrupt id
pub type InterruptId = i32;

/// Receive endpoint of one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelHandle(pub ChannelId);

impl ChannelHandle {
    #[inline]
    #[must_use]
    pub const fn id(self) -> ChannelId {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chid {}", self.0)
    }
}

/// Directed handle from a producer to a channel
///
/// Valid between attach and detach only. Handles are plain ids: using one
/// after detach is reported by the kernel, it never aliases memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionHandle(pub Coid);

impl ConnectionHandle {
    #[inline]
    #[must_use]
    pub const fn coid(self) -> Coid {
        self.0
    }

    /// Value embedded in self-addressed pulses so the receiver can recover
    /// the originating connection
    #[inline]
    #[must_use]
    pub const fn as_pulse_value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coid {}", self.0)
    }
}

/// Kernel timer owned by a timed pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerHandle(pub TimerId);

/// Attached hardware interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterruptHandle(pub InterruptId);

/// Seconds plus nanoseconds, as timers are armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeSpec {
    pub sec: u64,
    pub nsec: u64,
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec { sec: 0, nsec: 0 };

    #[must_use]
    pub const fn new(sec: u64, nsec: u64) -> Self {
        Self { sec, nsec }
    }

    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self {
            sec: ms / 1000,
            nsec: (ms % 1000) * 1_000_000,
        }
    }

    /// Carry whole seconds out of the nanosecond field
    ///
    /// Some kernels reject `nsec >= 1s` when arming a timer, so every value
    /// goes through here first.
    #[must_use]
    pub const fn normalized(self) -> Self {
        Self {
            sec: self.sec + self.nsec / NANOS_PER_SEC,
            nsec: self.nsec % NANOS_PER_SEC,
        }
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    #[must_use]
    pub fn to_duration(self) -> Duration {
        let n = self.normalized();
        Duration::new(n.sec, n.nsec as u32)
    }
}

impl From<Duration> for TimeSpec {
    fn from(d: Duration) -> Self {
        Self {
            sec: d.as_secs(),
            nsec: u64::from(d.subsec_nanos()),
        }
    }
}
