/*!
 * IPC Statistics
 * Lock-free per-context counters with a serializable snapshot
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Point-in-time copy of a context's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcStats {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub messages_sent: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub messages_received: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub replies_sent: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pulses_sent: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pulses_received: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub disconnects_absorbed: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub unblocks_absorbed: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub coid_deaths_absorbed: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub no_block_sends: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timers_armed: u64,
}

/// Live counters, updated with relaxed atomics
#[derive(Debug, Default)]
pub struct StatsCounters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    replies_sent: AtomicU64,
    pulses_sent: AtomicU64,
    pulses_received: AtomicU64,
    disconnects_absorbed: AtomicU64,
    unblocks_absorbed: AtomicU64,
    coid_deaths_absorbed: AtomicU64,
    no_block_sends: AtomicU64,
    timers_armed: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        message_sent => messages_sent,
        message_received => messages_received,
        reply_sent => replies_sent,
        pulse_sent => pulses_sent,
        pulse_received => pulses_received,
        disconnect_absorbed => disconnects_absorbed,
        unblock_absorbed => unblocks_absorbed,
        coid_death_absorbed => coid_deaths_absorbed,
        no_block_send => no_block_sends,
        timer_armed => timers_armed,
    }

    pub fn snapshot(&self) -> IpcStats {
        IpcStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            pulses_sent: self.pulses_sent.load(Ordering::Relaxed),
            pulses_received: self.pulses_received.load(Ordering::Relaxed),
            disconnects_absorbed: self.disconnects_absorbed.load(Ordering::Relaxed),
            unblocks_absorbed: self.unblocks_absorbed.load(Ordering::Relaxed),
            coid_deaths_absorbed: self.coid_deaths_absorbed.load(Ordering::Relaxed),
            no_block_sends: self.no_block_sends.load(Ordering::Relaxed),
            timers_armed: self.timers_armed.load(Ordering::Relaxed),
        }
    }
}
