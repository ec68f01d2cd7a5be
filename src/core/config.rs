/*!
 * IPC Configuration
 *
 * Runtime configuration for IPC contexts and the local kernel.
 *
 * Environment variables (read by `from_env`):
 * - TCS_IPC_MAX_CHANNEL_PROBE: highest channel number probed by `find_connection`
 * - TCS_IPC_SEND_TIMEOUT_MS: default timeout for `send` when the caller passes none
 * - TCS_IPC_SURFACE_SYSTEM_PULSES: return unblock/coid-death pulses from `receive`
 * - TCS_IPC_MAX_MESSAGE_SIZE: largest payload the local kernel accepts
 */

use super::limits::{
    DEFAULT_MAX_CHANNEL_PROBE, MAX_CHANNELS_PER_PROCESS, MAX_MESSAGE_SIZE, MAX_QUEUE_CAPACITY,
};
use log::warn;
use std::str::FromStr;
use std::time::Duration;

/// Per-process IPC context configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcConfig {
    /// Highest channel number probed when discovering a peer's channel
    pub max_channel_probe: i32,
    /// Timeout applied by `send` when the caller passes `None`
    pub default_send_timeout: Option<Duration>,
    /// Surface `Unblock`/`CoidDeath` pulses to the caller instead of absorbing them
    pub surface_system_pulses: bool,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_channel_probe: DEFAULT_MAX_CHANNEL_PROBE,
            default_send_timeout: None,
            surface_system_pulses: false,
        }
    }
}

impl IpcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment on top of the defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(probe) = env_parse::<i32>("TCS_IPC_MAX_CHANNEL_PROBE") {
            config.max_channel_probe = probe.max(1);
        }
        if let Some(ms) = env_parse::<u64>("TCS_IPC_SEND_TIMEOUT_MS") {
            config.default_send_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(surface) = env_flag("TCS_IPC_SURFACE_SYSTEM_PULSES") {
            config.surface_system_pulses = surface;
        }
        config
    }

    pub fn with_max_channel_probe(mut self, probe: i32) -> Self {
        self.max_channel_probe = probe.max(1);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.default_send_timeout = Some(timeout);
        self
    }

    pub fn with_system_pulses(mut self, surface: bool) -> Self {
        self.surface_system_pulses = surface;
        self
    }
}

/// Local kernel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub max_message_size: usize,
    pub max_channels_per_process: usize,
    pub max_queue_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            max_channels_per_process: MAX_CHANNELS_PER_PROCESS,
            max_queue_capacity: MAX_QUEUE_CAPACITY,
        }
    }
}

impl KernelConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = env_parse::<usize>("TCS_IPC_MAX_MESSAGE_SIZE") {
            config.max_message_size = size;
        }
        config
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_channels(mut self, count: usize) -> Self {
        self.max_channels_per_process = count;
        self
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
}
