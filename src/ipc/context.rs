/*!
 * IPC Context
 *
 * One value per process, created at start-up and passed to everything that
 * talks IPC. Owns the lazily created receive channel, the configuration
 * and the statistics counters.
 */

use crate::backend::{ChannelFlags, IpcBackend, LocalKernel};
use crate::core::config::IpcConfig;
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::types::{ChannelHandle, Pid};
use crate::monitoring::{IpcStats, StatsCounters};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct IpcContext {
    backend: Arc<dyn IpcBackend>,
    pid: Pid,
    config: IpcConfig,
    channel: Mutex<Option<ChannelHandle>>,
    stats: StatsCounters,
}

impl IpcContext {
    pub fn new(backend: Arc<dyn IpcBackend>, pid: Pid, config: IpcConfig) -> Self {
        Self {
            backend,
            pid,
            config,
            channel: Mutex::new(None),
            stats: StatsCounters::new(),
        }
    }

    /// Spawn a simulated process on `kernel` and return its context
    pub fn spawn(kernel: &Arc<LocalKernel>, name: &str, config: IpcConfig) -> Self {
        let pid = kernel.spawn_process(name);
        Self::new(Arc::clone(kernel) as Arc<dyn IpcBackend>, pid, config)
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn IpcBackend> {
        &self.backend
    }

    pub fn stats(&self) -> IpcStats {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &StatsCounters {
        &self.stats
    }

    /// The process receive channel, created on first use
    pub fn get_or_create_channel(&self) -> IpcResult<ChannelHandle> {
        let mut slot = self.channel.lock();
        if let Some(channel) = *slot {
            return Ok(channel);
        }

        let chid = self
            .backend
            .channel_create(self.pid, ChannelFlags::ALL)
            .map_err(|e| Status::NoChannel(Fault::new(e, format!("channel_create for pid {}", self.pid))))?;
        let channel = ChannelHandle(chid);
        *slot = Some(channel);
        info!("pid {} created receive channel {}", self.pid, chid);
        Ok(channel)
    }

    /// The channel if it was already created
    pub fn channel(&self) -> Option<ChannelHandle> {
        *self.channel.lock()
    }
}

impl std::fmt::Debug for IpcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcContext")
            .field("backend", &self.backend.name())
            .field("pid", &self.pid)
            .field("channel", &self.channel())
            .finish()
    }
}
