/*!
 * Simulated Process
 * Per-process channel, connection and pending-reply tables
 */

use super::channel::{Channel, SendSlot};
use crate::backend::types::{ChannelFlags, KernelResult};
use crate::core::limits::{FIRST_CHANNEL_ID, FIRST_CONNECTION_ID};
use crate::core::types::{ChannelId, Coid, Pid, RcvId, ScoId};
use ahash::RandomState;
use dashmap::DashMap;
use nix::errno::Errno;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

/// Client side of a connection
#[derive(Clone)]
pub(super) struct Connection {
    pub target: Pid,
    pub chid: ChannelId,
    pub scoid: ScoId,
    pub channel: Arc<Channel>,
}

/// Server side of a connection
#[derive(Debug, Clone, Copy)]
pub(super) struct ServerConnection {
    pub client: Pid,
    pub coid: Coid,
    pub chid: ChannelId,
}

pub(super) struct Process {
    pub pid: Pid,
    pub name: String,
    channels: DashMap<ChannelId, Arc<Channel>, RandomState>,
    connections: DashMap<Coid, Connection, RandomState>,
    server_connections: DashMap<ScoId, ServerConnection, RandomState>,
    pending: DashMap<RcvId, Arc<SendSlot>, RandomState>,
    next_chid: AtomicI32,
    next_coid: AtomicI32,
    next_scoid: AtomicI32,
    io_privileged: AtomicBool,
    alive: AtomicBool,
}

impl Process {
    pub fn new(pid: Pid, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            channels: DashMap::with_hasher(RandomState::new()),
            connections: DashMap::with_hasher(RandomState::new()),
            server_connections: DashMap::with_hasher(RandomState::new()),
            pending: DashMap::with_hasher(RandomState::new()),
            next_chid: AtomicI32::new(FIRST_CHANNEL_ID),
            next_coid: AtomicI32::new(FIRST_CONNECTION_ID),
            next_scoid: AtomicI32::new(1),
            io_privileged: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    // Channels

    pub fn create_channel(&self, flags: ChannelFlags, limit: usize) -> KernelResult<ChannelId> {
        if self.channels.len() >= limit {
            return Err(Errno::EAGAIN);
        }
        let chid = self.next_chid.fetch_add(1, Ordering::Relaxed);
        self.channels
            .insert(chid, Arc::new(Channel::new(flags)));
        Ok(chid)
    }

    pub fn channel(&self, chid: ChannelId) -> KernelResult<Arc<Channel>> {
        self.channels
            .get(&chid)
            .map(|c| Arc::clone(c.value()))
            .filter(|c| c.is_alive())
            .ok_or(Errno::ESRCH)
    }

    pub fn remove_channel(&self, chid: ChannelId) -> Option<Arc<Channel>> {
        self.channels.remove(&chid).map(|(_, c)| c)
    }

    /// Lowest-numbered live channel, where kernel notices are delivered
    pub fn notice_channel(&self) -> Option<Arc<Channel>> {
        self.channels
            .iter()
            .filter(|c| c.is_alive())
            .min_by_key(|c| *c.key())
            .map(|c| Arc::clone(c.value()))
    }

    pub fn drain_channels(&self) -> Vec<Arc<Channel>> {
        let ids: Vec<ChannelId> = self.channels.iter().map(|c| *c.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.remove_channel(id))
            .collect()
    }

    // Client connections

    /// Connection ids are never reused within a process lifetime
    pub fn alloc_coid(&self) -> Coid {
        self.next_coid.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert_connection(&self, coid: Coid, connection: Connection) {
        self.connections.insert(coid, connection);
    }

    pub fn connection(&self, coid: Coid) -> KernelResult<Connection> {
        self.connections
            .get(&coid)
            .map(|c| c.value().clone())
            .ok_or(Errno::EBADF)
    }

    pub fn remove_connection(&self, coid: Coid) -> Option<Connection> {
        self.connections.remove(&coid).map(|(_, c)| c)
    }

    pub fn drain_connections(&self) -> Vec<(Coid, Connection)> {
        let ids: Vec<Coid> = self.connections.iter().map(|c| *c.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.connections.remove(&id))
            .collect()
    }

    // Server connections

    pub fn add_server_connection(&self, server: ServerConnection) -> ScoId {
        let scoid = self.next_scoid.fetch_add(1, Ordering::Relaxed);
        self.server_connections.insert(scoid, server);
        scoid
    }

    pub fn remove_server_connection(&self, scoid: ScoId) -> Option<ServerConnection> {
        self.server_connections.remove(&scoid).map(|(_, s)| s)
    }

    /// Remove server connections, all of them or only those on `chid`
    pub fn drain_server_connections(&self, chid: Option<ChannelId>) -> Vec<ServerConnection> {
        let ids: Vec<ScoId> = self
            .server_connections
            .iter()
            .filter(|s| chid.map_or(true, |c| s.value().chid == c))
            .map(|s| *s.key())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.remove_server_connection(id))
            .collect()
    }

    // Pending replies

    pub fn hold(&self, rcvid: RcvId, slot: Arc<SendSlot>) {
        self.pending.insert(rcvid, slot);
    }

    pub fn take_pending(&self, rcvid: RcvId) -> KernelResult<Arc<SendSlot>> {
        self.pending
            .remove(&rcvid)
            .map(|(_, s)| s)
            .ok_or(Errno::ESRCH)
    }

    /// Fail every sender still waiting on this process
    pub fn fail_pending(&self) -> usize {
        let ids: Vec<RcvId> = self.pending.iter().map(|p| *p.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.complete(Err(Errno::ESRCH));
                failed += 1;
            }
        }
        failed
    }

    pub fn grant_io_privilege(&self) {
        self.io_privileged.store(true, Ordering::Release);
    }

    pub fn has_io_privilege(&self) -> bool {
        self.io_privileged.load(Ordering::Acquire)
    }
}
