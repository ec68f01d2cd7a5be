/*!
 * Connection Manager
 * Attach, detach and discovery of connections to channels
 */

use super::context::IpcContext;
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::types::{ChannelHandle, ConnectionHandle, Pid};
use log::debug;

impl IpcContext {
    /// Connect to `channel` of `peer`, or of this process when `peer` is `None`
    pub fn attach(&self, channel: ChannelHandle, peer: Option<Pid>) -> IpcResult<ConnectionHandle> {
        let target = peer.unwrap_or(self.pid());
        self.backend()
            .connect_attach(self.pid(), target, channel.id())
            .map(ConnectionHandle)
            .map_err(|e| {
                Status::NoAttach(Fault::new(
                    e,
                    format!("attach to channel {} of pid {}", channel, target),
                ))
            })
    }

    /// Connection to this process's own channel, creating the channel if needed
    pub fn attach_self(&self) -> IpcResult<ConnectionHandle> {
        let channel = self.get_or_create_channel()?;
        self.attach(channel, None)
    }

    /// Release a connection; a second detach of the same handle fails
    pub fn detach(&self, connection: ConnectionHandle) -> IpcResult<()> {
        self.backend()
            .connect_detach(self.pid(), connection.coid())
            .map_err(|e| Status::NoDetach(Fault::new(e, format!("detach {}", connection))))?;
        debug!("pid {} detached {}", self.pid(), connection);
        Ok(())
    }

    /// Discover a peer's channel by probing channel numbers in order
    ///
    /// Attaches to the first channel of `pid` that accepts the connection,
    /// trying `1..=max_channel_probe`.
    pub fn find_connection(&self, pid: Pid) -> IpcResult<(ChannelHandle, ConnectionHandle)> {
        let max = self.config().max_channel_probe;
        for chid in 1..=max {
            let channel = ChannelHandle(chid);
            if let Ok(connection) = self.attach(channel, Some(pid)) {
                debug!("pid {} found pid {} on channel {}", self.pid(), pid, chid);
                return Ok((channel, connection));
            }
        }
        Err(Status::NoAttach(Fault::local(format!(
            "no channel of pid {} in 1..={}",
            pid, max
        ))))
    }
}
