/*!
 * Name Service
 * Publish the context channel under a name and connect to peers by name
 */

use super::context::IpcContext;
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::limits::NAME_PREFIX;
use crate::core::types::{ChannelHandle, ConnectionHandle};
use log::info;

/// Namespace path a name is registered under
pub fn name_path(name: &str) -> String {
    format!("{}{}", NAME_PREFIX, name)
}

impl IpcContext {
    /// Register this process's channel as `name`
    pub fn name_attach(&self, name: &str) -> IpcResult<ChannelHandle> {
        let channel = self.get_or_create_channel()?;
        let path = name_path(name);
        self.backend()
            .path_attach(self.pid(), &path, channel.id())
            .map_err(|e| Status::NoPrefixAttach(Fault::new(e, format!("attach {}", path))))?;
        info!("pid {} registered {} on {}", self.pid(), path, channel);
        Ok(channel)
    }

    pub fn name_detach(&self, name: &str) -> IpcResult<()> {
        let path = name_path(name);
        self.backend()
            .path_detach(self.pid(), &path)
            .map_err(|e| Status::NoPrefixAttach(Fault::new(e, format!("detach {}", path))))
    }

    /// Connect to the process registered as `name`
    pub fn name_open(&self, name: &str) -> IpcResult<ConnectionHandle> {
        let path = name_path(name);
        let (pid, chid) = self
            .backend()
            .path_resolve(&path)
            .map_err(|e| Status::NoNameOpen(Fault::new(e, format!("resolve {}", path))))?;
        self.attach(ChannelHandle(chid), Some(pid))
            .map_err(|e| Status::NoNameOpen(e.into_fault(&path)))
    }

    pub fn name_close(&self, connection: ConnectionHandle) -> IpcResult<()> {
        self.detach(connection)
            .map_err(|e| Status::NoNameClose(e.into_fault("name close")))
    }
}
