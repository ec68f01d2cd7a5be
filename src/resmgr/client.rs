/*!
 * Device Client
 * Client side of the device protocol: open, read, write, control, dup, close
 */

use super::types::ControlReply;
use super::wire;
use crate::backend::{IpcBackend, Reply};
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::types::{ChannelId, ConnectionHandle, Pid};
use crate::ipc::context::IpcContext;
use crate::ipc::transport::blocking_send;
use crate::ipc::types::Message;
use log::{debug, warn};
use nix::errno::Errno;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Open connection to a device path
pub struct DeviceFile {
    backend: Arc<dyn IpcBackend>,
    pid: Pid,
    path: String,
    server: Pid,
    chid: ChannelId,
    ioflag: u32,
    connection: ConnectionHandle,
    timeout: Option<Duration>,
    closed: bool,
}

impl IpcContext {
    /// Open `path` on the device registered there
    pub fn open_device(&self, path: &str, ioflag: u32) -> IpcResult<DeviceFile> {
        let (server, chid) = self
            .backend()
            .path_resolve(path)
            .map_err(|e| Status::FileError(Fault::new(e, format!("resolve {}", path))))?;

        DeviceFile::connect(
            Arc::clone(self.backend()),
            self.pid(),
            path,
            server,
            chid,
            ioflag,
            self.config().default_send_timeout,
        )
    }
}

impl DeviceFile {
    fn connect(
        backend: Arc<dyn IpcBackend>,
        pid: Pid,
        path: &str,
        server: Pid,
        chid: ChannelId,
        ioflag: u32,
        timeout: Option<Duration>,
    ) -> IpcResult<Self> {
        let coid = backend
            .connect_attach(pid, server, chid)
            .map_err(|e| Status::FileError(Fault::new(e, format!("connect to {}", path))))?;

        let mut file = Self {
            backend,
            pid,
            path: path.to_string(),
            server,
            chid,
            ioflag,
            connection: ConnectionHandle(coid),
            timeout,
            // Nothing to close on the server until the open succeeds
            closed: true,
        };
        file.request(&wire::encode_connect(path, ioflag))
            .map_err(|e| Status::FileError(e.into_fault("open")))?;
        file.closed = false;
        debug!("pid {} opened {} as {}", pid, path, file.connection);
        Ok(file)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.connection
    }

    /// Timeout for each request on this file, `None` blocks
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Read up to `len` bytes from the current offset
    pub fn read(&mut self, len: usize) -> IpcResult<Vec<u8>> {
        let reply = self
            .request(&wire::encode_read(len))
            .map_err(|e| Status::MessageReadError(e.into_fault("read")))?;
        let count = usize::try_from(reply.status).unwrap_or(0);
        let mut data = reply.message.payload;
        data.truncate(count.min(len));
        Ok(data)
    }

    /// Write `data`, returning how many bytes the device took
    pub fn write(&mut self, data: &[u8]) -> IpcResult<usize> {
        let reply = self
            .request(&wire::encode_write(data))
            .map_err(|e| Status::MessageWriteError(e.into_fault("write")))?;
        Ok(usize::try_from(reply.status).unwrap_or(0))
    }

    /// Device-specific control request
    pub fn control(&mut self, code: i32, input: &[u8], out_capacity: usize) -> IpcResult<ControlReply> {
        let reply = self
            .request(&wire::encode_devctl(code, input, out_capacity))
            .map_err(|e| Status::DeviceControlError(e.into_fault("control")))?;
        let (ret_val, out) = wire::decode_devctl_reply(&reply.message).map_err(|e| {
            Status::DeviceControlError(Fault::new(e, format!("malformed control reply from {}", self.path)))
        })?;
        Ok(ControlReply::new(ret_val, out))
    }

    /// Second open starting from this one's offset and flags
    pub fn dup(&self) -> IpcResult<DeviceFile> {
        let coid = self
            .backend
            .connect_attach(self.pid, self.server, self.chid)
            .map_err(|e| Status::FileError(Fault::new(e, format!("dup {}", self.path))))?;

        let mut copy = Self {
            backend: Arc::clone(&self.backend),
            pid: self.pid,
            path: self.path.clone(),
            server: self.server,
            chid: self.chid,
            ioflag: self.ioflag,
            connection: ConnectionHandle(coid),
            timeout: self.timeout,
            closed: true,
        };
        copy.request(&wire::encode_dup(self.connection.coid()))
            .map_err(|e| Status::FileError(e.into_fault("dup")))?;
        copy.closed = false;
        Ok(copy)
    }

    /// Close on the server, then drop the connection
    pub fn close(mut self) -> IpcResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> IpcResult<()> {
        let closed = if self.closed {
            Ok(())
        } else {
            self.closed = true;
            self.request(&wire::encode_close())
                .map(|_| ())
                .map_err(|e| Status::FileError(e.into_fault("close")))
        };
        let detached = self
            .backend
            .connect_detach(self.pid, self.connection.coid())
            .map_err(|e| Status::FileError(Fault::new(e, format!("detach {}", self.connection))));
        self.connection = ConnectionHandle(-1);
        closed.and(detached)
    }

    fn request(&self, message: &Message) -> IpcResult<Reply> {
        if self.connection.coid() < 0 {
            return Err(Status::FileError(Fault::new(Errno::EBADF, "file is closed")));
        }
        blocking_send(self.backend.as_ref(), self.pid, self.connection, message, self.timeout)
    }
}

impl Drop for DeviceFile {
    fn drop(&mut self) {
        if self.connection.coid() >= 0 {
            if let Err(e) = self.shutdown() {
                warn!("Implicit close of {} failed: {}", self.path, e);
            }
        }
    }
}

impl fmt::Debug for DeviceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceFile")
            .field("path", &self.path)
            .field("server", &self.server)
            .field("connection", &self.connection)
            .finish()
    }
}
