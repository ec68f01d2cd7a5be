/*!
 * Resource-Manager Dispatch
 *
 * Serves one device path from a dedicated channel. `receive_request`
 * decodes the next request into a `ResourceRequest`, handling disconnects
 * and malformed traffic itself; `dispatch` consumes the request, runs the
 * matching handler and sends exactly one reply of the matching shape.
 */

use super::types::{ControlReply, DeviceHandlers, DeviceState, Ocb, Origin, ResourceRequest};
use super::wire::{self, WireRequest};
use crate::backend::{ChannelFlags, Delivery, IpcBackend};
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::timeout::Deadline;
use crate::core::types::{ChannelHandle, Pid, ScoId};
use crate::ipc::context::IpcContext;
use crate::ipc::types::{Message, PulseCode};
use crate::monitoring::TransactionSpan;
use ahash::RandomState;
use log::{debug, info, warn};
use nix::errno::Errno;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receive timeout used by `run` between shutdown checks
const RUN_POLL: Duration = Duration::from_millis(100);

/// Device path for a registration name; absolute names are kept as given
pub fn device_path(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/dev/{}", name)
    }
}

pub struct ResourceManager<H: DeviceHandlers> {
    backend: Arc<dyn IpcBackend>,
    pid: Pid,
    path: String,
    channel: ChannelHandle,
    handlers: H,
    ocbs: HashMap<ScoId, Ocb, RandomState>,
    state: DeviceState,
}

impl<H: DeviceHandlers> ResourceManager<H> {
    /// Register `handlers` as the device `name`
    pub fn register_device(ctx: &IpcContext, name: &str, handlers: H) -> IpcResult<Self> {
        let backend = Arc::clone(ctx.backend());
        let pid = ctx.pid();
        let path = device_path(name);

        let chid = backend
            .channel_create(pid, ChannelFlags::ALL)
            .map_err(|e| Status::NoDispatchHandle(Fault::new(e, format!("dispatch channel for {}", path))))?;

        if let Err(e) = backend.path_attach(pid, &path, chid) {
            let _ = backend.channel_destroy(pid, chid);
            return Err(Status::NoPrefixAttach(Fault::new(e, format!("attach {}", path))));
        }

        info!("pid {} registered device {} on chid {}", pid, path, chid);
        Ok(Self {
            backend,
            pid,
            path,
            channel: ChannelHandle(chid),
            handlers,
            ocbs: HashMap::with_hasher(RandomState::new()),
            state: DeviceState::Registered,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn channel(&self) -> ChannelHandle {
        self.channel
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Number of client opens currently tracked
    pub fn open_count(&self) -> usize {
        self.ocbs.len()
    }

    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    /// Block for the next device request
    pub fn receive_request(&mut self, timeout: Option<Duration>) -> IpcResult<ResourceRequest> {
        self.ensure_registered()?;
        self.state = DeviceState::AwaitingRequest;
        let deadline = Deadline::new(timeout);

        loop {
            let delivery = match self
                .backend
                .msg_receive(self.pid, self.channel.id(), deadline.remaining())
            {
                Ok(delivery) => delivery,
                Err(Errno::ETIMEDOUT) => return Err(deadline.expired_status("device receive")),
                Err(Errno::EINTR) => {
                    return Err(Status::Interrupted(Fault::new(Errno::EINTR, "device receive")))
                }
                Err(e) => {
                    return Err(Status::ResourceReceiveError(Fault::new(
                        e,
                        format!("receive on {}", self.path),
                    )))
                }
            };

            match delivery {
                Delivery::Pulse(pulse) => {
                    if PulseCode::from_raw(pulse.code) == PulseCode::Disconnect {
                        self.client_gone(pulse.scoid);
                    } else {
                        debug!("{} ignored pulse {:?}", self.path, PulseCode::from_raw(pulse.code));
                    }
                }
                Delivery::Message { rcvid, info, message } => {
                    let origin = Origin {
                        rcvid,
                        scoid: info.scoid,
                        pid: info.pid,
                        coid: info.coid,
                    };
                    match self.decode(origin, &message) {
                        Ok(request) => {
                            self.state = DeviceState::Dispatching;
                            return Ok(request);
                        }
                        Err(errno) => {
                            debug!("{} rejected message from pid {}: {}", self.path, info.pid, errno);
                            self.error_reply(rcvid, errno)?;
                        }
                    }
                }
            }
        }
    }

    /// Run the handler for `request` and send its one reply
    pub fn dispatch(&mut self, request: ResourceRequest) -> IpcResult<()> {
        let span = TransactionSpan::new(request.kind(), self.pid);
        let result = self.dispatch_inner(request);
        span.record_outcome(&result);
        if self.state == DeviceState::Dispatching {
            self.state = DeviceState::AwaitingRequest;
        }
        result
    }

    /// Receive and dispatch one request
    pub fn handle_next(&mut self, timeout: Option<Duration>) -> IpcResult<()> {
        let request = self.receive_request(timeout)?;
        self.dispatch(request)
    }

    /// Serve requests until `shutdown` is set or receiving fails
    ///
    /// Timeouts and failed replies (a client that gave up) keep the loop
    /// going; any other receive failure ends it.
    pub fn run(&mut self, shutdown: &AtomicBool) -> IpcResult<()> {
        while !shutdown.load(Ordering::Acquire) {
            match self.handle_next(Some(RUN_POLL)) {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {}
                Err(Status::ResourceReplyError(fault)) => {
                    warn!("{}: {}", self.path, fault);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Withdraw the device path and destroy the dispatch channel
    pub fn unregister(mut self) -> IpcResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> IpcResult<()> {
        if self.state == DeviceState::Unregistered {
            return Ok(());
        }
        self.state = DeviceState::Unregistered;
        self.ocbs.clear();
        let detached = self
            .backend
            .path_detach(self.pid, &self.path)
            .map_err(|e| Status::ResourceManagerError(Fault::new(e, format!("detach {}", self.path))));
        let _ = self.backend.channel_destroy(self.pid, self.channel.id());
        info!("pid {} unregistered device {}", self.pid, self.path);
        detached
    }

    fn ensure_registered(&self) -> IpcResult<()> {
        if self.state == DeviceState::Unregistered {
            return Err(Status::ResourceManagerError(Fault::new(
                Errno::EBADF,
                format!("{} is not registered", self.path),
            )));
        }
        Ok(())
    }

    /// Client connection closed: drop its open, calling close if still open
    fn client_gone(&mut self, scoid: ScoId) {
        if let Some(ocb) = self.ocbs.remove(&scoid) {
            let origin = Origin {
                rcvid: 0,
                scoid,
                pid: ocb.client,
                coid: ocb.client_coid,
            };
            if let Err(e) = self.handlers.close(&ocb, &origin) {
                debug!("{} implicit close for scoid {} failed: {}", self.path, scoid, e);
            }
        }
        let _ = self.backend.connect_server_detach(self.pid, scoid);
    }

    fn decode(&self, origin: Origin, message: &Message) -> Result<ResourceRequest, Errno> {
        let wire = wire::decode_request(message)?;
        if let WireRequest::Connect { path, ioflag } = wire {
            return Ok(ResourceRequest::Open { origin, path, ioflag });
        }
        if let WireRequest::Dup { source } = wire {
            return Ok(ResourceRequest::Dup { origin, source });
        }

        // Everything else needs an open on this connection
        let ocb = self.ocbs.get(&origin.scoid).ok_or(Errno::EBADF)?;
        Ok(match wire {
            WireRequest::Read { nbytes } => ResourceRequest::Read {
                origin,
                offset: ocb.offset,
                length: nbytes,
            },
            WireRequest::Write { nbytes, data } => ResourceRequest::Write {
                origin,
                offset: ocb.offset,
                length: nbytes,
                bytes: data,
            },
            WireRequest::Devctl { dcmd, nbytes, data } => ResourceRequest::Control {
                origin,
                code: dcmd,
                input: data,
                out_capacity: nbytes,
            },
            WireRequest::Close => ResourceRequest::Close { origin },
            WireRequest::Connect { .. } | WireRequest::Dup { .. } => return Err(Errno::EINVAL),
        })
    }

    fn dispatch_inner(&mut self, request: ResourceRequest) -> IpcResult<()> {
        let origin = request.origin();
        match request {
            ResourceRequest::Open { path, ioflag, .. } => {
                match self.handlers.open(&path, ioflag, &origin) {
                    Ok(()) => {
                        self.ocbs.insert(
                            origin.scoid,
                            Ocb {
                                offset: 0,
                                ioflag,
                                client: origin.pid,
                                client_coid: origin.coid,
                            },
                        );
                        self.status_reply(origin, 0, Message::empty())
                    }
                    Err(errno) => self.error_reply(origin.rcvid, errno),
                }
            }
            ResourceRequest::Close { .. } => {
                let Some(ocb) = self.ocbs.remove(&origin.scoid) else {
                    return self.error_reply(origin.rcvid, Errno::EBADF);
                };
                match self.handlers.close(&ocb, &origin) {
                    Ok(()) => self.status_reply(origin, 0, Message::empty()),
                    Err(errno) => self.error_reply(origin.rcvid, errno),
                }
            }
            ResourceRequest::Dup { source, .. } => {
                let Some(shared) = self
                    .ocbs
                    .values()
                    .find(|o| o.client == origin.pid && o.client_coid == source)
                    .copied()
                else {
                    return self.error_reply(origin.rcvid, Errno::EBADF);
                };
                let ocb = Ocb {
                    client_coid: origin.coid,
                    ..shared
                };
                match self.handlers.dup(&ocb, &origin) {
                    Ok(()) => {
                        self.ocbs.insert(origin.scoid, ocb);
                        self.status_reply(origin, 0, Message::empty())
                    }
                    Err(errno) => self.error_reply(origin.rcvid, errno),
                }
            }
            ResourceRequest::Read { length, .. } => {
                let outcome = self
                    .open_ocb(origin.scoid)
                    .and_then(|ocb| self.handlers.read(&ocb, length));
                match outcome {
                    Ok(mut data) => {
                        data.truncate(length);
                        let count = data.len();
                        self.advance(origin.scoid, count);
                        self.status_reply(origin, count as i64, Message::new(data))
                    }
                    Err(errno) => self.error_reply(origin.rcvid, errno),
                }
            }
            ResourceRequest::Write { bytes, .. } => {
                let outcome = self
                    .open_ocb(origin.scoid)
                    .and_then(|ocb| self.handlers.write(&ocb, &bytes));
                match outcome {
                    Ok(consumed) => {
                        let count = consumed.min(bytes.len());
                        self.advance(origin.scoid, count);
                        self.status_reply(origin, count as i64, Message::empty())
                    }
                    Err(errno) => self.error_reply(origin.rcvid, errno),
                }
            }
            ResourceRequest::Control {
                code,
                input,
                out_capacity,
                ..
            } => {
                let outcome = self
                    .open_ocb(origin.scoid)
                    .and_then(|ocb| self.handlers.control(&ocb, code, &input, out_capacity));
                match outcome {
                    Ok(ControlReply { ret_val, mut out }) => {
                        out.truncate(out_capacity);
                        self.status_reply(origin, 0, wire::encode_devctl_reply(ret_val, out))
                    }
                    Err(errno) => self.error_reply(origin.rcvid, errno),
                }
            }
        }
    }

    /// OCB for a data request; a close racing the request fails it with EBADF
    fn open_ocb(&self, scoid: ScoId) -> Result<Ocb, Errno> {
        self.ocbs.get(&scoid).copied().ok_or(Errno::EBADF)
    }

    fn advance(&mut self, scoid: ScoId, count: usize) {
        if let Some(ocb) = self.ocbs.get_mut(&scoid) {
            ocb.offset += count as u64;
        }
    }

    fn status_reply(&self, origin: Origin, status: i64, message: Message) -> IpcResult<()> {
        self.backend
            .msg_reply(self.pid, origin.rcvid, status, &message)
            .map_err(|e| Status::ResourceReplyError(Fault::new(e, format!("reply to pid {}", origin.pid))))
    }

    fn error_reply(&self, rcvid: i64, errno: Errno) -> IpcResult<()> {
        self.backend
            .msg_error(self.pid, rcvid, errno)
            .map_err(|e| Status::ResourceReplyError(Fault::new(e, format!("error reply {}", errno))))
    }
}

impl<H: DeviceHandlers> Drop for ResourceManager<H> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            debug!("Device teardown: {}", e);
        }
    }
}
