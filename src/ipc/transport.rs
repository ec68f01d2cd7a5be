/*!
 * Message Transport
 *
 * Blocking send/receive/reply, the detached no-block send, and the receive
 * loop that classifies each wakeup as an application pulse, a kernel notice
 * or a message. The layer reports timeouts and signals, it never retries.
 */

use super::context::IpcContext;
use super::types::{Event, Message, PulseCode, ReplyHandle};
use crate::backend::{Delivery, IpcBackend, KernelResult, Reply};
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::limits::DEVICE_MESSAGE_TYPES;
use crate::core::timeout::Deadline;
use crate::core::types::{ConnectionHandle, Pid};
use crate::monitoring::TransactionSpan;
use log::{debug, warn};
use nix::errno::Errno;
use std::sync::Arc;
use std::time::Duration;

/// Map a failed kernel send onto the status taxonomy
fn send_status(errno: Errno, deadline: &Deadline, what: &str) -> Status {
    match errno {
        Errno::ETIMEDOUT => deadline.expired_status(what),
        Errno::EINTR => Status::Interrupted(Fault::new(errno, what)),
        _ => Status::MessageSendError(Fault::new(errno, what)),
    }
}

/// One traced blocking send, shared by the transport and device clients
pub(crate) fn blocking_send(
    backend: &dyn IpcBackend,
    pid: Pid,
    dest: ConnectionHandle,
    message: &Message,
    timeout: Option<Duration>,
) -> IpcResult<Reply> {
    let span = TransactionSpan::new("send", pid);
    span.record_bytes(message.len());
    let deadline = Deadline::new(timeout);
    let result: KernelResult<Reply> = backend.msg_send(pid, dest.coid(), message, timeout);
    let result = result.map_err(|e| send_status(e, &deadline, &format!("send on {}", dest)));
    span.record_outcome(&result);
    result
}

impl IpcContext {
    /// Send and block for the reply
    ///
    /// `None` falls back to the configured default send timeout, which is
    /// itself unbounded unless set.
    pub fn send(
        &self,
        dest: ConnectionHandle,
        message: &Message,
        timeout: Option<Duration>,
    ) -> IpcResult<Message> {
        self.transact(dest, message, timeout).map(|reply| reply.message)
    }

    /// Like `send`, keeping the peer's reply status word
    pub fn transact(
        &self,
        dest: ConnectionHandle,
        message: &Message,
        timeout: Option<Duration>,
    ) -> IpcResult<Reply> {
        let timeout = timeout.or(self.config().default_send_timeout);
        let reply = blocking_send(self.backend().as_ref(), self.pid(), dest, message, timeout)?;
        self.counters().message_sent();
        Ok(reply)
    }

    /// Connect to `pid`, send, and disconnect again
    pub fn send_to_process(
        &self,
        pid: Pid,
        message: &Message,
        timeout: Option<Duration>,
    ) -> IpcResult<Message> {
        let (_, connection) = self.find_connection(pid)?;
        let result = self.send(connection, message, timeout);
        if let Err(e) = self.detach(connection) {
            warn!("pid {} could not detach from pid {}: {}", self.pid(), pid, e);
        }
        result
    }

    /// Send to `pid` on a detached worker and return at once
    ///
    /// The connection is attached before returning, so attach failures are
    /// reported here. Each call gets its own result channel. The worker is
    /// bounded by the configured default send timeout.
    pub fn send_no_block(&self, pid: Pid, message: &Message) -> IpcResult<NoBlockSend> {
        let (_, connection) = self.find_connection(pid)?;
        let (tx, rx) = flume::bounded(1);

        let backend = Arc::clone(self.backend());
        let me = self.pid();
        let timeout = self.config().default_send_timeout;
        let outgoing = message.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("tcs-noblock-{}", connection.coid()))
            .spawn(move || {
                let result = blocking_send(backend.as_ref(), me, connection, &outgoing, timeout)
                    .map(|reply| reply.message);
                if let Err(e) = backend.connect_detach(me, connection.coid()) {
                    debug!("No-block send could not detach {}: {}", connection, e);
                }
                // Receiver dropped means the caller discarded the result
                let _ = tx.send(result);
            });

        if let Err(e) = spawned {
            let _ = self.detach(connection);
            return Err(Status::MessageSendError(Fault::local(format!(
                "spawn no-block worker: {}",
                e
            ))));
        }

        self.counters().no_block_send();
        Ok(NoBlockSend { connection, rx })
    }

    /// Block on the context channel for the next pulse or message
    ///
    /// Disconnect notices are handled here and never returned. Unblock and
    /// coid-death notices are absorbed unless `surface_system_pulses` is
    /// set. A zero timeout polls and reports `WouldBlock`.
    pub fn receive(&self, timeout: Option<Duration>) -> IpcResult<(Event, ReplyHandle)> {
        let channel = self.get_or_create_channel()?;
        let deadline = Deadline::new(timeout);

        loop {
            let delivery = match self.backend().msg_receive(self.pid(), channel.id(), deadline.remaining()) {
                Ok(delivery) => delivery,
                Err(Errno::ETIMEDOUT) => return Err(deadline.expired_status("receive")),
                Err(Errno::EINTR) => {
                    return Err(Status::Interrupted(Fault::new(Errno::EINTR, "receive")))
                }
                Err(e) => {
                    return Err(Status::MessageReceiveError(Fault::new(
                        e,
                        format!("receive on {}", channel),
                    )))
                }
            };

            match delivery {
                Delivery::Pulse(pulse) => {
                    let code = PulseCode::from_raw(pulse.code);
                    match code {
                        PulseCode::Disconnect => {
                            if let Err(e) = self.backend().connect_server_detach(self.pid(), pulse.scoid) {
                                debug!("scoid {} already released: {}", pulse.scoid, e);
                            }
                            self.counters().disconnect_absorbed();
                            continue;
                        }
                        PulseCode::Unblock | PulseCode::CoidDeath if !self.config().surface_system_pulses => {
                            if code == PulseCode::Unblock {
                                self.counters().unblock_absorbed();
                            } else {
                                self.counters().coid_death_absorbed();
                            }
                            warn!(
                                "pid {} absorbed {:?} pulse (value {})",
                                self.pid(),
                                code,
                                pulse.value
                            );
                            continue;
                        }
                        _ => {
                            self.counters().pulse_received();
                            return Ok((
                                Event::Pulse {
                                    code,
                                    sender_value: pulse.value,
                                },
                                ReplyHandle::Pulse(pulse.value),
                            ));
                        }
                    }
                }
                Delivery::Message { rcvid, info, message } => {
                    let msg_type = message.header.msg_type();
                    if DEVICE_MESSAGE_TYPES.contains(&msg_type) {
                        if let Err(e) = self.backend().msg_error(self.pid(), rcvid, Errno::ENOSYS) {
                            debug!("Could not reject device message from pid {}: {}", info.pid, e);
                        }
                        return Err(Status::MessageReceiveError(Fault::new(
                            Errno::ENOSYS,
                            format!("device message 0x{:04x} from pid {} on a plain channel", msg_type, info.pid),
                        )));
                    }
                    self.counters().message_received();
                    return Ok((Event::Message(message), ReplyHandle::Message(rcvid)));
                }
            }
        }
    }

    /// Complete a pending send with `message`
    pub fn reply(&self, handle: ReplyHandle, message: &Message) -> IpcResult<()> {
        self.reply_status(handle, 0, message)
    }

    /// Complete a pending send with an explicit status word
    pub fn reply_status(&self, handle: ReplyHandle, status: i64, message: &Message) -> IpcResult<()> {
        let rcvid = Self::reply_target(handle)?;
        self.backend()
            .msg_reply(self.pid(), rcvid, status, message)
            .map_err(|e| Status::MessageReplyError(Fault::new(e, format!("reply to rcvid {}", rcvid))))?;
        self.counters().reply_sent();
        Ok(())
    }

    /// Fail a pending send with `errno`
    pub fn reply_error(&self, handle: ReplyHandle, errno: Errno) -> IpcResult<()> {
        let rcvid = Self::reply_target(handle)?;
        self.backend()
            .msg_error(self.pid(), rcvid, errno)
            .map_err(|e| Status::MessageReplyError(Fault::new(e, format!("error reply to rcvid {}", rcvid))))?;
        self.counters().reply_sent();
        Ok(())
    }

    fn reply_target(handle: ReplyHandle) -> IpcResult<i64> {
        match handle {
            ReplyHandle::Message(rcvid) => Ok(rcvid),
            ReplyHandle::Pulse(value) => Err(Status::MessageReplyError(Fault::new(
                Errno::EINVAL,
                format!("pulse from {} has no sender to reply to", value),
            ))),
        }
    }
}

/// Result of one `send_no_block` call
///
/// Owns that call's private result channel. Dropping it discards the result;
/// the worker still completes the send.
#[derive(Debug)]
pub struct NoBlockSend {
    connection: ConnectionHandle,
    rx: flume::Receiver<IpcResult<Message>>,
}

impl NoBlockSend {
    /// Connection the worker sends on
    pub fn connection(&self) -> ConnectionHandle {
        self.connection
    }

    /// Wait for the reply
    pub fn wait(self, timeout: Option<Duration>) -> IpcResult<Message> {
        let deadline = Deadline::new(timeout);
        let received = match timeout {
            None => self.rx.recv().map_err(|_| ()),
            Some(t) => match self.rx.recv_timeout(t) {
                Ok(result) => Ok(result),
                Err(flume::RecvTimeoutError::Timeout) => {
                    return Err(deadline.expired_status("no-block send"))
                }
                Err(flume::RecvTimeoutError::Disconnected) => Err(()),
            },
        };
        received.unwrap_or_else(|()| {
            Err(Status::MessageSendError(Fault::local(
                "no-block worker exited without a result",
            )))
        })
    }

    /// The result if the worker has finished
    pub fn try_result(&self) -> Option<IpcResult<Message>> {
        self.rx.try_recv().ok()
    }
}
