/*!
 * Pulse Engine
 *
 * Pulse sources are self-connections: a connection to this process's own
 * channel whose id travels as the pulse value, so the receive loop can tell
 * which source fired without a real sender.
 */

use super::context::IpcContext;
use super::mqueue::MessageQueue;
use super::types::PulseCode;
use crate::backend::PulseEvent;
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::types::ConnectionHandle;
use log::debug;
use nix::errno::Errno;

impl IpcContext {
    /// Create a pulse source delivering `PulseCode::Event`
    pub fn create_pulse(&self) -> IpcResult<ConnectionHandle> {
        let connection = self.attach_self().map_err(|e| Status::NoPulse(e.into_fault("create pulse")))?;
        debug!("pid {} created pulse source {}", self.pid(), connection);
        Ok(connection)
    }

    /// Fire a source created by `create_pulse`
    pub fn trigger_pulse(&self, connection: ConnectionHandle) -> IpcResult<()> {
        self.send_pulse(connection, PulseCode::Event, connection.as_pulse_value())
    }

    /// Queue an application pulse on the connection's channel
    ///
    /// Kernel codes and `Other` values that alias a named code fail with
    /// `EINVAL`.
    pub fn send_pulse(&self, connection: ConnectionHandle, code: PulseCode, value: i32) -> IpcResult<()> {
        if !code.is_user_code() {
            return Err(Status::PulseSendError(Fault::new(
                Errno::EINVAL,
                format!("reserved pulse code {:?} on {}", code, connection),
            )));
        }
        self.backend()
            .msg_send_pulse(self.pid(), connection.coid(), code.raw(), value)
            .map_err(|e| Status::PulseSendError(Fault::new(e, format!("{:?} pulse on {}", code, connection))))?;
        self.counters().pulse_sent();
        Ok(())
    }

    /// Pulse source fired each time `queue` drains from non-empty to empty
    pub fn create_pulse_on_queue_empty(&self, queue: &MessageQueue) -> IpcResult<ConnectionHandle> {
        let connection = self
            .attach_self()
            .map_err(|e| Status::NoPulse(e.into_fault("queue-empty pulse")))?;

        let event = PulseEvent {
            coid: connection.coid(),
            code: PulseCode::MqueueEmpty.raw(),
            value: connection.as_pulse_value(),
        };
        if let Err(e) = self.backend().mq_notify_empty(self.pid(), queue.id(), event) {
            let _ = self.detach(connection);
            return Err(Status::NoPulse(Fault::new(
                e,
                format!("notify on queue {:?}", queue.name()),
            )));
        }
        Ok(connection)
    }

    /// Verify a pulse connection is still live without consuming anything
    pub fn check(&self, connection: ConnectionHandle) -> IpcResult<()> {
        self.backend()
            .connect_check(self.pid(), connection.coid())
            .map_err(|e| Status::NotAPulse(Fault::new(e, format!("check {}", connection))))
    }

    /// Release a pulse source
    pub fn detach_pulse(&self, connection: ConnectionHandle) -> IpcResult<()> {
        self.detach(connection)
    }
}

