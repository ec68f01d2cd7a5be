/*!
 * Local Kernel
 *
 * In-process microkernel personality. Hosts any number of simulated
 * processes, each with its own channels, connections and pending replies,
 * and implements the full `IpcBackend` primitive set on top of them:
 * synchronous send/receive/reply, pulses, timers, message queues,
 * interrupt lines and a path namespace.
 *
 * Kernel notices (disconnect, unblock, coid death) are delivered as
 * pulses with negative codes, gated by the receiving channel's flags.
 */

mod channel;
mod interrupt;
mod mqueue;
mod namespace;
mod process;
mod timer;

use self::channel::{Envelope, SendSlot};
use self::interrupt::InterruptController;
use self::mqueue::QueueTable;
use self::namespace::Namespace;
use self::process::{Connection, Process, ServerConnection};
use self::timer::TimerService;
use super::types::*;
use super::IpcBackend;
use crate::core::config::KernelConfig;
use crate::core::timeout::Deadline;
use crate::core::types::{ChannelId, Coid, InterruptId, IrqLine, MqId, Pid, RcvId, ScoId, TimerId};
use crate::ipc::types::{Message, PulseCode};
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, info, warn};
use nix::errno::Errno;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// First pid handed to a spawned process
const FIRST_PID: Pid = 100;

/// In-process kernel hosting simulated processes
pub struct LocalKernel {
    config: KernelConfig,
    processes: DashMap<Pid, Arc<Process>, RandomState>,
    next_pid: AtomicU32,
    next_rcvid: AtomicI64,
    namespace: Namespace,
    queues: QueueTable,
    interrupts: InterruptController,
    timers: TimerService,
}

impl LocalKernel {
    pub fn new(config: KernelConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<LocalKernel>| {
            let kernel = weak.clone();
            let timers = TimerService::start(Box::new(move |owner, event| {
                match kernel.upgrade() {
                    Some(kernel) => {
                        if let Err(e) = kernel.deliver_event(owner, event) {
                            debug!("Timer pulse for pid {} dropped: {}", owner, e);
                        }
                        true
                    }
                    None => false,
                }
            }));

            info!(
                "Local kernel started (max message {} bytes, {} channels per process)",
                config.max_message_size, config.max_channels_per_process
            );

            Self {
                queues: QueueTable::new(config.max_queue_capacity, config.max_message_size),
                config,
                processes: DashMap::with_hasher(RandomState::new()),
                next_pid: AtomicU32::new(FIRST_PID),
                next_rcvid: AtomicI64::new(1),
                namespace: Namespace::new(),
                interrupts: InterruptController::new(),
                timers,
            }
        })
    }

    /// Kernel with default configuration
    pub fn with_defaults() -> Arc<Self> {
        Self::new(KernelConfig::default())
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // =========================================================================
    // Process simulation
    // =========================================================================

    /// Register a new simulated process
    pub fn spawn_process(&self, name: &str) -> Pid {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        self.processes
            .insert(pid, Arc::new(Process::new(pid, name)));
        info!("Spawned process {} (pid {})", name, pid);
        pid
    }

    pub fn is_running(&self, pid: Pid) -> bool {
        self.processes.get(&pid).map_or(false, |p| p.is_alive())
    }

    /// Tear a process down as if it had exited
    ///
    /// Blocked senders fail with ESRCH, clients receive a coid-death pulse
    /// per connection, servers receive a disconnect pulse, and every
    /// timer, interrupt, name and queue the process held is released.
    pub fn terminate(&self, pid: Pid) -> KernelResult<()> {
        let (_, process) = self.processes.remove(&pid).ok_or(Errno::ESRCH)?;
        process.mark_dead();

        let mut dropped = 0;
        for channel in process.drain_channels() {
            dropped += channel.destroy();
        }
        dropped += process.fail_pending();

        for server in process.drain_server_connections(None) {
            self.notify_coid_death(server);
        }
        for (_, connection) in process.drain_connections() {
            self.release_connection(pid, &connection);
        }

        let timers = self.timers.remove_owner(pid);
        self.interrupts.remove_owner(pid);
        self.namespace.remove_owner(pid, None);
        self.queues.remove_owner(pid);

        info!(
            "Terminated process {} (pid {}): {} senders failed, {} timers removed",
            process.name, pid, dropped, timers
        );
        Ok(())
    }

    /// Interrupt the receive blocked on the process's primary channel
    pub fn signal(&self, pid: Pid) -> KernelResult<()> {
        let process = self.process(pid)?;
        let channel = process.notice_channel().ok_or(Errno::ESRCH)?;
        channel.push(Envelope::Signal)
    }

    /// Raise an interrupt line, returning how many handlers ran
    pub fn raise_interrupt(&self, line: IrqLine) -> usize {
        self.interrupts.raise(line)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn process(&self, pid: Pid) -> KernelResult<Arc<Process>> {
        self.processes
            .get(&pid)
            .map(|p| Arc::clone(p.value()))
            .filter(|p| p.is_alive())
            .ok_or(Errno::ESRCH)
    }

    /// Deliver a kernel event pulse through one of `owner`'s connections
    fn deliver_event(&self, owner: Pid, event: PulseEvent) -> KernelResult<()> {
        let connection = self.process(owner)?.connection(event.coid)?;
        connection.channel.push_pulse(RawPulse {
            code: event.code,
            value: event.value,
            scoid: connection.scoid,
        })
    }

    /// Tell a client its server side went away
    fn notify_coid_death(&self, server: ServerConnection) {
        let Ok(client) = self.process(server.client) else {
            return;
        };
        let Some(channel) = client.notice_channel() else {
            return;
        };
        if channel.flags.coid_death {
            let _ = channel.push_pulse(RawPulse {
                code: PulseCode::RAW_COIDDEATH,
                value: server.coid,
                scoid: 0,
            });
        }
    }

    /// Server-side bookkeeping after a client connection is gone
    fn release_connection(&self, client: Pid, connection: &Connection) {
        let Ok(server) = self.process(connection.target) else {
            return;
        };
        if connection.channel.flags.disconnect && connection.channel.is_alive() {
            // The server releases the scoid itself once it sees the pulse
            let pulse = RawPulse {
                code: PulseCode::RAW_DISCONNECT,
                value: connection.scoid,
                scoid: connection.scoid,
            };
            if connection.channel.push_pulse(pulse).is_ok() {
                return;
            }
        }
        server.remove_server_connection(connection.scoid);
        debug!(
            "Released scoid {} of pid {} for client {}",
            connection.scoid, connection.target, client
        );
    }

    /// Sender gave up waiting; settle the race with the receiver
    fn abandon_send(
        &self,
        connection: &Connection,
        slot: &SendSlot,
        reply_rx: &flume::Receiver<KernelResult<Reply>>,
    ) -> KernelResult<Reply> {
        if let Ok(result) = reply_rx.try_recv() {
            return result;
        }
        if slot.cancel() {
            return Err(Errno::ETIMEDOUT);
        }
        if !slot.abandon() {
            // Replied between the timeout and now; take the reply
            return reply_rx.recv().unwrap_or(Err(Errno::ESRCH));
        }
        // Already received: the server is working on it
        if connection.channel.flags.unblock {
            let _ = connection.channel.push_pulse(RawPulse {
                code: PulseCode::RAW_UNBLOCK,
                value: slot.rcvid() as i32,
                scoid: connection.scoid,
            });
        }
        Err(Errno::ETIMEDOUT)
    }
}

impl IpcBackend for LocalKernel {
    fn name(&self) -> &'static str {
        "local"
    }

    fn channel_create(&self, pid: Pid, flags: ChannelFlags) -> KernelResult<ChannelId> {
        let chid = self
            .process(pid)?
            .create_channel(flags, self.config.max_channels_per_process)?;
        debug!("pid {} created channel {}", pid, chid);
        Ok(chid)
    }

    fn channel_destroy(&self, pid: Pid, chid: ChannelId) -> KernelResult<()> {
        let process = self.process(pid)?;
        let channel = process.remove_channel(chid).ok_or(Errno::EINVAL)?;
        let dropped = channel.destroy();
        for server in process.drain_server_connections(Some(chid)) {
            self.notify_coid_death(server);
        }
        self.namespace.remove_owner(pid, Some(chid));
        debug!("pid {} destroyed channel {} ({} senders failed)", pid, chid, dropped);
        Ok(())
    }

    fn connect_attach(&self, pid: Pid, target: Pid, chid: ChannelId) -> KernelResult<Coid> {
        let client = self.process(pid)?;
        let server = self.process(target)?;
        let channel = server.channel(chid)?;

        let coid = client.alloc_coid();
        let scoid = server.add_server_connection(ServerConnection {
            client: pid,
            coid,
            chid,
        });
        client.insert_connection(
            coid,
            Connection {
                target,
                chid,
                scoid,
                channel,
            },
        );
        debug!("pid {} connected to {}:{} as coid {}", pid, target, chid, coid);
        Ok(coid)
    }

    fn connect_detach(&self, pid: Pid, coid: Coid) -> KernelResult<()> {
        let process = self.process(pid)?;
        let connection = process.remove_connection(coid).ok_or(Errno::EINVAL)?;
        self.release_connection(pid, &connection);
        Ok(())
    }

    fn connect_server_detach(&self, pid: Pid, scoid: ScoId) -> KernelResult<()> {
        self.process(pid)?
            .remove_server_connection(scoid)
            .map(|_| ())
            .ok_or(Errno::EINVAL)
    }

    fn connect_check(&self, pid: Pid, coid: Coid) -> KernelResult<()> {
        let connection = self.process(pid)?.connection(coid)?;
        if !connection.channel.is_alive() || !self.is_running(connection.target) {
            return Err(Errno::ESRCH);
        }
        Ok(())
    }

    fn msg_send(
        &self,
        pid: Pid,
        coid: Coid,
        message: &Message,
        timeout: Option<Duration>,
    ) -> KernelResult<Reply> {
        let connection = self.process(pid)?.connection(coid)?;
        if message.len() > self.config.max_message_size {
            return Err(Errno::E2BIG);
        }

        let info = MessageInfo {
            pid,
            chid: connection.chid,
            scoid: connection.scoid,
            coid,
            msglen: message.len(),
        };
        let (slot, reply_rx) = SendSlot::new(message.clone(), info);
        connection.channel.push(Envelope::Send(Arc::clone(&slot)))?;

        match timeout {
            None => reply_rx.recv().map_err(|_| Errno::ESRCH)?,
            Some(timeout) => match reply_rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(flume::RecvTimeoutError::Timeout) => {
                    self.abandon_send(&connection, &slot, &reply_rx)
                }
                Err(flume::RecvTimeoutError::Disconnected) => Err(Errno::ESRCH),
            },
        }
    }

    fn msg_send_pulse(&self, pid: Pid, coid: Coid, code: i8, value: i32) -> KernelResult<()> {
        // Negative codes belong to the kernel
        if code < 0 {
            return Err(Errno::EINVAL);
        }
        let connection = self.process(pid)?.connection(coid)?;
        connection.channel.push_pulse(RawPulse {
            code,
            value,
            scoid: connection.scoid,
        })
    }

    fn msg_receive(
        &self,
        pid: Pid,
        chid: ChannelId,
        timeout: Option<Duration>,
    ) -> KernelResult<Delivery> {
        let process = self.process(pid)?;
        let channel = process.channel(chid)?;
        let deadline = Deadline::new(timeout);

        loop {
            let envelope = match deadline.remaining() {
                None => channel.receiver().recv().map_err(|_| Errno::EBADF)?,
                Some(left) if left.is_zero() => {
                    channel.receiver().try_recv().map_err(|_| Errno::ETIMEDOUT)?
                }
                Some(left) => channel
                    .receiver()
                    .recv_timeout(left)
                    .map_err(|_| Errno::ETIMEDOUT)?,
            };

            match envelope {
                Envelope::Pulse(pulse) => return Ok(Delivery::Pulse(pulse)),
                Envelope::Send(slot) => {
                    let rcvid = self.next_rcvid.fetch_add(1, Ordering::Relaxed);
                    if !slot.mark_received(rcvid) {
                        // Sender timed out while queued
                        continue;
                    }
                    let delivery = Delivery::Message {
                        rcvid,
                        info: slot.info,
                        message: slot.message.clone(),
                    };
                    process.hold(rcvid, slot);
                    return Ok(delivery);
                }
                Envelope::Signal => return Err(Errno::EINTR),
                Envelope::Closed => return Err(Errno::EBADF),
            }
        }
    }

    fn msg_reply(&self, pid: Pid, rcvid: RcvId, status: i64, message: &Message) -> KernelResult<()> {
        let slot = self.process(pid)?.take_pending(rcvid)?;
        if message.len() > self.config.max_message_size {
            let _ = slot.complete(Err(Errno::E2BIG));
            return Err(Errno::E2BIG);
        }
        slot.complete(Ok(Reply {
            status,
            message: message.clone(),
        }))
    }

    fn msg_error(&self, pid: Pid, rcvid: RcvId, errno: Errno) -> KernelResult<()> {
        self.process(pid)?.take_pending(rcvid)?.complete(Err(errno))
    }

    fn timer_create(&self, pid: Pid, event: PulseEvent) -> KernelResult<TimerId> {
        self.process(pid)?.connection(event.coid)?;
        Ok(self.timers.create(pid, event))
    }

    fn timer_settime(&self, pid: Pid, timer: TimerId, spec: TimerSpec) -> KernelResult<()> {
        self.timers.settime(pid, timer, spec)
    }

    fn timer_delete(&self, pid: Pid, timer: TimerId) -> KernelResult<()> {
        self.timers.delete(pid, timer)
    }

    fn mq_open(&self, pid: Pid, name: &str, capacity: usize) -> KernelResult<MqId> {
        self.process(pid)?;
        self.queues.open(pid, name, capacity)
    }

    fn mq_close(&self, pid: Pid, mq: MqId) -> KernelResult<()> {
        self.queues.close(pid, mq)
    }

    fn mq_send(&self, pid: Pid, mq: MqId, data: &[u8]) -> KernelResult<()> {
        self.queues.send(pid, mq, data)
    }

    fn mq_receive(&self, pid: Pid, mq: MqId) -> KernelResult<Vec<u8>> {
        let (data, drained) = self.queues.receive(pid, mq)?;
        for (owner, event) in drained {
            if let Err(e) = self.deliver_event(owner, event) {
                warn!("Queue-empty pulse for pid {} dropped: {}", owner, e);
            }
        }
        Ok(data)
    }

    fn mq_notify_empty(&self, pid: Pid, mq: MqId, event: PulseEvent) -> KernelResult<()> {
        self.process(pid)?.connection(event.coid)?;
        self.queues.notify_empty(pid, mq, event)
    }

    fn io_privilege(&self, pid: Pid) -> KernelResult<()> {
        self.process(pid)?.grant_io_privilege();
        Ok(())
    }

    fn interrupt_attach(
        &self,
        pid: Pid,
        line: IrqLine,
        handler: InterruptHandler,
    ) -> KernelResult<InterruptId> {
        if !self.process(pid)?.has_io_privilege() {
            return Err(Errno::EPERM);
        }
        Ok(self.interrupts.attach(pid, line, handler))
    }

    fn interrupt_detach(&self, pid: Pid, id: InterruptId) -> KernelResult<()> {
        self.interrupts.detach(pid, id)
    }

    fn interrupt_mask(&self, line: IrqLine, id: InterruptId) -> KernelResult<u32> {
        self.interrupts.mask(line, id)
    }

    fn interrupt_unmask(&self, line: IrqLine, id: InterruptId) -> KernelResult<u32> {
        self.interrupts.unmask(line, id)
    }

    fn interrupt_disable(&self) {
        self.interrupts.disable();
    }

    fn interrupt_enable(&self) {
        self.interrupts.enable();
    }

    fn path_attach(&self, pid: Pid, path: &str, chid: ChannelId) -> KernelResult<()> {
        self.process(pid)?.channel(chid)?;
        self.namespace.attach(path, pid, chid)?;
        debug!("pid {} attached {} to channel {}", pid, path, chid);
        Ok(())
    }

    fn path_detach(&self, pid: Pid, path: &str) -> KernelResult<()> {
        self.namespace.detach(path, pid)
    }

    fn path_resolve(&self, path: &str) -> KernelResult<(Pid, ChannelId)> {
        let (pid, chid) = self.namespace.resolve(path)?;
        if !self.is_running(pid) {
            return Err(Errno::ENOENT);
        }
        Ok((pid, chid))
    }
}
