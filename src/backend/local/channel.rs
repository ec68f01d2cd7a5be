/*!
 * Kernel Channel
 * FIFO of pulses and send requests owned by one process
 */

use super::super::types::{ChannelFlags, KernelResult, MessageInfo, RawPulse, Reply};
use crate::core::types::RcvId;
use crate::ipc::types::Message;
use nix::errno::Errno;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

const SLOT_QUEUED: u8 = 0;
const SLOT_RECEIVED: u8 = 1;
const SLOT_CANCELLED: u8 = 2;
const SLOT_REPLIED: u8 = 3;
const SLOT_ABANDONED: u8 = 4;

/// A blocking send parked on a channel
///
/// The slot moves QUEUED -> RECEIVED when a server picks it up, or
/// QUEUED -> CANCELLED when the sender gives up first. A received slot then
/// ends REPLIED or ABANDONED. Exactly one transition wins at each step.
pub(super) struct SendSlot {
    pub message: Message,
    pub info: MessageInfo,
    reply_tx: flume::Sender<KernelResult<Reply>>,
    state: AtomicU8,
    rcvid: AtomicI64,
}

impl SendSlot {
    pub fn new(
        message: Message,
        info: MessageInfo,
    ) -> (Arc<Self>, flume::Receiver<KernelResult<Reply>>) {
        let (reply_tx, reply_rx) = flume::bounded(1);
        let slot = Arc::new(Self {
            message,
            info,
            reply_tx,
            state: AtomicU8::new(SLOT_QUEUED),
            rcvid: AtomicI64::new(0),
        });
        (slot, reply_rx)
    }

    /// Claim the slot for a receiver; false if the sender already gave up
    pub fn mark_received(&self, rcvid: RcvId) -> bool {
        let claimed = self
            .state
            .compare_exchange(SLOT_QUEUED, SLOT_RECEIVED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.rcvid.store(rcvid, Ordering::Release);
        }
        claimed
    }

    /// Withdraw the send; false if a receiver already holds it
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(SLOT_QUEUED, SLOT_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give up on a received send; false if a reply is already on its way
    pub fn abandon(&self) -> bool {
        self.state
            .compare_exchange(SLOT_RECEIVED, SLOT_ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn rcvid(&self) -> RcvId {
        self.rcvid.load(Ordering::Acquire)
    }

    /// Complete the send; fails if the sender stopped waiting
    pub fn complete(&self, result: KernelResult<Reply>) -> KernelResult<()> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| match state {
                SLOT_QUEUED | SLOT_RECEIVED => Some(SLOT_REPLIED),
                _ => None,
            })
            .map_err(|_| Errno::ESRCH)?;
        self.reply_tx.try_send(result).map_err(|_| Errno::ESRCH)
    }
}

/// Item queued on a channel
pub(super) enum Envelope {
    Pulse(RawPulse),
    Send(Arc<SendSlot>),
    /// Signal delivered to the owning process
    Signal,
    /// Channel destroyed while a receiver may be blocked on it
    Closed,
}

pub(super) struct Channel {
    pub flags: ChannelFlags,
    tx: flume::Sender<Envelope>,
    rx: flume::Receiver<Envelope>,
    alive: AtomicBool,
}

impl Channel {
    pub fn new(flags: ChannelFlags) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            flags,
            tx,
            rx,
            alive: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn receiver(&self) -> &flume::Receiver<Envelope> {
        &self.rx
    }

    /// Queue an envelope, failing with ESRCH once the channel is gone
    pub fn push(&self, envelope: Envelope) -> KernelResult<()> {
        if !self.is_alive() {
            return Err(Errno::ESRCH);
        }
        self.tx.send(envelope).map_err(|_| Errno::ESRCH)?;
        // Destroyed between the check and the send: nobody will drain it
        if !self.is_alive() {
            self.drain();
            return Err(Errno::ESRCH);
        }
        Ok(())
    }

    pub fn push_pulse(&self, pulse: RawPulse) -> KernelResult<()> {
        self.push(Envelope::Pulse(pulse))
    }

    /// Mark dead, fail queued senders and wake a blocked receiver
    pub fn destroy(&self) -> usize {
        self.alive.store(false, Ordering::Release);
        let dropped = self.drain();
        let _ = self.tx.send(Envelope::Closed);
        dropped
    }

    fn drain(&self) -> usize {
        let mut dropped = 0;
        for envelope in self.rx.drain() {
            if let Envelope::Send(slot) = envelope {
                let _ = slot.complete(Err(Errno::ESRCH));
                dropped += 1;
            }
        }
        dropped
    }
}
