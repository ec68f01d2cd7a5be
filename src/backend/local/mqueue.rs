/*!
 * Message Queues
 * Named bounded FIFO queues with drain-to-empty notification
 */

use crate::backend::types::{KernelResult, PulseEvent};
use crate::core::types::{MqId, Pid};
use log::debug;
use nix::errno::Errno;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

struct Queue {
    name: String,
    messages: VecDeque<Vec<u8>>,
    capacity: usize,
    /// Open count per process
    openers: HashMap<Pid, usize>,
    notify: Vec<(Pid, PulseEvent)>,
}

#[derive(Default)]
struct TableState {
    names: HashMap<String, MqId>,
    queues: HashMap<MqId, Queue>,
    next_id: MqId,
}

pub(super) struct QueueTable {
    state: Mutex<TableState>,
    max_capacity: usize,
    max_message_size: usize,
}

impl QueueTable {
    pub fn new(max_capacity: usize, max_message_size: usize) -> Self {
        Self {
            state: Mutex::new(TableState {
                next_id: 1,
                ..Default::default()
            }),
            max_capacity,
            max_message_size,
        }
    }

    /// Open `name`, creating it with `capacity` when absent
    pub fn open(&self, owner: Pid, name: &str, capacity: usize) -> KernelResult<MqId> {
        if name.is_empty() || capacity == 0 || capacity > self.max_capacity {
            return Err(Errno::EINVAL);
        }

        let mut state = self.state.lock();
        let id = match state.names.get(name) {
            Some(&id) => id,
            None => {
                let id = state.next_id;
                state.next_id += 1;
                state.names.insert(name.to_string(), id);
                state.queues.insert(
                    id,
                    Queue {
                        name: name.to_string(),
                        messages: VecDeque::with_capacity(capacity),
                        capacity,
                        openers: HashMap::new(),
                        notify: Vec::new(),
                    },
                );
                debug!("Created message queue {:?} ({} slots)", name, capacity);
                id
            }
        };

        if let Some(queue) = state.queues.get_mut(&id) {
            *queue.openers.entry(owner).or_insert(0) += 1;
        }
        Ok(id)
    }

    /// Close one open of `mq`; the queue goes away with its last opener
    pub fn close(&self, owner: Pid, mq: MqId) -> KernelResult<()> {
        let mut state = self.state.lock();
        let queue = state.queues.get_mut(&mq).ok_or(Errno::EBADF)?;
        let count = queue.openers.get_mut(&owner).ok_or(Errno::EBADF)?;
        *count -= 1;
        if *count == 0 {
            queue.openers.remove(&owner);
            queue.notify.retain(|(pid, _)| *pid != owner);
        }
        if queue.openers.is_empty() {
            let name = queue.name.clone();
            state.queues.remove(&mq);
            state.names.remove(&name);
            debug!("Removed message queue {:?}", name);
        }
        Ok(())
    }

    pub fn send(&self, owner: Pid, mq: MqId, data: &[u8]) -> KernelResult<()> {
        if data.len() > self.max_message_size {
            return Err(Errno::EMSGSIZE);
        }
        let mut state = self.state.lock();
        let queue = Self::opened(&mut state, owner, mq)?;
        if queue.messages.len() >= queue.capacity {
            return Err(Errno::EAGAIN);
        }
        queue.messages.push_back(data.to_vec());
        Ok(())
    }

    /// Pop the oldest message, plus the events to fire if the queue drained
    pub fn receive(&self, owner: Pid, mq: MqId) -> KernelResult<(Vec<u8>, Vec<(Pid, PulseEvent)>)> {
        let mut state = self.state.lock();
        let queue = Self::opened(&mut state, owner, mq)?;
        let data = queue.messages.pop_front().ok_or(Errno::EAGAIN)?;
        let drained = if queue.messages.is_empty() {
            queue.notify.clone()
        } else {
            Vec::new()
        };
        Ok((data, drained))
    }

    pub fn notify_empty(&self, owner: Pid, mq: MqId, event: PulseEvent) -> KernelResult<()> {
        let mut state = self.state.lock();
        let queue = Self::opened(&mut state, owner, mq)?;
        queue.notify.push((owner, event));
        Ok(())
    }

    pub fn remove_owner(&self, owner: Pid) {
        let mut state = self.state.lock();
        let ids: Vec<MqId> = state.queues.keys().copied().collect();
        for id in ids {
            Self::forget_opener(&mut state, owner, id);
        }
    }

    fn forget_opener(state: &mut TableState, owner: Pid, mq: MqId) {
        let Some(queue) = state.queues.get_mut(&mq) else {
            return;
        };
        if queue.openers.remove(&owner).is_none() {
            return;
        }
        queue.notify.retain(|(pid, _)| *pid != owner);
        if queue.openers.is_empty() {
            let name = queue.name.clone();
            state.queues.remove(&mq);
            state.names.remove(&name);
        }
    }

    fn opened(state: &mut TableState, owner: Pid, mq: MqId) -> KernelResult<&mut Queue> {
        state
            .queues
            .get_mut(&mq)
            .filter(|q| q.openers.contains_key(&owner))
            .ok_or(Errno::EBADF)
    }
}
