/*!
 * Message Queues
 * Named bounded queues of byte messages
 */

use super::context::IpcContext;
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::types::MqId;

/// Open message queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQueue {
    id: MqId,
    name: String,
}

impl MessageQueue {
    #[inline]
    pub fn id(&self) -> MqId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl IpcContext {
    /// Open `name`, creating a queue of `capacity` messages when absent
    pub fn mq_open(&self, name: &str, capacity: usize) -> IpcResult<MessageQueue> {
        let id = self
            .backend()
            .mq_open(self.pid(), name, capacity)
            .map_err(|e| Status::NoNameOpen(Fault::new(e, format!("open queue {:?}", name))))?;
        Ok(MessageQueue {
            id,
            name: name.to_string(),
        })
    }

    /// Append a message; a full queue fails with `EAGAIN`
    pub fn mq_send(&self, queue: &MessageQueue, data: &[u8]) -> IpcResult<()> {
        self.backend()
            .mq_send(self.pid(), queue.id, data)
            .map_err(|e| Status::MessageSendError(Fault::new(e, format!("send to queue {:?}", queue.name))))
    }

    /// Take the oldest message; an empty queue fails with `EAGAIN`
    pub fn mq_receive(&self, queue: &MessageQueue) -> IpcResult<Vec<u8>> {
        self.backend()
            .mq_receive(self.pid(), queue.id)
            .map_err(|e| Status::MessageReceiveError(Fault::new(e, format!("receive from queue {:?}", queue.name))))
    }

    pub fn mq_close(&self, queue: MessageQueue) -> IpcResult<()> {
        self.backend()
            .mq_close(self.pid(), queue.id)
            .map_err(|e| Status::NoNameClose(Fault::new(e, format!("close queue {:?}", queue.name))))
    }
}
