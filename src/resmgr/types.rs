/*!
 * Resource Manager Types
 * Decoded device requests, per-open state and the handler trait
 */

use crate::core::types::{Coid, Pid, RcvId, ScoId};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

/// Where a request came from, used to route its reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub rcvid: RcvId,
    pub scoid: ScoId,
    pub pid: Pid,
    /// Client-side connection the request was sent on
    pub coid: Coid,
}

/// One decoded device request
///
/// Not `Clone`: `ResourceManager::dispatch` consumes it, which is what
/// guarantees a single reply per request.
#[derive(Debug, PartialEq, Eq)]
pub enum ResourceRequest {
    Open {
        origin: Origin,
        path: String,
        ioflag: u32,
    },
    Close {
        origin: Origin,
    },
    /// New connection sharing the open state of `source` (a client coid)
    Dup {
        origin: Origin,
        source: Coid,
    },
    Read {
        origin: Origin,
        offset: u64,
        length: usize,
    },
    Write {
        origin: Origin,
        offset: u64,
        length: usize,
        bytes: Vec<u8>,
    },
    Control {
        origin: Origin,
        code: i32,
        input: Vec<u8>,
        out_capacity: usize,
    },
}

impl ResourceRequest {
    pub fn origin(&self) -> Origin {
        match self {
            ResourceRequest::Open { origin, .. }
            | ResourceRequest::Close { origin }
            | ResourceRequest::Dup { origin, .. }
            | ResourceRequest::Read { origin, .. }
            | ResourceRequest::Write { origin, .. }
            | ResourceRequest::Control { origin, .. } => *origin,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceRequest::Open { .. } => "open",
            ResourceRequest::Close { .. } => "close",
            ResourceRequest::Dup { .. } => "dup",
            ResourceRequest::Read { .. } => "read",
            ResourceRequest::Write { .. } => "write",
            ResourceRequest::Control { .. } => "control",
        }
    }
}

/// Open control block: state of one client open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ocb {
    /// Advanced by every successful read and write
    pub offset: u64,
    pub ioflag: u32,
    pub client: Pid,
    pub client_coid: Coid,
}

/// Answer to a control request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlReply {
    pub ret_val: i32,
    /// Truncated to the request's output capacity
    pub out: Vec<u8>,
}

impl ControlReply {
    pub fn new(ret_val: i32, out: Vec<u8>) -> Self {
        Self { ret_val, out }
    }
}

/// Lifecycle of a registered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Unregistered,
    Registered,
    AwaitingRequest,
    Dispatching,
}

/// Device behaviour behind a registered name
///
/// Every method has a default: open, close and dup accept, the data
/// operations fail with `ENOSYS`. Returned errnos become error replies.
/// Handlers run on the dispatch loop and must not block indefinitely.
pub trait DeviceHandlers: Send {
    fn open(&mut self, _path: &str, _ioflag: u32, _origin: &Origin) -> Result<(), Errno> {
        Ok(())
    }

    fn close(&mut self, _ocb: &Ocb, _origin: &Origin) -> Result<(), Errno> {
        Ok(())
    }

    fn dup(&mut self, _ocb: &Ocb, _origin: &Origin) -> Result<(), Errno> {
        Ok(())
    }

    /// Produce up to `length` bytes at `ocb.offset`
    fn read(&mut self, _ocb: &Ocb, _length: usize) -> Result<Vec<u8>, Errno> {
        Err(Errno::ENOSYS)
    }

    /// Consume bytes at `ocb.offset`, returning how many were taken
    fn write(&mut self, _ocb: &Ocb, _bytes: &[u8]) -> Result<usize, Errno> {
        Err(Errno::ENOSYS)
    }

    fn control(
        &mut self,
        _ocb: &Ocb,
        _code: i32,
        _input: &[u8],
        _out_capacity: usize,
    ) -> Result<ControlReply, Errno> {
        Err(Errno::ENOSYS)
    }
}
