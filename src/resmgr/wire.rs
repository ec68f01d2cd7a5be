/*!
 * Device Protocol Framing
 *
 * Little-endian request and reply layouts of the native `io_*` messages.
 * The fixed part of each request fills the 16-byte message header; path,
 * write and control data ride in the payload.
 *
 * ```text
 * connect      type u16 | subtype u16 | ioflag u32 | path_len u16 | 0 u16 | pad
 * read/write   type u16 | combine_len u16 | nbytes i32 | xtype u32 | 0 u32
 * devctl       type u16 | combine_len u16 | dcmd i32   | nbytes i32 | 0 i32
 * devctl reply 0 u32    | ret_val i32     | nbytes i32 | 0 i32
 * close/dup    type u16 | combine_len u16 | (dup: source coid i32)
 * ```
 */

use crate::core::limits::MESSAGE_HEADER_SIZE;
use crate::core::types::Coid;
use crate::ipc::types::{Message, MessageHeader};
use bytes::{Buf, BufMut, BytesMut};
use nix::errno::Errno;

pub const IO_CONNECT: u16 = 0x100;
pub const IO_READ: u16 = 0x101;
pub const IO_WRITE: u16 = 0x102;
pub const IO_DEVCTL: u16 = 0x106;
pub const IO_DUP: u16 = 0x115;
pub const IO_CLOSE: u16 = 0x116;

/// Connect subtype for a plain open
pub const CONNECT_OPEN: u16 = 0;

/// Plain transfer, no extended type
const XTYPE_NONE: u32 = 0;

/// Request as read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireRequest {
    Connect { path: String, ioflag: u32 },
    Read { nbytes: usize },
    Write { nbytes: usize, data: Vec<u8> },
    Devctl { dcmd: i32, nbytes: usize, data: Vec<u8> },
    Dup { source: Coid },
    Close,
}

fn header(build: impl FnOnce(&mut BytesMut)) -> MessageHeader {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE);
    build(&mut buf);
    MessageHeader::from_slice(&buf)
}

fn len_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

pub fn encode_connect(path: &str, ioflag: u32) -> Message {
    let path_len = u16::try_from(path.len()).unwrap_or(u16::MAX);
    let h = header(|b| {
        b.put_u16_le(IO_CONNECT);
        b.put_u16_le(CONNECT_OPEN);
        b.put_u32_le(ioflag);
        b.put_u16_le(path_len);
        b.put_u16_le(0);
    });
    Message::with_header(h, path.as_bytes()[..path_len as usize].to_vec())
}

pub fn encode_read(nbytes: usize) -> Message {
    let h = header(|b| {
        b.put_u16_le(IO_READ);
        b.put_u16_le(0);
        b.put_i32_le(len_i32(nbytes));
        b.put_u32_le(XTYPE_NONE);
        b.put_u32_le(0);
    });
    Message::with_header(h, Vec::new())
}

pub fn encode_write(data: &[u8]) -> Message {
    let h = header(|b| {
        b.put_u16_le(IO_WRITE);
        b.put_u16_le(0);
        b.put_i32_le(len_i32(data.len()));
        b.put_u32_le(XTYPE_NONE);
        b.put_u32_le(0);
    });
    Message::with_header(h, data.to_vec())
}

/// `nbytes` is the larger of the input and the output capacity
pub fn encode_devctl(dcmd: i32, input: &[u8], out_capacity: usize) -> Message {
    let h = header(|b| {
        b.put_u16_le(IO_DEVCTL);
        b.put_u16_le(0);
        b.put_i32_le(dcmd);
        b.put_i32_le(len_i32(input.len().max(out_capacity)));
        b.put_i32_le(0);
    });
    Message::with_header(h, input.to_vec())
}

pub fn encode_dup(source: Coid) -> Message {
    let h = header(|b| {
        b.put_u16_le(IO_DUP);
        b.put_u16_le(0);
        b.put_i32_le(source);
    });
    Message::with_header(h, Vec::new())
}

pub fn encode_close() -> Message {
    let h = header(|b| {
        b.put_u16_le(IO_CLOSE);
        b.put_u16_le(0);
    });
    Message::with_header(h, Vec::new())
}

pub fn encode_devctl_reply(ret_val: i32, data: Vec<u8>) -> Message {
    let h = header(|b| {
        b.put_u32_le(0);
        b.put_i32_le(ret_val);
        b.put_i32_le(len_i32(data.len()));
        b.put_i32_le(0);
    });
    Message::with_header(h, data)
}

/// `(ret_val, data)` of a devctl reply
pub fn decode_devctl_reply(message: &Message) -> Result<(i32, Vec<u8>), Errno> {
    let mut h = message.header.as_bytes();
    h.advance(4);
    let ret_val = h.get_i32_le();
    let nbytes = usize::try_from(h.get_i32_le()).map_err(|_| Errno::EBADMSG)?;
    let data = message.payload.get(..nbytes).ok_or(Errno::EBADMSG)?.to_vec();
    Ok((ret_val, data))
}

/// Decode a device request; unknown types fail with `ENOSYS`
pub fn decode_request(message: &Message) -> Result<WireRequest, Errno> {
    let mut h = message.header.as_bytes();
    let msg_type = h.get_u16_le();
    match msg_type {
        IO_CONNECT => {
            let _subtype = h.get_u16_le();
            let ioflag = h.get_u32_le();
            let path_len = h.get_u16_le() as usize;
            let raw = message.payload.get(..path_len).ok_or(Errno::EBADMSG)?;
            let path = std::str::from_utf8(raw).map_err(|_| Errno::EBADMSG)?;
            Ok(WireRequest::Connect {
                path: path.to_string(),
                ioflag,
            })
        }
        IO_READ => {
            let _combine_len = h.get_u16_le();
            let nbytes = usize::try_from(h.get_i32_le()).map_err(|_| Errno::EINVAL)?;
            Ok(WireRequest::Read { nbytes })
        }
        IO_WRITE => {
            let _combine_len = h.get_u16_le();
            let nbytes = usize::try_from(h.get_i32_le()).map_err(|_| Errno::EINVAL)?;
            let data = message.payload.get(..nbytes).ok_or(Errno::EBADMSG)?.to_vec();
            Ok(WireRequest::Write { nbytes, data })
        }
        IO_DEVCTL => {
            let _combine_len = h.get_u16_le();
            let dcmd = h.get_i32_le();
            let nbytes = usize::try_from(h.get_i32_le()).map_err(|_| Errno::EINVAL)?;
            Ok(WireRequest::Devctl {
                dcmd,
                nbytes,
                data: message.payload.clone(),
            })
        }
        IO_DUP => {
            let _combine_len = h.get_u16_le();
            Ok(WireRequest::Dup {
                source: h.get_i32_le(),
            })
        }
        IO_CLOSE => Ok(WireRequest::Close),
        _ => Err(Errno::ENOSYS),
    }
}
