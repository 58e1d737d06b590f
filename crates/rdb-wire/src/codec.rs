//! Framing for the target memory protocol.
//!
//! Every packet starts with the same 14 byte header (all integers big-endian):
//!
//! ```text
//! u32 length      total packet length, header included
//! u64 request_id
//! u8  flags       0x80 marks a reply
//! u8  code        opcode for commands, status for replies
//! ```
//!
//! Command bodies are `u64 address` followed by `u32 length` for `ReadMemory`.
//! Reply bodies are the raw bytes (`ReadMemory`), the NUL-terminated string
//! (`ReadString`), or a UTF-8 error message when the status is `STATUS_ERROR`.

use super::types::{
    CommandFailure, CommandKind, CommandStatus, Opcode, Payload, RequestId, Result,
    WireError,
};

pub const HEADER_LEN: usize = 14;
pub const FLAG_REPLY: u8 = 0x80;
pub const STATUS_OK: u8 = 0;
pub const STATUS_ERROR: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub request_id: RequestId,
    pub flags: u8,
    pub code: u8,
}

impl FrameHeader {
    pub fn parse(header: &[u8; HEADER_LEN]) -> Self {
        let mut request_id = [0u8; 8];
        request_id.copy_from_slice(&header[4..12]);
        Self {
            length: u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize,
            request_id: u64::from_be_bytes(request_id),
            flags: header[12],
            code: header[13],
        }
    }

    pub fn is_reply(&self) -> bool {
        (self.flags & FLAG_REPLY) != 0
    }

    /// Length of the body that follows the header, validated against `max_frame_len`.
    pub fn body_len(&self, max_frame_len: usize) -> Result<usize> {
        if self.length < HEADER_LEN {
            return Err(WireError::Protocol(format!(
                "frame length {} is shorter than the {HEADER_LEN} byte header",
                self.length
            )));
        }
        if self.length > max_frame_len {
            return Err(WireError::FrameTooLarge {
                len: self.length,
                max: max_frame_len,
            });
        }
        Ok(self.length - HEADER_LEN)
    }
}

pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn require(&self, n: usize) -> Result<()> {
        let end = self.pos.checked_add(n);
        match end {
            Some(end) if end <= self.buf.len() => Ok(()),
            _ => Err(WireError::Protocol(format!(
                "buffer underflow: need {n} bytes at {}, have {}",
                self.pos,
                self.buf.len()
            ))),
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_array::<8>()?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.require(len)?;
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }
}

fn frame(request_id: RequestId, flags: u8, code: u8, body: &[u8]) -> Vec<u8> {
    let length = HEADER_LEN + body.len();
    let mut w = WireWriter::with_capacity(length);
    w.write_u32(length as u32);
    w.write_u64(request_id);
    w.write_u8(flags);
    w.write_u8(code);
    w.write_bytes(body);
    w.into_vec()
}

pub fn encode_command(request_id: RequestId, kind: &CommandKind) -> Vec<u8> {
    let mut body = WireWriter::with_capacity(12);
    match *kind {
        CommandKind::ReadMemory { address, length } => {
            body.write_u64(address);
            body.write_u32(length);
        }
        CommandKind::ReadString { address } => body.write_u64(address),
    }
    frame(request_id, 0, kind.opcode().as_u8(), &body.into_vec())
}

pub fn encode_reply(request_id: RequestId, status: u8, payload: &[u8]) -> Vec<u8> {
    frame(request_id, FLAG_REPLY, status, payload)
}

/// Decode the body of a command frame (used by the target side and the mock server).
pub fn decode_command_body(opcode: u8, body: &[u8]) -> Result<CommandKind> {
    let mut r = WireReader::new(body);
    let kind = match Opcode::from_u8(opcode) {
        Some(Opcode::ReadMemory) => CommandKind::ReadMemory {
            address: r.read_u64()?,
            length: r.read_u32()?,
        },
        Some(Opcode::ReadString) => CommandKind::ReadString {
            address: r.read_u64()?,
        },
        None => return Err(WireError::Protocol(format!("unknown opcode {opcode}"))),
    };
    if r.remaining() != 0 {
        return Err(WireError::Protocol(format!(
            "{} trailing bytes after command body",
            r.remaining()
        )));
    }
    Ok(kind)
}

/// Interpret a reply body for the command that produced it.
///
/// `ReadMemory` replies must carry exactly the requested number of bytes; anything
/// else settles the command as failed so callers never see a truncated buffer.
pub fn decode_reply(kind: &CommandKind, status: u8, body: Vec<u8>) -> CommandStatus {
    let address = kind.address();
    if status != STATUS_OK {
        let message = String::from_utf8_lossy(&body).into_owned();
        return CommandStatus::Failed(CommandFailure::OutOfRange { address, message });
    }

    match *kind {
        CommandKind::ReadMemory { length, .. } => {
            if body.len() != length as usize {
                return CommandStatus::Failed(CommandFailure::ShortRead {
                    address,
                    expected: length,
                    actual: body.len(),
                });
            }
            CommandStatus::Completed(Payload::Bytes(body))
        }
        CommandKind::ReadString { .. } => match decode_c_string(&body) {
            Ok(s) => CommandStatus::Completed(Payload::String(s)),
            Err(failure) => CommandStatus::Failed(failure),
        },
    }
}

/// Decode a NUL-terminated runtime string; bytes after the first NUL are ignored.
pub fn decode_c_string(bytes: &[u8]) -> std::result::Result<String, CommandFailure> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map(str::to_owned)
        .map_err(|e| CommandFailure::Malformed(format!("invalid utf-8 string: {e}")))
}
