use std::io;

use thiserror::Error;

pub type RequestId = u64;
pub type Address = u64;

pub type Result<T> = std::result::Result<T, WireError>;

/// Request opcodes understood by the target's debug server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    ReadMemory,
    ReadString,
}

impl Opcode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Opcode::ReadMemory => 1,
            Opcode::ReadString => 2,
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Opcode::ReadMemory),
            2 => Some(Opcode::ReadString),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Read exactly `length` bytes starting at `address`.
    ReadMemory { address: Address, length: u32 },
    /// Read the NUL-terminated string starting at `address`.
    ReadString { address: Address },
}

impl CommandKind {
    pub fn opcode(&self) -> Opcode {
        match self {
            CommandKind::ReadMemory { .. } => Opcode::ReadMemory,
            CommandKind::ReadString { .. } => Opcode::ReadString,
        }
    }

    pub fn address(&self) -> Address {
        match *self {
            CommandKind::ReadMemory { address, .. } | CommandKind::ReadString { address } => {
                address
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    String(String),
}

impl Payload {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            Payload::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(s) => Some(s),
            Payload::Bytes(_) => None,
        }
    }
}

/// Why a single command failed. Cloned into every listener notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandFailure {
    #[error("target rejected read at 0x{address:x}: {message}")]
    OutOfRange { address: Address, message: String },
    #[error("short read at 0x{address:x}: expected {expected} bytes, got {actual}")]
    ShortRead {
        address: Address,
        expected: u32,
        actual: usize,
    },
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("connection closed before a reply was received")]
    ConnectionClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandStatus {
    Pending,
    Completed(Payload),
    Failed(CommandFailure),
}

/// A request together with its (eventual) response.
///
/// The request half never changes after construction. The status moves from
/// [`CommandStatus::Pending`] to `Completed` or `Failed` exactly once; any later
/// attempt is rejected with [`WireError::AlreadySettled`].
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    request_id: RequestId,
    kind: CommandKind,
    status: CommandStatus,
}

impl Command {
    pub fn new(request_id: RequestId, kind: CommandKind) -> Self {
        Self {
            request_id,
            kind,
            status: CommandStatus::Pending,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn status(&self) -> &CommandStatus {
        &self.status
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, CommandStatus::Pending)
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.status {
            CommandStatus::Completed(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&CommandFailure> {
        match &self.status {
            CommandStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn settle(&mut self, status: CommandStatus) -> Result<()> {
        if !self.is_pending() {
            return Err(WireError::AlreadySettled {
                request_id: self.request_id,
            });
        }
        if matches!(status, CommandStatus::Pending) {
            return Err(WireError::Protocol(format!(
                "command {} cannot be settled back to pending",
                self.request_id
            )));
        }
        self.status = status;
        Ok(())
    }

    pub fn complete(&mut self, payload: Payload) -> Result<()> {
        self.settle(CommandStatus::Completed(payload))
    }

    pub fn fail(&mut self, failure: CommandFailure) -> Result<()> {
        self.settle(CommandStatus::Failed(failure))
    }

    /// Bytes of a completed `ReadMemory`, or the failure that settled it.
    pub fn bytes(&self) -> std::result::Result<&[u8], CommandFailure> {
        match &self.status {
            CommandStatus::Completed(Payload::Bytes(bytes)) => Ok(bytes),
            CommandStatus::Completed(Payload::String(_)) => Err(CommandFailure::Malformed(
                format!("command {} completed with a string payload", self.request_id),
            )),
            CommandStatus::Failed(failure) => Err(failure.clone()),
            CommandStatus::Pending => Err(CommandFailure::Malformed(format!(
                "command {} is still pending",
                self.request_id
            ))),
        }
    }

    /// String of a completed `ReadString`, or the failure that settled it.
    pub fn string(&self) -> std::result::Result<&str, CommandFailure> {
        match &self.status {
            CommandStatus::Completed(Payload::String(s)) => Ok(s),
            CommandStatus::Completed(Payload::Bytes(_)) => Err(CommandFailure::Malformed(
                format!("command {} completed with a byte payload", self.request_id),
            )),
            CommandStatus::Failed(failure) => Err(failure.clone()),
            CommandStatus::Pending => Err(CommandFailure::Malformed(format!(
                "command {} is still pending",
                self.request_id
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("command queue is not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timed out waiting for reply to request {request_id}")]
    Timeout { request_id: RequestId },
    #[error("timed out connecting to target")]
    ConnectTimeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("command {request_id} was already settled")]
    AlreadySettled { request_id: RequestId },
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("command failed: {0}")]
    Command(#[from] CommandFailure),
    #[error(transparent)]
    Io(#[from] io::Error),
}
