use rdb_wire::{Address, CommandFailure, RequestId, WireError};
use thiserror::Error;

use crate::decode::DecodeError;

/// Why the resolution of a frame stopped. Every variant is terminal for that
/// frame; per-slot decode problems are reported through
/// [`crate::LocalVariableValue::value`] instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("the suspended stack has no frames")]
    EmptyStack,
    #[error("frame {index} requested but the stack has {len} frames")]
    NoSuchFrame { index: usize, len: usize },
    #[error("class `{class}` could not be loaded: {message}")]
    ClassNotFound { class: String, message: String },
    #[error("method {name}{descriptor} not found in class `{class}`")]
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },
    #[error("symbol `{0}` is not defined in the target")]
    SymbolNotFound(String),
    #[error("memory read at 0x{address:x} failed: {failure}")]
    MemoryRead {
        address: Address,
        failure: CommandFailure,
    },
    #[error("malformed data at 0x{address:x}: {error}")]
    Malformed { address: Address, error: DecodeError },
    #[error("no reply to request {request_id} within the reply timeout")]
    TransportTimeout { request_id: RequestId },
    #[error("resolution was cancelled")]
    Cancelled,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("resolution driven out of order: {0}")]
    OutOfOrder(&'static str),
    #[error("completion of request {request_id} does not match the outstanding command")]
    UnexpectedCompletion { request_id: RequestId },
}

impl From<WireError> for ResolveError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Timeout { request_id } => ResolveError::TransportTimeout { request_id },
            WireError::Cancelled => ResolveError::Cancelled,
            other => ResolveError::Transport(other.to_string()),
        }
    }
}
