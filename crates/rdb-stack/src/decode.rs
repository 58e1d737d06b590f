use std::fmt;

use rdb_metadata::{LocalVariableInfo, TypeTag};
use rdb_wire::CommandFailure;
use thiserror::Error;

use crate::layout::ByteOrder;

/// A decoded local variable value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodedValue {
    Int32(i32),
    Float32(f32),
    Int64(i64),
    Float64(f64),
    /// The variable exists but its representation is not decoded (object references).
    Unsupported(TypeTag),
}

impl DecodedValue {
    pub fn type_tag(&self) -> TypeTag {
        match *self {
            DecodedValue::Int32(_) => TypeTag::Int32,
            DecodedValue::Float32(_) => TypeTag::Float32,
            DecodedValue::Int64(_) => TypeTag::Int64,
            DecodedValue::Float64(_) => TypeTag::Float64,
            DecodedValue::Unsupported(tag) => tag,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Int32(v) => write!(f, "{v}"),
            DecodedValue::Float32(v) => write!(f, "{v}"),
            DecodedValue::Int64(v) => write!(f, "{v}"),
            DecodedValue::Float64(v) => write!(f, "{v}"),
            DecodedValue::Unsupported(tag) => write!(f, "<unsupported {tag:?}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{type_tag:?} needs {expected} bytes, got {actual}")]
    Truncated {
        type_tag: TypeTag,
        expected: usize,
        actual: usize,
    },
    #[error("value could not be read: {0}")]
    Unreadable(CommandFailure),
}

/// One entry of the per-frame variable stream. A slot that could not be decoded
/// still produces an entry; the failure does not abort the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariableValue {
    pub variable: LocalVariableInfo,
    pub value: Result<DecodedValue, DecodeError>,
}

impl LocalVariableValue {
    pub fn name(&self) -> &str {
        &self.variable.name
    }
}

fn leading<const N: usize>(type_tag: TypeTag, bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes
        .get(..N)
        .and_then(|head| <[u8; N]>::try_from(head).ok())
        .ok_or(DecodeError::Truncated {
            type_tag,
            expected: N,
            actual: bytes.len(),
        })
}

/// Interpret the leading bytes of `bytes` as a value of `type_tag`.
///
/// Extra trailing bytes are ignored. `Object` always decodes to
/// [`DecodedValue::Unsupported`] without looking at the bytes.
pub fn decode_value(
    type_tag: TypeTag,
    bytes: &[u8],
    order: ByteOrder,
) -> Result<DecodedValue, DecodeError> {
    Ok(match type_tag {
        TypeTag::Int32 => DecodedValue::Int32(order.u32_from(leading(type_tag, bytes)?) as i32),
        TypeTag::Float32 => {
            DecodedValue::Float32(f32::from_bits(order.u32_from(leading(type_tag, bytes)?)))
        }
        TypeTag::Int64 => DecodedValue::Int64(order.u64_from(leading(type_tag, bytes)?) as i64),
        TypeTag::Float64 => {
            DecodedValue::Float64(f64::from_bits(order.u64_from(leading(type_tag, bytes)?)))
        }
        TypeTag::Object => DecodedValue::Unsupported(TypeTag::Object),
    })
}

/// Decode an unsigned target pointer.
pub fn decode_pointer(bytes: &[u8], order: ByteOrder) -> Result<u64, DecodeError> {
    Ok(order.u64_from(leading(TypeTag::Object, bytes)?))
}

/// Decode a stack address table entry. Entries are signed; a non-positive entry
/// marks a slot with no live storage.
pub fn decode_slot_address(bytes: &[u8], order: ByteOrder) -> Result<i64, DecodeError> {
    Ok(order.u64_from(leading(TypeTag::Int64, bytes)?) as i64)
}
