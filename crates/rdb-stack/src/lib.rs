//! Reconstructs local variables of a suspended target from raw memory reads.
//!
//! A [`SuspendedStack`] snapshot enters [`DebugSession::resolve_frame`], which
//! drives a [`FrameResolution`] state machine over the shared
//! [`rdb_wire::CommandQueue`]:
//!
//! 1. identify the frame's method by chasing the name and descriptor pointers of
//!    its runtime method record ([`MethodIdentityResolver`]),
//! 2. read the method's stack address table, one slot at a time,
//! 3. read and decode every live slot, streaming each [`LocalVariableValue`] to
//!    observers as soon as it is decoded.
//!
//! Every resolution ends with exactly one terminal [`SessionEvent`]: `Done` or
//! `Failed`.

mod decode;
mod error;
mod events;
mod frame;
mod layout;
mod machine;
mod method;
mod session;

pub use decode::{
    decode_pointer, decode_slot_address, decode_value, DecodeError, DecodedValue,
    LocalVariableValue,
};
pub use error::ResolveError;
pub use events::{Observer, SessionEvent};
pub use frame::{StackFrame, SuspendedStack};
pub use layout::{ByteOrder, MethodLayout, POINTER_SIZE};
pub use machine::{Action, FrameResolution, Phase, ResolvedMethod};
pub use method::{MethodIdentity, MethodIdentityResolver, MethodProgress};
pub use session::{DebugSession, FrameVariables, ResolveOptions};
