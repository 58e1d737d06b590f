//! Wire-level client for the rdb target memory protocol.
//!
//! The target process only understands two requests: read `N` bytes at an
//! address, and read a NUL-terminated string at an address. Everything the
//! debugger knows about a suspended process is reconstructed from chains of
//! these reads, so this crate focuses on getting the plumbing right:
//!
//! - [`CommandQueue`] assigns request ids, keeps the pending-command registry
//!   and fans replies out to every registered [`Listener`].
//! - [`Command`] is the request/response envelope; its status settles exactly
//!   once.
//! - The framing lives in [`codec`] and is shared with the mock target server
//!   used by tests (`test-support` feature).

pub mod codec;
mod listeners;
mod queue;
pub mod types;

pub use listeners::{ListenerId, ListenerSet, Subscription};
pub use queue::{CommandQueue, Listener, QueueConfig};
pub use types::{
    Address, Command, CommandFailure, CommandKind, CommandStatus, Opcode, Payload, RequestId,
    Result, WireError,
};

// The mock target is only needed for tests and downstream integration suites.
// Compile it for rdb-wire's own unit tests unconditionally (via `cfg(test)`), while keeping
// it behind the `test-support` feature for normal builds and for downstream crates.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
