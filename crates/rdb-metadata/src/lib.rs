//! Debug metadata produced by the compiler, as consumed by the debugger.
//!
//! - [`ClazzInfo`] / [`MethodInfo`] / [`LocalVariableInfo`] describe compiled
//!   classes, keyed by class name and then by `(name, descriptor)`.
//! - [`ClassRegistry`] loads classes lazily from a [`ClassSource`] and caches them
//!   for the lifetime of the debug session.
//! - [`SymbolResolver`] maps the compiler's symbol names to target addresses.

mod error;
mod registry;
mod symbols;
mod types;

pub use error::{MetadataError, Result};
pub use registry::{ClassRegistry, ClassSource, DirectoryClassSource, MemoryClassSource};
pub use symbols::{stack_address_symbol, SymbolResolver, SymbolTable};
pub use types::{ClazzInfo, LocalVariableInfo, MethodInfo, TypeTag};
