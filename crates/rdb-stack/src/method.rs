use rdb_wire::{Address, Command, CommandKind};

use crate::decode::decode_pointer;
use crate::error::ResolveError;
use crate::layout::{ByteOrder, MethodLayout, POINTER_SIZE};

/// Name and descriptor of a method as stored in the target's method record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodIdentity {
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug)]
pub enum MethodProgress {
    Submit(CommandKind),
    Resolved(MethodIdentity),
}

#[derive(Debug)]
enum Step {
    NamePointer,
    DescriptorPointer { name_addr: Address },
    Name { desc_addr: Address },
    Descriptor { name: String },
    Finished,
}

/// Recovers a [`MethodIdentity`] from a method record with four chained reads:
/// name pointer, descriptor pointer, name string, descriptor string.
#[derive(Debug)]
pub struct MethodIdentityResolver {
    method_pointer: Address,
    layout: MethodLayout,
    byte_order: ByteOrder,
    step: Step,
}

impl MethodIdentityResolver {
    pub fn new(method_pointer: Address, layout: MethodLayout, byte_order: ByteOrder) -> Self {
        Self {
            method_pointer,
            layout,
            byte_order,
            step: Step::NamePointer,
        }
    }

    /// The first read. Calling it again restarts the chain.
    pub fn start(&mut self) -> CommandKind {
        self.step = Step::NamePointer;
        CommandKind::ReadMemory {
            address: self.layout.name_ptr(self.method_pointer),
            length: POINTER_SIZE,
        }
    }

    pub fn on_command(&mut self, command: &Command) -> Result<MethodProgress, ResolveError> {
        match std::mem::replace(&mut self.step, Step::Finished) {
            Step::NamePointer => {
                let name_addr = self.pointer(command)?;
                self.step = Step::DescriptorPointer { name_addr };
                Ok(MethodProgress::Submit(CommandKind::ReadMemory {
                    address: self.layout.desc_ptr(self.method_pointer),
                    length: POINTER_SIZE,
                }))
            }
            Step::DescriptorPointer { name_addr } => {
                let desc_addr = self.pointer(command)?;
                self.step = Step::Name { desc_addr };
                Ok(MethodProgress::Submit(CommandKind::ReadString {
                    address: name_addr,
                }))
            }
            Step::Name { desc_addr } => {
                let name = string(command)?;
                self.step = Step::Descriptor { name };
                Ok(MethodProgress::Submit(CommandKind::ReadString {
                    address: desc_addr,
                }))
            }
            Step::Descriptor { name } => {
                let descriptor = string(command)?;
                tracing::trace!(
                    target: "rdb.stack",
                    method_pointer = self.method_pointer,
                    name = %name,
                    descriptor = %descriptor,
                    "identified method"
                );
                Ok(MethodProgress::Resolved(MethodIdentity { name, descriptor }))
            }
            Step::Finished => Err(ResolveError::UnexpectedCompletion {
                request_id: command.request_id(),
            }),
        }
    }

    fn pointer(&self, command: &Command) -> Result<Address, ResolveError> {
        let address = command.kind().address();
        let bytes = command
            .bytes()
            .map_err(|failure| ResolveError::MemoryRead { address, failure })?;
        decode_pointer(bytes, self.byte_order)
            .map_err(|error| ResolveError::Malformed { address, error })
    }
}

fn string(command: &Command) -> Result<String, ResolveError> {
    command
        .string()
        .map(str::to_owned)
        .map_err(|failure| ResolveError::MemoryRead {
            address: command.kind().address(),
            failure,
        })
}
