use std::fmt;
use std::sync::Arc;

use rdb_metadata::{
    stack_address_symbol, ClassRegistry, ClazzInfo, MethodInfo, SymbolResolver, TypeTag,
};
use rdb_wire::{Address, Command, CommandFailure, CommandKind};

use crate::decode::{
    decode_slot_address, decode_value, DecodeError, DecodedValue, LocalVariableValue,
};
use crate::error::ResolveError;
use crate::frame::StackFrame;
use crate::layout::{slot_entry, POINTER_SIZE};
use crate::method::{MethodIdentity, MethodIdentityResolver, MethodProgress};
use crate::session::ResolveOptions;

/// The method a frame turned out to be executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
    pub info: MethodInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    IdentifyingMethod,
    ResolvingAddresses,
    ReadingValues,
    Done,
    Failed,
}

/// What the driver has to do next.
#[derive(Debug)]
pub enum Action {
    /// Issue this command and feed its completion to [`FrameResolution::on_command`].
    Submit(CommandKind),
    /// Publish a variable, then call [`FrameResolution::resume`].
    Emit(LocalVariableValue),
    Done {
        method: ResolvedMethod,
        emitted: usize,
    },
    Failed(ResolveError),
}

enum State {
    Init,
    IdentifyingMethod(MethodIdentityResolver),
    ResolvingAddresses {
        table_base: Address,
        addresses: Box<[i64]>,
        next_slot: usize,
    },
    ReadingValues {
        addresses: Box<[i64]>,
        next_slot: usize,
        awaiting: Option<usize>,
        emitted: usize,
    },
    Done,
    Failed,
}

enum Next {
    Read(CommandKind),
    Emit(LocalVariableValue),
    Finished(usize),
    OutOfOrder,
}

/// Resolution of the local variables of one stack frame.
///
/// The machine performs no I/O. Each step hands back an [`Action`]; the driver
/// executes `Submit` actions one at a time and reports the settled command, so
/// at most one command per frame is ever outstanding. Completions that do not
/// match the outstanding command fail the resolution.
pub struct FrameResolution {
    frame: StackFrame,
    classes: Arc<ClassRegistry>,
    symbols: Arc<dyn SymbolResolver>,
    options: ResolveOptions,
    class: Option<Arc<ClazzInfo>>,
    method: Option<ResolvedMethod>,
    outstanding: Option<CommandKind>,
    state: State,
}

impl FrameResolution {
    pub fn new(
        frame: StackFrame,
        classes: Arc<ClassRegistry>,
        symbols: Arc<dyn SymbolResolver>,
        options: ResolveOptions,
    ) -> Self {
        Self {
            frame,
            classes,
            symbols,
            options,
            class: None,
            method: None,
            outstanding: None,
            state: State::Init,
        }
    }

    pub fn frame(&self) -> &StackFrame {
        &self.frame
    }

    pub fn method(&self) -> Option<&ResolvedMethod> {
        self.method.as_ref()
    }

    pub fn outstanding(&self) -> Option<&CommandKind> {
        self.outstanding.as_ref()
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Init => Phase::Init,
            State::IdentifyingMethod(_) => Phase::IdentifyingMethod,
            State::ResolvingAddresses { .. } => Phase::ResolvingAddresses,
            State::ReadingValues { .. } => Phase::ReadingValues,
            State::Done => Phase::Done,
            State::Failed => Phase::Failed,
        }
    }

    /// Load the frame's class and issue the first method identity read.
    pub fn start(&mut self) -> Action {
        if !matches!(self.state, State::Init) {
            return self.fail(ResolveError::OutOfOrder("resolution was already started"));
        }

        let class = match self.classes.load_class(&self.frame.class_name) {
            Ok(class) => class,
            Err(err) => {
                return self.fail(ResolveError::ClassNotFound {
                    class: self.frame.class_name.clone(),
                    message: err.to_string(),
                })
            }
        };
        self.class = Some(class);

        let mut resolver = MethodIdentityResolver::new(
            self.frame.method_pointer,
            self.options.layout,
            self.options.byte_order,
        );
        let kind = resolver.start();
        self.state = State::IdentifyingMethod(resolver);
        self.submit(kind)
    }

    pub fn on_command(&mut self, command: &Command) -> Action {
        match self.outstanding.take() {
            Some(kind) if kind == *command.kind() => {}
            _ => {
                return self.fail(ResolveError::UnexpectedCompletion {
                    request_id: command.request_id(),
                })
            }
        }

        match std::mem::replace(&mut self.state, State::Failed) {
            State::IdentifyingMethod(mut resolver) => match resolver.on_command(command) {
                Ok(MethodProgress::Submit(kind)) => {
                    self.state = State::IdentifyingMethod(resolver);
                    self.submit(kind)
                }
                Ok(MethodProgress::Resolved(identity)) => self.enter_address_phase(identity),
                Err(err) => self.fail(err),
            },
            State::ResolvingAddresses {
                table_base,
                mut addresses,
                next_slot,
            } => {
                let address = command.kind().address();
                let entry = match command.bytes() {
                    Ok(bytes) => decode_slot_address(bytes, self.options.byte_order)
                        .map_err(|error| ResolveError::Malformed { address, error }),
                    Err(failure) => Err(ResolveError::MemoryRead { address, failure }),
                };
                match entry {
                    Ok(entry) => addresses[next_slot] = entry,
                    Err(err) => return self.fail(err),
                }

                let next_slot = next_slot + 1;
                if next_slot < addresses.len() {
                    self.state = State::ResolvingAddresses {
                        table_base,
                        addresses,
                        next_slot,
                    };
                    self.submit(CommandKind::ReadMemory {
                        address: slot_entry(table_base, next_slot),
                        length: POINTER_SIZE,
                    })
                } else {
                    tracing::trace!(target: "rdb.stack", ?addresses, "stack address table read");
                    self.state = State::ReadingValues {
                        addresses,
                        next_slot: 0,
                        awaiting: None,
                        emitted: 0,
                    };
                    self.advance_values()
                }
            }
            State::ReadingValues {
                addresses,
                next_slot,
                awaiting: Some(slot),
                emitted,
            } => {
                let Some(variable) = self
                    .method
                    .as_ref()
                    .and_then(|m| m.info.local_variables().get(slot))
                    .cloned()
                else {
                    return self.fail(ResolveError::OutOfOrder("value read for an unknown slot"));
                };

                let value = match command.bytes() {
                    Ok(bytes) => decode_value(variable.type_tag, bytes, self.options.byte_order),
                    Err(CommandFailure::ConnectionClosed) => {
                        return self.fail(ResolveError::Transport(
                            CommandFailure::ConnectionClosed.to_string(),
                        ))
                    }
                    Err(CommandFailure::ShortRead { expected, actual, .. }) => {
                        Err(DecodeError::Truncated {
                            type_tag: variable.type_tag,
                            expected: expected as usize,
                            actual,
                        })
                    }
                    Err(failure) => Err(DecodeError::Unreadable(failure)),
                };
                if let Err(err) = &value {
                    tracing::debug!(
                        target: "rdb.stack",
                        variable = %variable.name,
                        slot,
                        error = %err,
                        "variable could not be decoded"
                    );
                }

                self.state = State::ReadingValues {
                    addresses,
                    next_slot,
                    awaiting: None,
                    emitted: emitted + 1,
                };
                Action::Emit(LocalVariableValue { variable, value })
            }
            _ => self.fail(ResolveError::UnexpectedCompletion {
                request_id: command.request_id(),
            }),
        }
    }

    /// Continue the value walk after an [`Action::Emit`].
    pub fn resume(&mut self) -> Action {
        match self.state {
            State::ReadingValues { awaiting: None, .. } => self.advance_values(),
            _ => self.fail(ResolveError::OutOfOrder("resume outside the value walk")),
        }
    }

    fn enter_address_phase(&mut self, identity: MethodIdentity) -> Action {
        let Some(class) = self.class.clone() else {
            return self.fail(ResolveError::OutOfOrder("method identified before class load"));
        };
        let Some(info) = class.method(&identity.name, &identity.descriptor) else {
            return self.fail(ResolveError::MethodNotFound {
                class: class.name().to_owned(),
                name: identity.name,
                descriptor: identity.descriptor,
            });
        };

        let method = ResolvedMethod {
            class_name: class.name().to_owned(),
            name: identity.name,
            descriptor: identity.descriptor,
            info: info.clone(),
        };
        let symbol = stack_address_symbol(&method.class_name, &method.name, &method.descriptor);
        let Some(table_base) = self.symbols.resolve(&symbol) else {
            return self.fail(ResolveError::SymbolNotFound(symbol));
        };

        let slots = method.info.local_variables().len();
        tracing::debug!(
            target: "rdb.stack",
            class = %method.class_name,
            method = %method.name,
            descriptor = %method.descriptor,
            table_base,
            slots,
            "resolving stack addresses"
        );
        self.method = Some(method);

        if slots == 0 {
            return self.finish(0);
        }
        self.state = State::ResolvingAddresses {
            table_base,
            addresses: vec![0; slots].into_boxed_slice(),
            next_slot: 0,
        };
        self.submit(CommandKind::ReadMemory {
            address: slot_entry(table_base, 0),
            length: POINTER_SIZE,
        })
    }

    fn advance_values(&mut self) -> Action {
        let skip_out_of_scope = self.options.skip_out_of_scope;
        let line = self.frame.line_number;

        let next = match (&self.method, &mut self.state) {
            (
                Some(method),
                State::ReadingValues {
                    addresses,
                    next_slot,
                    awaiting,
                    emitted,
                },
            ) if awaiting.is_none() => loop {
                let Some(&address) = addresses.get(*next_slot) else {
                    break Next::Finished(*emitted);
                };
                let slot = *next_slot;
                *next_slot += 1;
                let variable = &method.info.local_variables()[slot];

                if address <= 0 {
                    tracing::trace!(
                        target: "rdb.stack",
                        variable = %variable.name,
                        slot,
                        "slot has no storage"
                    );
                    continue;
                }
                if skip_out_of_scope && !variable.in_scope(line) {
                    tracing::trace!(
                        target: "rdb.stack",
                        variable = %variable.name,
                        line,
                        "variable out of scope"
                    );
                    continue;
                }
                if variable.type_tag == TypeTag::Object {
                    *emitted += 1;
                    break Next::Emit(LocalVariableValue {
                        variable: variable.clone(),
                        value: Ok(DecodedValue::Unsupported(TypeTag::Object)),
                    });
                }

                *awaiting = Some(slot);
                let length = match variable.size_bytes {
                    0 => variable.type_tag.natural_size(),
                    size => size,
                };
                break Next::Read(CommandKind::ReadMemory {
                    address: address as Address,
                    length,
                });
            },
            _ => Next::OutOfOrder,
        };

        match next {
            Next::Read(kind) => self.submit(kind),
            Next::Emit(value) => Action::Emit(value),
            Next::Finished(emitted) => self.finish(emitted),
            Next::OutOfOrder => self.fail(ResolveError::OutOfOrder("no value walk in progress")),
        }
    }

    fn submit(&mut self, kind: CommandKind) -> Action {
        self.outstanding = Some(kind);
        Action::Submit(kind)
    }

    fn finish(&mut self, emitted: usize) -> Action {
        let Some(method) = self.method.clone() else {
            return self.fail(ResolveError::OutOfOrder("finished without a method"));
        };
        self.state = State::Done;
        tracing::debug!(target: "rdb.stack", method = %method.name, emitted, "frame resolved");
        Action::Done { method, emitted }
    }

    fn fail(&mut self, err: ResolveError) -> Action {
        tracing::debug!(
            target: "rdb.stack",
            class = %self.frame.class_name,
            error = %err,
            "frame resolution failed"
        );
        self.state = State::Failed;
        self.outstanding = None;
        Action::Failed(err)
    }
}

impl fmt::Debug for FrameResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameResolution")
            .field("frame", &self.frame)
            .field("phase", &self.phase())
            .field("outstanding", &self.outstanding)
            .finish_non_exhaustive()
    }
}
