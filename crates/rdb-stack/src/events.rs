use rdb_wire::Subscription;

use crate::decode::LocalVariableValue;
use crate::error::ResolveError;

/// Notifications published by a [`crate::DebugSession`] while it resolves frames.
///
/// For each resolved frame, zero or more `Variable` events are followed by
/// exactly one `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Variable {
        frame: usize,
        value: LocalVariableValue,
    },
    Done {
        frame: usize,
        emitted: usize,
    },
    Failed {
        frame: usize,
        error: ResolveError,
    },
}

impl SessionEvent {
    pub fn frame(&self) -> usize {
        match *self {
            SessionEvent::Variable { frame, .. }
            | SessionEvent::Done { frame, .. }
            | SessionEvent::Failed { frame, .. } => frame,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionEvent::Variable { .. })
    }
}

/// A registered observer. Dropping it unsubscribes.
pub type Observer = Subscription<SessionEvent>;
