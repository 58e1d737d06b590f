use std::sync::Arc;

use rdb_wire::Address;

/// One frame of a suspended call stack, as produced by the stack walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub class_name: String,
    /// Address of the runtime method record for the executing method.
    pub method_pointer: Address,
    pub line_number: u32,
}

impl StackFrame {
    pub fn new(class_name: impl Into<String>, method_pointer: Address, line_number: u32) -> Self {
        Self {
            class_name: class_name.into(),
            method_pointer,
            line_number,
        }
    }
}

/// Immutable snapshot of a halted thread's stack, innermost frame first.
///
/// Cloning is cheap; concurrent frame resolutions share the same frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendedStack {
    frames: Arc<[StackFrame]>,
}

impl SuspendedStack {
    pub fn new(frames: Vec<StackFrame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn get(&self, index: usize) -> Option<&StackFrame> {
        self.frames.get(index)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for SuspendedStack {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FromIterator<StackFrame> for SuspendedStack {
    fn from_iter<I: IntoIterator<Item = StackFrame>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
