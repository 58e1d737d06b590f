use rdb_wire::Address;

/// Width of a target pointer. The supported targets are all 64-bit.
pub const POINTER_SIZE: u32 = 8;

/// Byte order used by the target's debug server when returning raw memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    pub fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Big => u32::from_be_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
        }
    }

    pub fn u64_from(self, bytes: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Big => u64::from_be_bytes(bytes),
            ByteOrder::Little => u64::from_le_bytes(bytes),
        }
    }
}

/// Field offsets inside the runtime's method record.
///
/// This must be kept in lock-step with the compiler's runtime headers: when the
/// record layout changes there, bump `version` and the offsets together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodLayout {
    pub version: u32,
    pub name_ptr_offset: u64,
    pub desc_ptr_offset: u64,
}

impl MethodLayout {
    pub const CURRENT: MethodLayout = MethodLayout {
        version: 1,
        name_ptr_offset: 16,
        desc_ptr_offset: 24,
    };

    pub fn name_ptr(&self, method_pointer: Address) -> Address {
        method_pointer.wrapping_add(self.name_ptr_offset)
    }

    pub fn desc_ptr(&self, method_pointer: Address) -> Address {
        method_pointer.wrapping_add(self.desc_ptr_offset)
    }

    /// `true` if the two pointer fields do not overlap.
    pub fn is_consistent(&self) -> bool {
        self.name_ptr_offset.abs_diff(self.desc_ptr_offset) >= u64::from(POINTER_SIZE)
    }
}

impl Default for MethodLayout {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Address of slot `slot` in a stack address table starting at `table_base`.
pub(crate) fn slot_entry(table_base: Address, slot: usize) -> Address {
    table_base.wrapping_add(slot as u64 * u64::from(POINTER_SIZE))
}
