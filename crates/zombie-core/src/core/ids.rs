use super::macros::impl_id;

impl_id!(ProcessId, u32, "process ID within the system");
impl_id!(ThreadId, u32, "thread ID within the system");
impl_id!(
    HandleValue,
    u64,
    "handle value, meaningful only within the process that owns it",
    "0x{:08x}"
);
impl_id!(
    ObjectKey,
    u64,
    "kernel object address, used purely as an opaque correlation key",
    "0x{:016x}"
);

impl ProcessId {
    /// Converts a pointer-width process ID as reported by the kernel.
    ///
    /// Process IDs always fit in 32 bits; the upper bits are discarded.
    pub const fn from_native(value: u64) -> Self {
        Self(value as u32)
    }
}
