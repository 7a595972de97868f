use std::io::Write;

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{HandleValue, NtStatus, ObjectKey, ProcessId, QuerySystemHandles, ZombieError};

/// Header of the systemwide handle table.
///
/// # Implementation Details
///
/// Corresponds to `SYSTEM_HANDLE_INFORMATION_EX`, without the trailing
/// entry array.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SystemHandleTableHeader {
    /// Number of entries following the header.
    pub number_of_handles: u64,

    /// Reserved.
    pub reserved: u64,
}

/// Raw entry of the systemwide handle table.
///
/// # Implementation Details
///
/// Corresponds to `SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SystemHandleTableEntry {
    /// Address of the kernel object.
    pub object: u64,

    /// ID of the process owning the handle.
    pub unique_process_id: u64,

    /// Handle value within the owning process.
    pub handle_value: u64,

    /// Granted access mask.
    pub granted_access: u32,

    /// Creator back-trace index.
    pub creator_back_trace_index: u16,

    /// Object type index.
    pub object_type_index: u16,

    /// Handle attributes.
    pub handle_attributes: u32,

    /// Reserved.
    pub reserved: u32,
}

/// One handle from the systemwide handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemHandle {
    /// The process holding the handle.
    pub process_id: ProcessId,

    /// The handle value, meaningful only within [`process_id`].
    ///
    /// [`process_id`]: Self::process_id
    pub handle: HandleValue,

    /// The kernel object the handle refers to.
    pub object: ObjectKey,

    /// The object type index.
    pub object_type_index: u16,

    /// The granted access mask.
    pub granted_access: u32,

    /// The creator back-trace index.
    pub creator_back_trace_index: u16,

    /// The handle attributes.
    pub attributes: u32,
}

impl From<SystemHandleTableEntry> for SystemHandle {
    fn from(value: SystemHandleTableEntry) -> Self {
        Self {
            process_id: ProcessId::from_native(value.unique_process_id),
            handle: HandleValue(value.handle_value),
            object: ObjectKey(value.object),
            object_type_index: value.object_type_index,
            granted_access: value.granted_access,
            creator_back_trace_index: value.creator_back_trace_index,
            attributes: value.handle_attributes,
        }
    }
}

impl From<SystemHandle> for SystemHandleTableEntry {
    fn from(value: SystemHandle) -> Self {
        Self {
            object: value.object.0,
            unique_process_id: u64::from(value.process_id.0),
            handle_value: value.handle.0,
            granted_access: value.granted_access,
            creator_back_trace_index: value.creator_back_trace_index,
            object_type_index: value.object_type_index,
            handle_attributes: value.attributes,
            reserved: 0,
        }
    }
}

/// A point-in-time snapshot of every open handle on the system.
///
/// The table owns the raw buffer returned by the system and interprets it
/// on access. Indices are validated before any entry is read.
#[derive(Debug)]
pub struct SystemHandleTable {
    /// Raw buffer, 8-byte aligned.
    buffer: Vec<u64>,

    /// Number of entries that fit in the buffer.
    count: usize,

    /// Size the system reported on the successful query.
    reported_size: usize,
}

impl SystemHandleTable {
    /// Size of the table header in bytes.
    pub const HEADER_SIZE: usize = size_of::<SystemHandleTableHeader>();

    /// Size of one table entry in bytes.
    pub const ENTRY_SIZE: usize = size_of::<SystemHandleTableEntry>();

    /// Captures the systemwide handle table.
    ///
    /// # Implementation Details
    ///
    /// The first query uses a buffer that only fits the header, which the
    /// system rejects with `STATUS_INFO_LENGTH_MISMATCH` and the required
    /// size. Each further attempt allocates 25% more than the last reported
    /// size, since handles may be created between the calls. The previous
    /// buffer is released before the next one is allocated. Any status other
    /// than success or `STATUS_INFO_LENGTH_MISMATCH` is fatal.
    pub fn capture<Driver>(driver: &Driver) -> Result<Self, ZombieError>
    where
        Driver: QuerySystemHandles + ?Sized,
    {
        let mut size = Self::HEADER_SIZE;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut buffer = allocate(size)?;
            let (status, reported) = driver.query_system_handles(buffer.as_mut_bytes());

            match status {
                NtStatus::SUCCESS => return Ok(Self::from_buffer(buffer, reported)),
                NtStatus::INFO_LENGTH_MISMATCH => {
                    tracing::trace!(attempt, attempted = size, reported, "handle table too small");

                    drop(buffer);
                    size = reported
                        .checked_add(reported / 4)
                        .ok_or(ZombieError::SizeOverflow(reported))?;
                }
                _ => {
                    return Err(ZombieError::SnapshotQuery {
                        status,
                        attempted: size,
                        reported,
                    });
                }
            }
        }
    }

    fn from_buffer(buffer: Vec<u64>, reported_size: usize) -> Self {
        let bytes = buffer.as_bytes();
        let capacity = bytes.len().saturating_sub(Self::HEADER_SIZE) / Self::ENTRY_SIZE;

        let declared = match SystemHandleTableHeader::read_from_prefix(bytes) {
            Ok((header, _)) => usize::try_from(header.number_of_handles).unwrap_or(usize::MAX),
            Err(_) => 0,
        };

        let count = if declared > capacity {
            tracing::warn!(declared, capacity, "handle table header exceeds buffer");
            capacity
        }
        else {
            declared
        };

        Self {
            buffer,
            count,
            reported_size,
        }
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Checks if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the size of the buffer holding the table.
    pub fn buffer_size(&self) -> usize {
        self.buffer.as_bytes().len()
    }

    /// Returns the size the system reported on the successful query.
    pub fn reported_size(&self) -> usize {
        self.reported_size
    }

    /// Returns the entry at `index`, or `None` if it is out of range.
    pub fn get(&self, index: usize) -> Option<SystemHandle> {
        if index >= self.count {
            return None;
        }

        let offset = Self::HEADER_SIZE + index * Self::ENTRY_SIZE;
        let bytes = self
            .buffer
            .as_bytes()
            .get(offset..offset + Self::ENTRY_SIZE)?;

        SystemHandleTableEntry::read_from_bytes(bytes)
            .ok()
            .map(SystemHandle::from)
    }

    /// Returns an iterator over all entries.
    pub fn iter(&self) -> impl Iterator<Item = SystemHandle> + '_ {
        (0..self.count).filter_map(|index| self.get(index))
    }

    /// Writes the table as tab-separated text.
    pub fn write_tsv(&self, mut writer: impl Write) -> Result<(), std::io::Error> {
        writeln!(writer, "PID\tHandle\tObjectTypeIndex\tObjectAddr")?;

        for entry in self.iter() {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}",
                entry.process_id, entry.handle, entry.object_type_index, entry.object
            )?;
        }

        Ok(())
    }
}

/// Allocates a zeroed, 8-byte aligned buffer of at least `size` bytes.
fn allocate(size: usize) -> Result<Vec<u64>, ZombieError> {
    let words = size.div_ceil(size_of::<u64>());

    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(words)
        .map_err(|_| ZombieError::Allocation(size))?;
    buffer.resize(words, 0);

    Ok(buffer)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
