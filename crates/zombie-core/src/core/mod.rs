mod file_time;
mod ids;
pub(crate) mod macros;
mod status;

pub use self::{
    file_time::FileTime,
    ids::{HandleValue, ObjectKey, ProcessId, ThreadId},
    status::{NtStatus, Win32Error},
};
