use serde::{Deserialize, Serialize};

use crate::{FileTime, HandleValue, NtStatus, ProcessId, ThreadId, ZombieError};

bitflags::bitflags! {
    /// Access rights requested when opening a process.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ProcessAccess: u32 {
        /// `PROCESS_QUERY_INFORMATION`
        const QUERY_INFORMATION = 0x0400;

        /// `PROCESS_QUERY_LIMITED_INFORMATION`
        const QUERY_LIMITED_INFORMATION = 0x1000;

        /// `SYNCHRONIZE`
        const SYNCHRONIZE = 0x0010_0000;
    }
}

bitflags::bitflags! {
    /// Access rights requested when opening a thread.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ThreadAccess: u32 {
        /// `THREAD_QUERY_LIMITED_INFORMATION`
        const QUERY_LIMITED_INFORMATION = 0x0800;

        /// `SYNCHRONIZE`
        const SYNCHRONIZE = 0x0010_0000;
    }
}

bitflags::bitflags! {
    /// Flags reported by the extended basic process information query.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ProcessFlags: u32 {
        /// The process is protected.
        const IS_PROTECTED = 1 << 0;

        /// The process runs under WOW64.
        const IS_WOW64 = 1 << 1;

        /// The process has exited or is exiting.
        const IS_PROCESS_DELETING = 1 << 2;

        /// The process was created cross-session.
        const IS_CROSS_SESSION_CREATE = 1 << 3;

        /// The process is frozen.
        const IS_FROZEN = 1 << 4;

        /// The process is a background process.
        const IS_BACKGROUND = 1 << 5;

        /// The process is strongly named.
        const IS_STRONGLY_NAMED = 1 << 6;

        /// The process is a secure (IUM) process.
        const IS_SECURE_PROCESS = 1 << 7;

        /// The process is a subsystem process.
        const IS_SUBSYSTEM_PROCESS = 1 << 8;
    }
}

/// Extended basic information about a process.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBasicInfo {
    /// The process ID.
    pub process_id: ProcessId,

    /// The ID of the process that created this one.
    pub parent_process_id: ProcessId,

    /// Process flags.
    pub flags: ProcessFlags,
}

impl ProcessBasicInfo {
    /// Checks if the process has exited or is exiting.
    pub fn is_deleting(&self) -> bool {
        self.flags.contains(ProcessFlags::IS_PROCESS_DELETING)
    }
}

/// Timing information for a process.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTimes {
    /// When the process was created.
    pub creation: FileTime,

    /// When the process exited. Zero if it has not exited.
    pub exit: FileTime,

    /// Time spent in kernel mode.
    pub kernel: FileTime,

    /// Time spent in user mode.
    pub user: FileTime,
}

/// An active service, as reported by the service control manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// The process hosting the service.
    pub process_id: ProcessId,

    /// The service key name.
    pub name: String,

    /// The service display name.
    pub display_name: String,
}

/// A trait for implementing a platform driver.
///
/// All handles passed to and returned from driver methods are handles of the
/// calling process.
pub trait ZombieDriver {
    /// Returns the ID of the calling process.
    fn current_process_id(&self) -> ProcessId;

    /// Returns the current system time.
    fn system_time(&self) -> FileTime;

    /// Closes a handle.
    fn close_handle(&self, handle: HandleValue) -> Result<(), ZombieError>;
}

/// Driver trait for the systemwide handle query.
pub trait QuerySystemHandles: ZombieDriver {
    /// Performs one systemwide extended handle query into `buffer`.
    ///
    /// Returns the status of the call and the buffer length the system
    /// reported as required.
    fn query_system_handles(&self, buffer: &mut [u8]) -> (NtStatus, usize);
}

/// Driver trait for process and thread enumeration.
pub trait EnumerateProcesses: ZombieDriver {
    /// Opens the process following `previous`, including exited processes.
    ///
    /// Starts from the first process if `previous` is `None`. The terminal
    /// status is returned as the error.
    fn next_process(
        &self,
        previous: Option<HandleValue>,
        access: ProcessAccess,
    ) -> Result<HandleValue, NtStatus>;

    /// Opens the thread following `previous` within `process`.
    ///
    /// `process` must have been opened with
    /// [`ProcessAccess::QUERY_INFORMATION`].
    fn next_thread(
        &self,
        process: HandleValue,
        previous: Option<HandleValue>,
        access: ThreadAccess,
    ) -> Result<HandleValue, NtStatus>;

    /// Queries extended basic information about a process.
    fn process_basic_info(&self, process: HandleValue) -> Result<ProcessBasicInfo, NtStatus>;

    /// Retrieves the timing information of a process.
    fn process_times(&self, process: HandleValue) -> Result<ProcessTimes, ZombieError>;

    /// Retrieves the image file name of a process in NT device form.
    ///
    /// Works for processes that have already exited.
    fn process_image_file_name(&self, process: HandleValue) -> Result<String, NtStatus>;

    /// Opens a running process by ID.
    fn open_process(
        &self,
        process_id: ProcessId,
        access: ProcessAccess,
    ) -> Result<HandleValue, ZombieError>;

    /// Retrieves the full Win32 image path of a running process.
    fn process_image_path(&self, process: HandleValue) -> Result<String, ZombieError>;

    /// Retrieves the ID of a thread.
    fn thread_id(&self, thread: HandleValue) -> Result<ThreadId, ZombieError>;

    /// Checks if a process or thread has exited, without waiting.
    fn has_exited(&self, handle: HandleValue) -> Result<bool, ZombieError>;

    /// Retrieves the number of open handles in a process.
    fn handle_count(&self, process: HandleValue) -> Result<u32, ZombieError>;
}

/// Driver trait for thread-local privilege elevation.
pub trait ElevatePrivilege: ZombieDriver {
    /// Gives the calling thread its own copy of the process security context.
    fn impersonate_self(&self) -> Result<(), ZombieError>;

    /// Enables a named privilege in the calling thread's security context.
    fn enable_privilege(&self, name: &str) -> Result<(), ZombieError>;

    /// Returns the calling thread to the process security context.
    fn revert_to_self(&self) -> Result<(), ZombieError>;
}

/// A source of active services and their hosting processes.
pub trait ServiceSource {
    /// Enumerates active Win32 services.
    fn active_services(&self) -> Result<Vec<ServiceEntry>, ZombieError>;
}
