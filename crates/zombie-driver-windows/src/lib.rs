//! Windows driver for zombie discovery.
//!
//! Undocumented `ntdll.dll` functions are resolved at runtime. Creating a
//! [`ZombieWindowsDriver`] fails if any of them is missing.

#![cfg(windows)]

mod driver;
mod error;
mod ntdll;
mod services;

use zombie_core::{
    ElevatePrivilege, EnumerateProcesses, FileTime, HandleValue, NtStatus, ProcessAccess,
    ProcessBasicInfo, ProcessId, ProcessTimes, QuerySystemHandles, ThreadAccess, ThreadId,
    ZombieDriver, ZombieError,
};

pub use self::{error::Error, services::WindowsServices};
use self::driver::WindowsDriver;

/// Windows driver for zombie discovery.
pub struct ZombieWindowsDriver {
    inner: WindowsDriver,
}

impl ZombieWindowsDriver {
    /// Creates a new Windows driver.
    pub fn new() -> Result<Self, ZombieError> {
        Ok(Self {
            inner: WindowsDriver::new()?,
        })
    }
}

impl ZombieDriver for ZombieWindowsDriver {
    fn current_process_id(&self) -> ProcessId {
        self.inner.current_process_id()
    }

    fn system_time(&self) -> FileTime {
        self.inner.system_time()
    }

    fn close_handle(&self, handle: HandleValue) -> Result<(), ZombieError> {
        Ok(self.inner.close_handle(handle)?)
    }
}

impl QuerySystemHandles for ZombieWindowsDriver {
    fn query_system_handles(&self, buffer: &mut [u8]) -> (NtStatus, usize) {
        self.inner.query_system_handles(buffer)
    }
}

impl EnumerateProcesses for ZombieWindowsDriver {
    fn next_process(
        &self,
        previous: Option<HandleValue>,
        access: ProcessAccess,
    ) -> Result<HandleValue, NtStatus> {
        self.inner.next_process(previous, access)
    }

    fn next_thread(
        &self,
        process: HandleValue,
        previous: Option<HandleValue>,
        access: ThreadAccess,
    ) -> Result<HandleValue, NtStatus> {
        self.inner.next_thread(process, previous, access)
    }

    fn process_basic_info(&self, process: HandleValue) -> Result<ProcessBasicInfo, NtStatus> {
        self.inner.process_basic_info(process)
    }

    fn process_times(&self, process: HandleValue) -> Result<ProcessTimes, ZombieError> {
        Ok(self.inner.process_times(process)?)
    }

    fn process_image_file_name(&self, process: HandleValue) -> Result<String, NtStatus> {
        self.inner.process_image_file_name(process)
    }

    fn open_process(
        &self,
        process_id: ProcessId,
        access: ProcessAccess,
    ) -> Result<HandleValue, ZombieError> {
        Ok(self.inner.open_process(process_id, access)?)
    }

    fn process_image_path(&self, process: HandleValue) -> Result<String, ZombieError> {
        Ok(self.inner.process_image_path(process)?)
    }

    fn thread_id(&self, thread: HandleValue) -> Result<ThreadId, ZombieError> {
        Ok(self.inner.thread_id(thread)?)
    }

    fn has_exited(&self, handle: HandleValue) -> Result<bool, ZombieError> {
        Ok(self.inner.has_exited(handle)?)
    }

    fn handle_count(&self, process: HandleValue) -> Result<u32, ZombieError> {
        Ok(self.inner.handle_count(process)?)
    }
}

impl ElevatePrivilege for ZombieWindowsDriver {
    fn impersonate_self(&self) -> Result<(), ZombieError> {
        Ok(self.inner.impersonate_self()?)
    }

    fn enable_privilege(&self, name: &str) -> Result<(), ZombieError> {
        Ok(self.inner.enable_privilege(name)?)
    }

    fn revert_to_self(&self) -> Result<(), ZombieError> {
        Ok(self.inner.revert_to_self()?)
    }
}

/// Checks if the calling process is a 32-bit process on 64-bit Windows.
pub fn is_wow64() -> Result<bool, ZombieError> {
    Ok(driver::is_wow64()?)
}
