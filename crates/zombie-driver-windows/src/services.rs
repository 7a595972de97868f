use windows::{
    Win32::{
        Foundation::ERROR_MORE_DATA,
        System::Services::{
            CloseServiceHandle, ENUM_SERVICE_STATUS_PROCESSW, EnumServicesStatusExW,
            OpenSCManagerW, SC_ENUM_PROCESS_INFO, SC_HANDLE, SC_MANAGER_ENUMERATE_SERVICE,
            SERVICE_ACTIVE, SERVICE_WIN32,
        },
    },
    core::{PCWSTR, PWSTR},
};
use zombie_core::{ProcessId, ServiceEntry, ServiceSource, ZombieError};

use crate::Error;

/// A closed-on-drop service control manager handle.
struct ServiceManager(SC_HANDLE);

impl Drop for ServiceManager {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseServiceHandle(self.0) } {
            tracing::warn!(%err, "failed to close service manager handle");
        }
    }
}

/// Active services as reported by the service control manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsServices;

impl WindowsServices {
    /// Creates a new service source.
    pub fn new() -> Self {
        Self
    }

    /// # Implementation Details
    ///
    /// The first call only sizes the buffer. The second call gets 50% more
    /// room than reported, since services may start between the calls.
    fn enumerate(&self) -> Result<Vec<ServiceEntry>, Error> {
        let manager = unsafe {
            OpenSCManagerW(
                PCWSTR::null(),
                PCWSTR::null(),
                SC_MANAGER_ENUMERATE_SERVICE,
            )
        }
        .map_err(|err| Error::win32("OpenSCManagerW", err))?;
        let manager = ServiceManager(manager);

        let mut needed = 0u32;
        let mut returned = 0u32;
        let mut resume = 0u32;

        if let Err(err) = unsafe {
            EnumServicesStatusExW(
                manager.0,
                SC_ENUM_PROCESS_INFO,
                SERVICE_WIN32,
                SERVICE_ACTIVE,
                None,
                &mut needed,
                &mut returned,
                Some(&raw mut resume),
                PCWSTR::null(),
            )
        } {
            if err.code() != ERROR_MORE_DATA.to_hresult() {
                return Err(Error::win32("EnumServicesStatusExW", err));
            }
        }

        let size = needed as usize + needed as usize / 2;
        let mut buffer = vec![0u64; size.div_ceil(8)];
        resume = 0;

        unsafe {
            EnumServicesStatusExW(
                manager.0,
                SC_ENUM_PROCESS_INFO,
                SERVICE_WIN32,
                SERVICE_ACTIVE,
                Some(std::slice::from_raw_parts_mut(
                    buffer.as_mut_ptr().cast::<u8>(),
                    buffer.len() * 8,
                )),
                &mut needed,
                &mut returned,
                Some(&raw mut resume),
                PCWSTR::null(),
            )
        }
        .map_err(|err| Error::win32("EnumServicesStatusExW", err))?;

        let count = (returned as usize)
            .min(buffer.len() * 8 / size_of::<ENUM_SERVICE_STATUS_PROCESSW>());

        // SAFETY: the buffer is aligned and starts with `returned` entries.
        let statuses = unsafe {
            std::slice::from_raw_parts(
                buffer.as_ptr().cast::<ENUM_SERVICE_STATUS_PROCESSW>(),
                count,
            )
        };

        let entries = statuses
            .iter()
            .map(|status| ServiceEntry {
                process_id: ProcessId(status.ServiceStatusProcess.dwProcessId),
                name: wide(status.lpServiceName),
                display_name: wide(status.lpDisplayName),
            })
            .collect();

        Ok(entries)
    }
}

/// Copies a string that points into the enumeration buffer.
fn wide(value: PWSTR) -> String {
    if value.is_null() {
        return String::new();
    }

    // SAFETY: non-null strings are NUL-terminated and outlive the call.
    unsafe { value.to_string() }.unwrap_or_default()
}

impl ServiceSource for WindowsServices {
    fn active_services(&self) -> Result<Vec<ServiceEntry>, ZombieError> {
        Ok(self.enumerate()?)
    }
}
