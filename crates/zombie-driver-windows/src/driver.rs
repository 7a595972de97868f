use std::{ffi::c_void, iter::once};

use windows::{
    Win32::{
        Foundation::{
            BOOL, CloseHandle, ERROR_SUCCESS, FILETIME, GetLastError, HANDLE, LUID, NTSTATUS,
        },
        Security::{
            AdjustTokenPrivileges, ImpersonateSelf, LUID_AND_ATTRIBUTES, LookupPrivilegeValueW,
            RevertToSelf, SE_PRIVILEGE_ENABLED, SecurityImpersonation, TOKEN_ADJUST_PRIVILEGES,
            TOKEN_PRIVILEGES, TOKEN_QUERY,
        },
        System::{
            SystemInformation::GetSystemTimeAsFileTime,
            Threading::{
                GetCurrentProcess, GetCurrentProcessId, GetCurrentThread, GetProcessHandleCount,
                GetProcessTimes, GetThreadId, IsWow64Process, OpenProcess, OpenThreadToken,
                PROCESS_ACCESS_RIGHTS, PROCESS_NAME_WIN32, QueryFullProcessImageNameW,
                WaitForSingleObject,
            },
        },
    },
    core::{PCWSTR, PWSTR},
};
use zombie_core::{
    FileTime, HandleValue, NtStatus, ProcessAccess, ProcessBasicInfo, ProcessFlags, ProcessId,
    ProcessTimes, ThreadAccess, ThreadId, Win32Error,
};

use crate::{
    Error,
    ntdll::{
        Ntdll, PROCESS_BASIC_INFORMATION, PROCESS_IMAGE_FILE_NAME,
        ProcessExtendedBasicInformation, SYSTEM_EXTENDED_HANDLE_INFORMATION, UnicodeString,
    },
};

/// Room for a path of `MAX_PATH * 2` UTF-16 characters.
const PATH_CAPACITY: usize = 520;

/// Converts a handle of this process to its value.
pub fn handle_value(handle: HANDLE) -> HandleValue {
    HandleValue(handle.0 as usize as u64)
}

/// Converts a handle value back to a handle of this process.
pub fn raw_handle(value: HandleValue) -> HANDLE {
    HANDLE(value.0 as usize as *mut c_void)
}

fn file_time(value: FILETIME) -> FileTime {
    FileTime::from_parts(value.dwLowDateTime, value.dwHighDateTime)
}

fn status(value: NTSTATUS) -> NtStatus {
    NtStatus(value.0)
}

/// A closed-on-drop token handle.
struct Token(HANDLE);

impl Drop for Token {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            tracing::warn!(%err, "failed to close token handle");
        }
    }
}

/// Windows driver.
pub struct WindowsDriver {
    ntdll: Ntdll,
}

impl WindowsDriver {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            ntdll: Ntdll::resolve()?,
        })
    }

    pub fn current_process_id(&self) -> ProcessId {
        ProcessId(unsafe { GetCurrentProcessId() })
    }

    pub fn system_time(&self) -> FileTime {
        file_time(unsafe { GetSystemTimeAsFileTime() })
    }

    pub fn close_handle(&self, handle: HandleValue) -> Result<(), Error> {
        unsafe { CloseHandle(raw_handle(handle)) }.map_err(|err| Error::win32("CloseHandle", err))
    }

    pub fn query_system_handles(&self, buffer: &mut [u8]) -> (NtStatus, usize) {
        let length = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        let mut return_length = 0u32;

        let result = unsafe {
            (self.ntdll.query_system_information)(
                SYSTEM_EXTENDED_HANDLE_INFORMATION,
                buffer.as_mut_ptr().cast(),
                length,
                &mut return_length,
            )
        };

        (status(result), return_length as usize)
    }

    pub fn next_process(
        &self,
        previous: Option<HandleValue>,
        access: ProcessAccess,
    ) -> Result<HandleValue, NtStatus> {
        let previous = previous.map(raw_handle).unwrap_or_default();
        let mut next = HANDLE::default();

        let result = unsafe {
            (self.ntdll.get_next_process)(previous, access.bits(), 0, 0, &mut next)
        };

        status(result).ok().map(|()| handle_value(next))
    }

    pub fn next_thread(
        &self,
        process: HandleValue,
        previous: Option<HandleValue>,
        access: ThreadAccess,
    ) -> Result<HandleValue, NtStatus> {
        let previous = previous.map(raw_handle).unwrap_or_default();
        let mut next = HANDLE::default();

        let result = unsafe {
            (self.ntdll.get_next_thread)(
                raw_handle(process),
                previous,
                access.bits(),
                0,
                0,
                &mut next,
            )
        };

        status(result).ok().map(|()| handle_value(next))
    }

    pub fn process_basic_info(&self, process: HandleValue) -> Result<ProcessBasicInfo, NtStatus> {
        let mut info = ProcessExtendedBasicInformation {
            size: size_of::<ProcessExtendedBasicInformation>(),
            // SAFETY: all-zero is valid for the plain-data inner structure.
            basic_info: unsafe { std::mem::zeroed() },
            flags: 0,
        };
        let mut return_length = 0u32;

        let result = unsafe {
            (self.ntdll.query_information_process)(
                raw_handle(process),
                PROCESS_BASIC_INFORMATION,
                (&raw mut info).cast(),
                size_of::<ProcessExtendedBasicInformation>() as u32,
                &mut return_length,
            )
        };
        status(result).ok()?;

        Ok(ProcessBasicInfo {
            process_id: ProcessId::from_native(info.basic_info.unique_process_id as u64),
            parent_process_id: ProcessId::from_native(
                info.basic_info.inherited_from_unique_process_id as u64,
            ),
            flags: ProcessFlags::from_bits_retain(info.flags),
        })
    }

    pub fn process_times(&self, process: HandleValue) -> Result<ProcessTimes, Error> {
        let mut creation = FILETIME::default();
        let mut exit = FILETIME::default();
        let mut kernel = FILETIME::default();
        let mut user = FILETIME::default();

        unsafe {
            GetProcessTimes(
                raw_handle(process),
                &mut creation,
                &mut exit,
                &mut kernel,
                &mut user,
            )
        }
        .map_err(|err| Error::win32("GetProcessTimes", err))?;

        Ok(ProcessTimes {
            creation: file_time(creation),
            exit: file_time(exit),
            kernel: file_time(kernel),
            user: file_time(user),
        })
    }

    /// # Implementation Details
    ///
    /// The result is a `UNICODE_STRING` whose buffer follows it in the
    /// output, so the output must stay alive while the string is copied.
    pub fn process_image_file_name(&self, process: HandleValue) -> Result<String, NtStatus> {
        let mut buffer =
            vec![0u64; (size_of::<UnicodeString>() + PATH_CAPACITY * 2).div_ceil(8)];

        loop {
            let length = (buffer.len() * 8) as u32;
            let mut return_length = 0u32;

            let result = unsafe {
                (self.ntdll.query_information_process)(
                    raw_handle(process),
                    PROCESS_IMAGE_FILE_NAME,
                    buffer.as_mut_ptr().cast(),
                    length,
                    &mut return_length,
                )
            };

            match status(result) {
                NtStatus::SUCCESS => break,
                NtStatus::INFO_LENGTH_MISMATCH if return_length > length => {
                    buffer = vec![0u64; (return_length as usize).div_ceil(8)];
                }
                other => return Err(other),
            }
        }

        // SAFETY: the buffer is aligned and starts with a `UNICODE_STRING`.
        let name = unsafe { buffer.as_ptr().cast::<UnicodeString>().read() };
        if name.buffer.is_null() || name.length == 0 {
            return Ok(String::new());
        }

        // SAFETY: the string points into `buffer`, which is still alive.
        let chars =
            unsafe { std::slice::from_raw_parts(name.buffer, usize::from(name.length) / 2) };

        Ok(String::from_utf16_lossy(chars))
    }

    pub fn open_process(
        &self,
        process_id: ProcessId,
        access: ProcessAccess,
    ) -> Result<HandleValue, Error> {
        unsafe { OpenProcess(PROCESS_ACCESS_RIGHTS(access.bits()), false, process_id.0) }
            .map(handle_value)
            .map_err(|err| Error::win32("OpenProcess", err))
    }

    pub fn process_image_path(&self, process: HandleValue) -> Result<String, Error> {
        let mut path = [0u16; PATH_CAPACITY];
        let mut length = path.len() as u32;

        unsafe {
            QueryFullProcessImageNameW(
                raw_handle(process),
                PROCESS_NAME_WIN32,
                PWSTR(path.as_mut_ptr()),
                &mut length,
            )
        }
        .map_err(|err| Error::win32("QueryFullProcessImageNameW", err))?;

        Ok(String::from_utf16_lossy(&path[..length as usize]))
    }

    pub fn thread_id(&self, thread: HandleValue) -> Result<ThreadId, Error> {
        match unsafe { GetThreadId(raw_handle(thread)) } {
            0 => Err(Error::Win32 {
                operation: "GetThreadId",
                code: Win32Error(unsafe { GetLastError() }.0),
            }),
            thread_id => Ok(ThreadId(thread_id)),
        }
    }

    pub fn has_exited(&self, handle: HandleValue) -> Result<bool, Error> {
        const WAIT_OBJECT_0: u32 = 0;
        const WAIT_TIMEOUT: u32 = 258;

        match unsafe { WaitForSingleObject(raw_handle(handle), 0) }.0 {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(Error::Win32 {
                operation: "WaitForSingleObject",
                code: Win32Error(unsafe { GetLastError() }.0),
            }),
        }
    }

    pub fn handle_count(&self, process: HandleValue) -> Result<u32, Error> {
        let mut count = 0u32;

        unsafe { GetProcessHandleCount(raw_handle(process), &mut count) }
            .map_err(|err| Error::win32("GetProcessHandleCount", err))?;

        Ok(count)
    }

    pub fn impersonate_self(&self) -> Result<(), Error> {
        unsafe { ImpersonateSelf(SecurityImpersonation) }
            .map_err(|err| Error::win32("ImpersonateSelf", err))
    }

    /// # Implementation Details
    ///
    /// `AdjustTokenPrivileges` succeeds even if the privilege is not held,
    /// reporting `ERROR_NOT_ALL_ASSIGNED` through the last error.
    pub fn enable_privilege(&self, name: &str) -> Result<(), Error> {
        let name = name.encode_utf16().chain(once(0)).collect::<Vec<_>>();

        let mut token = HANDLE::default();
        unsafe {
            OpenThreadToken(
                GetCurrentThread(),
                TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
                true,
                &mut token,
            )
        }
        .map_err(|err| Error::win32("OpenThreadToken", err))?;
        let token = Token(token);

        let mut luid = LUID::default();
        unsafe { LookupPrivilegeValueW(PCWSTR::null(), PCWSTR(name.as_ptr()), &mut luid) }
            .map_err(|err| Error::win32("LookupPrivilegeValueW", err))?;

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };

        unsafe { AdjustTokenPrivileges(token.0, false, Some(&raw const privileges), 0, None, None) }
            .map_err(|err| Error::win32("AdjustTokenPrivileges", err))?;

        let last_error = unsafe { GetLastError() };
        if last_error != ERROR_SUCCESS {
            return Err(Error::Win32 {
                operation: "AdjustTokenPrivileges",
                code: Win32Error(last_error.0),
            });
        }

        Ok(())
    }

    pub fn revert_to_self(&self) -> Result<(), Error> {
        unsafe { RevertToSelf() }.map_err(|err| Error::win32("RevertToSelf", err))
    }
}

/// Checks if the calling process runs under WOW64.
pub fn is_wow64() -> Result<bool, Error> {
    let mut wow64 = BOOL::default();

    unsafe { IsWow64Process(GetCurrentProcess(), &mut wow64) }
        .map_err(|err| Error::win32("IsWow64Process", err))?;

    Ok(wow64.as_bool())
}
