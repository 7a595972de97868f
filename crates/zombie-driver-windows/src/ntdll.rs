use std::ffi::c_void;

use windows::{
    Win32::{
        Foundation::{HANDLE, NTSTATUS},
        System::LibraryLoader::{GetModuleHandleW, GetProcAddress},
    },
    core::{s, w},
};

use crate::Error;

/// `SystemExtendedHandleInformation`
pub const SYSTEM_EXTENDED_HANDLE_INFORMATION: u32 = 0x40;

/// `ProcessBasicInformation`
pub const PROCESS_BASIC_INFORMATION: u32 = 0;

/// `ProcessImageFileName`
pub const PROCESS_IMAGE_FILE_NAME: u32 = 27;

type NtQuerySystemInformationFn = unsafe extern "system" fn(
    class: u32,
    information: *mut c_void,
    length: u32,
    return_length: *mut u32,
) -> NTSTATUS;

type NtQueryInformationProcessFn = unsafe extern "system" fn(
    process: HANDLE,
    class: u32,
    information: *mut c_void,
    length: u32,
    return_length: *mut u32,
) -> NTSTATUS;

type NtGetNextProcessFn = unsafe extern "system" fn(
    process: HANDLE,
    access: u32,
    attributes: u32,
    flags: u32,
    new_process: *mut HANDLE,
) -> NTSTATUS;

type NtGetNextThreadFn = unsafe extern "system" fn(
    process: HANDLE,
    thread: HANDLE,
    access: u32,
    attributes: u32,
    flags: u32,
    new_thread: *mut HANDLE,
) -> NTSTATUS;

/// Corresponds to `PROCESS_BASIC_INFORMATION`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ProcessBasicInformation {
    pub exit_status: NTSTATUS,
    pub peb_base_address: *mut c_void,
    pub affinity_mask: usize,
    pub base_priority: i32,
    pub unique_process_id: usize,
    pub inherited_from_unique_process_id: usize,
}

/// Corresponds to `PROCESS_EXTENDED_BASIC_INFORMATION`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ProcessExtendedBasicInformation {
    pub size: usize,
    pub basic_info: ProcessBasicInformation,
    pub flags: u32,
}

/// Corresponds to `UNICODE_STRING`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UnicodeString {
    pub length: u16,
    pub maximum_length: u16,
    pub buffer: *const u16,
}

macro_rules! entry_point {
    ($module:expr, $name:literal) => {
        match unsafe { GetProcAddress($module, s!($name)) } {
            // SAFETY: the signature of the field matches the export.
            Some(function) => unsafe {
                std::mem::transmute::<unsafe extern "system" fn() -> isize, _>(function)
            },
            None => {
                return Err(Error::EntryPoint {
                    module: "ntdll.dll",
                    function: $name,
                });
            }
        }
    };
}

/// Undocumented `ntdll.dll` exports, resolved at runtime.
pub struct Ntdll {
    pub query_system_information: NtQuerySystemInformationFn,
    pub query_information_process: NtQueryInformationProcessFn,
    pub get_next_process: NtGetNextProcessFn,
    pub get_next_thread: NtGetNextThreadFn,
}

impl Ntdll {
    /// Resolves every export. Fails if any of them is missing.
    pub fn resolve() -> Result<Self, Error> {
        let module = unsafe { GetModuleHandleW(w!("ntdll.dll")) }.map_err(|_| {
            Error::EntryPoint {
                module: "ntdll.dll",
                function: "GetModuleHandleW",
            }
        })?;

        Ok(Self {
            query_system_information: entry_point!(module, "NtQuerySystemInformation"),
            query_information_process: entry_point!(module, "NtQueryInformationProcess"),
            get_next_process: entry_point!(module, "NtGetNextProcess"),
            get_next_thread: entry_point!(module, "NtGetNextThread"),
        })
    }
}
