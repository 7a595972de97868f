use zombie_core::{NtStatus, Win32Error, ZombieError};

/// Error type for the Windows driver.
#[derive(Debug)]
pub enum Error {
    /// A required function is not exported by its module.
    EntryPoint {
        /// The module name.
        module: &'static str,

        /// The function name.
        function: &'static str,
    },

    /// A native call failed.
    Nt {
        /// The failed operation.
        operation: &'static str,

        /// The returned status.
        status: NtStatus,
    },

    /// A Win32 call failed.
    Win32 {
        /// The failed operation.
        operation: &'static str,

        /// The last-error code.
        code: Win32Error,
    },
}

impl Error {
    /// Creates a new error from a failed Win32 call.
    pub fn win32(operation: &'static str, err: windows::core::Error) -> Self {
        // HRESULT_FROM_WIN32 wraps the code in the low word.
        let hresult = err.code().0 as u32;
        let code = if hresult & 0xFFFF_0000 == 0x8007_0000 {
            hresult & 0xFFFF
        }
        else {
            hresult
        };

        Self::Win32 {
            operation,
            code: Win32Error(code),
        }
    }
}

impl From<Error> for ZombieError {
    fn from(value: Error) -> Self {
        match value {
            Error::EntryPoint { module, function } => Self::EntryPoint { module, function },
            Error::Nt { operation, status } => Self::NtCall { operation, status },
            Error::Win32 { operation, code } => Self::Win32Call { operation, code },
        }
    }
}
