use serde::{Deserialize, Serialize};

/// An `NTSTATUS` value returned by a native system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NtStatus(pub i32);

impl NtStatus {
    /// `STATUS_SUCCESS`
    pub const SUCCESS: Self = Self(0);

    /// `STATUS_NO_MORE_ENTRIES`
    pub const NO_MORE_ENTRIES: Self = Self(0x8000_001A_u32 as i32);

    /// `STATUS_INFO_LENGTH_MISMATCH`
    pub const INFO_LENGTH_MISMATCH: Self = Self(0xC000_0004_u32 as i32);

    /// `STATUS_ACCESS_DENIED`
    pub const ACCESS_DENIED: Self = Self(0xC000_0022_u32 as i32);

    /// `STATUS_INVALID_PARAMETER`
    pub const INVALID_PARAMETER: Self = Self(0xC000_000D_u32 as i32);

    /// Checks if the status is `STATUS_SUCCESS`.
    pub const fn is_success(&self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Converts the status to a `Result`.
    pub const fn ok(self) -> Result<(), NtStatus> {
        if self.is_success() {
            Ok(())
        }
        else {
            Err(self)
        }
    }
}

impl From<i32> for NtStatus {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for NtStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> ::std::fmt::Result {
        let name = match *self {
            Self::SUCCESS => " (STATUS_SUCCESS)",
            Self::NO_MORE_ENTRIES => " (STATUS_NO_MORE_ENTRIES)",
            Self::INFO_LENGTH_MISMATCH => " (STATUS_INFO_LENGTH_MISMATCH)",
            Self::ACCESS_DENIED => " (STATUS_ACCESS_DENIED)",
            Self::INVALID_PARAMETER => " (STATUS_INVALID_PARAMETER)",
            _ => "",
        };

        write!(f, "0x{:08x}{}", self.0, name)
    }
}

/// A Win32 error code, as returned by `GetLastError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Win32Error(pub u32);

impl Win32Error {
    /// `ERROR_ACCESS_DENIED`
    pub const ACCESS_DENIED: Self = Self(5);

    /// `ERROR_INVALID_PARAMETER`
    pub const INVALID_PARAMETER: Self = Self(87);

    /// `ERROR_NOT_ALL_ASSIGNED`
    pub const NOT_ALL_ASSIGNED: Self = Self(1300);

    /// `ERROR_NO_SUCH_PRIVILEGE`
    pub const NO_SUCH_PRIVILEGE: Self = Self(1313);
}

impl From<u32> for Win32Error {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Win32Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "error {} (0x{:08x})", self.0, self.0)
    }
}
