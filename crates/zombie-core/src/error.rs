use crate::{NtStatus, Win32Error};

/// An error that can occur while looking for zombies.
#[derive(thiserror::Error, Debug)]
pub enum ZombieError {
    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A required platform entry point could not be resolved.
    #[error("Failed to resolve {module}!{function}")]
    EntryPoint {
        /// The module that was expected to export the function.
        module: &'static str,

        /// The function name.
        function: &'static str,
    },

    /// A native system call failed.
    #[error("{operation} failed: {status}")]
    NtCall {
        /// The failed operation.
        operation: &'static str,

        /// The returned status.
        status: NtStatus,
    },

    /// A Win32 call failed.
    #[error("{operation} failed: {code}")]
    Win32Call {
        /// The failed operation.
        operation: &'static str,

        /// The last-error code.
        code: Win32Error,
    },

    /// The systemwide handle query returned an unexpected status.
    #[error(
        "NtQuerySystemInformation returned {status}; buffer size {attempted}, reported size {reported}"
    )]
    SnapshotQuery {
        /// The returned status.
        status: NtStatus,

        /// The size of the buffer passed to the query.
        attempted: usize,

        /// The size the query reported as required.
        reported: usize,
    },

    /// Integer overflow while computing a buffer size.
    #[error("Integer overflow computing buffer size from {0} bytes")]
    SizeOverflow(usize),

    /// A buffer could not be allocated.
    #[error("Failed to allocate {0} bytes")]
    Allocation(usize),

    /// A privilege could not be enabled.
    #[error("Failed to enable {privilege}: {source}")]
    Privilege {
        /// The privilege name.
        privilege: &'static str,

        /// The underlying error.
        source: Box<ZombieError>,
    },

    /// The process runs with the wrong pointer width for the system.
    #[error("Wrong version. You need to run the 64-bit version of this program.")]
    WrongArchitecture,

    /// Operation not supported.
    #[error("Operation not supported.")]
    NotSupported,

    /// Other error.
    #[error("{0}")]
    Other(&'static str),
}

impl ZombieError {
    /// Creates a new error for a failed native call.
    pub fn nt(operation: &'static str, status: impl Into<NtStatus>) -> Self {
        Self::NtCall {
            operation,
            status: status.into(),
        }
    }

    /// Creates a new error for a failed Win32 call.
    pub fn win32(operation: &'static str, code: impl Into<Win32Error>) -> Self {
        Self::Win32Call {
            operation,
            code: code.into(),
        }
    }
}
