//! Finds exited processes and threads kept alive by open handles, and the
//! processes holding those handles.
//!
//! The engine lives in `zombie-core` and is re-exported at the top level.
//! The Windows implementation of the driver traits is available under
//! [`driver::windows`] on Windows hosts.

pub mod cli;
pub mod report;

pub use zombie_core::*;

/// Platform drivers.
pub mod driver {
    /// Windows driver.
    #[cfg(windows)]
    pub mod windows {
        pub use zombie_driver_windows::*;
    }
}
