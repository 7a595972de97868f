//! Core zombie process and thread discovery.
//!
//! A zombie is a process or thread object that has exited but stays
//! resident in kernel memory because some process still holds a handle to
//! it. [`ZombieOwners::update`] finds every zombie and the running
//! processes keeping it alive. All system access goes through the driver
//! traits in this crate.

mod acquisition;
mod core;
mod diagnostics;
mod driver;
mod error;
mod handle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod owners;
mod privilege;
mod services;
mod snapshot;
mod threads;

pub use self::{
    acquisition::{ZombieHandles, ZombieRecord},
    core::{FileTime, HandleValue, NtStatus, ObjectKey, ProcessId, ThreadId, Win32Error},
    diagnostics::DiagnosticFiles,
    driver::{
        ElevatePrivilege, EnumerateProcesses, ProcessAccess, ProcessBasicInfo, ProcessFlags,
        ProcessTimes, QuerySystemHandles, ServiceEntry, ServiceSource, ThreadAccess,
        ZombieDriver,
    },
    error::ZombieError,
    handle::OwnedHandle,
    owners::{HeldZombie, OwnerRecord, UpdateOptions, ZombieOwners},
    privilege::{PrivilegeGuard, SE_DEBUG_NAME, with_privilege},
    services::{ServiceLookup, ServiceNames, ServicesByProcess},
    snapshot::{SystemHandle, SystemHandleTable, SystemHandleTableEntry, SystemHandleTableHeader},
    threads::{ThreadCounts, ThreadReport, ThreadReportRow},
};
