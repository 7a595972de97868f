use std::{io::Write, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    EnumerateProcesses, FileTime, HandleValue, NtStatus, OwnedHandle, ProcessAccess, ProcessId,
    ThreadAccess, ThreadId,
};

/// An exited process, or an exited thread still resident in its process.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZombieRecord {
    /// The process ID.
    pub process_id: ProcessId,

    /// The thread ID. Zero if the record describes the process itself.
    pub thread_id: ThreadId,

    /// The process image path in NT device form.
    pub image_path: String,

    /// When the process was created.
    pub creation: FileTime,

    /// When the process exited.
    pub exit: FileTime,

    /// Number of resident threads. Only set on process records.
    pub thread_count: usize,

    /// The ID of the process that created this one.
    pub parent_process_id: ProcessId,

    /// The parent image path, or empty if the parent has exited.
    pub parent_image_path: String,
}

impl ZombieRecord {
    /// Checks if the record describes a thread.
    pub fn is_thread(&self) -> bool {
        !self.thread_id.is_zero()
    }
}

/// Handles to every zombie process and its resident threads.
///
/// Each handle was opened by this process and is closed exactly once, when
/// the table is dropped.
pub struct ZombieHandles<'a, Driver>
where
    Driver: EnumerateProcesses + ?Sized,
{
    /// Retained handles and the zombie each refers to.
    handles: IndexMap<HandleValue, (OwnedHandle<'a, Driver>, ZombieRecord)>,

    /// Zombie processes by process ID.
    zombies: IndexMap<ProcessId, ZombieRecord>,

    /// Non-fatal enumeration errors.
    errors: Vec<String>,

    /// Number of processes inspected.
    total_processes: usize,
}

impl<'a, Driver> ZombieHandles<'a, Driver>
where
    Driver: EnumerateProcesses + ?Sized,
{
    /// Enumerates every process on the system and retains handles to those
    /// that have exited at least `min_age` ago.
    ///
    /// A zero `min_age` disables age filtering.
    ///
    /// # Implementation Details
    ///
    /// Each enumeration step returns a new handle. The previous handle is
    /// closed once the next one has been obtained, unless it was retained.
    /// Per-process query failures and a terminal status other than
    /// `STATUS_NO_MORE_ENTRIES` are recorded as non-fatal errors.
    pub fn acquire(driver: &'a Driver, min_age: Duration) -> Self {
        let now = driver.system_time();

        let mut result = Self {
            handles: IndexMap::new(),
            zombies: IndexMap::new(),
            errors: Vec::new(),
            total_processes: 0,
        };

        let mut previous = None;
        let mut released = None;

        let terminal = loop {
            let handle = match driver.next_process(previous, ProcessAccess::QUERY_LIMITED_INFORMATION)
            {
                Ok(handle) => handle,
                Err(status) => break status,
            };

            drop(released.take());
            previous = Some(handle);

            let process = OwnedHandle::new(driver, handle);
            result.total_processes += 1;

            match inspect(driver, &process, now, min_age) {
                Ok(Some(record)) => result.retain(driver, process, record),
                Ok(None) => released = Some(process),
                Err(status) => {
                    result.errors.push(format!(
                        "NtQueryInformationProcess failed during enumeration {}: {status}",
                        result.total_processes
                    ));
                    released = Some(process);
                }
            }
        };

        drop(released);

        if terminal != NtStatus::NO_MORE_ENTRIES {
            tracing::warn!(%terminal, total = result.total_processes, "process enumeration stopped");
            result.errors.push(format!(
                "Process enumeration failed: NtGetNextProcess returned {terminal} after {} iterations",
                result.total_processes
            ));
        }

        result
    }

    /// Retains the process handle and a handle to each resident thread.
    ///
    /// Threads whose ID cannot be read are counted but not retained.
    fn retain(
        &mut self,
        driver: &'a Driver,
        process: OwnedHandle<'a, Driver>,
        mut record: ZombieRecord,
    ) {
        let threads = resident_threads(driver, record.process_id);
        record.thread_count = threads.len();

        tracing::debug!(
            pid = %record.process_id,
            image = %record.image_path,
            threads = record.thread_count,
            "zombie process"
        );

        for thread in threads {
            // A thread record without its ID would read as a process record.
            let thread_id = match driver.thread_id(thread.as_raw()) {
                Ok(thread_id) if !thread_id.is_zero() => thread_id,
                Ok(_) => {
                    tracing::debug!(pid = %record.process_id, "thread ID is zero");
                    continue;
                }
                Err(err) => {
                    tracing::debug!(%err, pid = %record.process_id, "thread ID unavailable");
                    continue;
                }
            };

            let thread_record = ZombieRecord {
                thread_id,
                thread_count: 0,
                ..record.clone()
            };

            self.handles
                .insert(thread.as_raw(), (thread, thread_record));
        }

        self.handles
            .insert(process.as_raw(), (process, record.clone()));
        self.zombies.insert(record.process_id, record);
    }

    /// Returns the number of retained handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Checks if no handles were retained.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Checks if `handle` is one of the retained handles.
    pub fn contains(&self, handle: HandleValue) -> bool {
        self.handles.contains_key(&handle)
    }

    /// Returns the zombie a retained handle refers to.
    pub fn get(&self, handle: HandleValue) -> Option<&ZombieRecord> {
        self.handles.get(&handle).map(|(_, record)| record)
    }

    /// Returns an iterator over the retained handles and their zombies.
    pub fn iter(&self) -> impl Iterator<Item = (HandleValue, &ZombieRecord)> {
        self.handles
            .iter()
            .map(|(&handle, (_, record))| (handle, record))
    }

    /// Returns the zombie processes by process ID.
    pub fn zombies(&self) -> &IndexMap<ProcessId, ZombieRecord> {
        &self.zombies
    }

    /// Returns the non-fatal enumeration errors.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Returns the number of processes inspected.
    pub fn total_processes(&self) -> usize {
        self.total_processes
    }

    /// Returns the number of zombie processes, not counting threads.
    pub fn zombie_processes(&self) -> usize {
        self.zombies.len()
    }

    /// Writes the retained handles as tab-separated text.
    pub fn write_tsv(&self, this_process: ProcessId, mut writer: impl Write) -> Result<(), std::io::Error> {
        writeln!(
            writer,
            "ThisPID\tHandleValue\tPID\tTID\tnThreads\tImagePath\tcreateTime\texitTime\tPPID\tParentImagePath"
        )?;

        for (handle, record) in self.iter() {
            writeln!(
                writer,
                "{this_process}\t{handle}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                record.process_id,
                record.thread_id,
                record.thread_count,
                record.image_path,
                record.creation,
                record.exit,
                record.parent_process_id,
                record.parent_image_path,
            )?;
        }

        Ok(())
    }
}

/// Decides whether an enumerated process is a zombie old enough to report.
fn inspect<Driver>(
    driver: &Driver,
    process: &OwnedHandle<'_, Driver>,
    now: FileTime,
    min_age: Duration,
) -> Result<Option<ZombieRecord>, NtStatus>
where
    Driver: EnumerateProcesses + ?Sized,
{
    let info = driver.process_basic_info(process.as_raw())?;
    if !info.is_deleting() {
        return Ok(None);
    }

    let times = match driver.process_times(process.as_raw()) {
        Ok(times) => times,
        Err(err) => {
            tracing::debug!(%err, pid = %info.process_id, "process times unavailable");
            return Ok(None);
        }
    };

    // Flagged as deleting but not exited yet.
    if times.exit.is_zero() {
        tracing::trace!(pid = %info.process_id, "deleting process without exit time");
        return Ok(None);
    }

    if !min_age.is_zero() {
        let old_enough = times
            .exit
            .elapsed_until(now)
            .is_some_and(|elapsed| elapsed.as_secs() >= min_age.as_secs());

        if !old_enough {
            return Ok(None);
        }
    }

    let image_path = match driver.process_image_file_name(process.as_raw()) {
        Ok(image_path) => image_path,
        Err(status) => {
            tracing::debug!(%status, pid = %info.process_id, "image file name unavailable");
            String::new()
        }
    };

    Ok(Some(ZombieRecord {
        process_id: info.process_id,
        thread_id: ThreadId::default(),
        image_path,
        creation: times.creation,
        exit: times.exit,
        thread_count: 0,
        parent_process_id: info.parent_process_id,
        parent_image_path: parent_image_path(driver, info.parent_process_id, times.creation),
    }))
}

/// Returns the image path of the parent process if it is still running.
///
/// A running process with the parent's ID that was created after the child
/// is a different process that reused the ID.
fn parent_image_path<Driver>(driver: &Driver, parent: ProcessId, child_creation: FileTime) -> String
where
    Driver: EnumerateProcesses + ?Sized,
{
    let handle = match driver.open_process(parent, ProcessAccess::QUERY_LIMITED_INFORMATION) {
        Ok(handle) => OwnedHandle::new(driver, handle),
        Err(_) => return String::new(),
    };

    match driver.process_times(handle.as_raw()) {
        Ok(times) if times.creation < child_creation => driver
            .process_image_path(handle.as_raw())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Opens a handle to each thread still resident in a process.
///
/// Returns no threads if the process cannot be opened for query access.
fn resident_threads<Driver>(driver: &Driver, process_id: ProcessId) -> Vec<OwnedHandle<'_, Driver>>
where
    Driver: EnumerateProcesses + ?Sized,
{
    let process = match driver.open_process(process_id, ProcessAccess::QUERY_INFORMATION) {
        Ok(handle) => OwnedHandle::new(driver, handle),
        Err(err) => {
            tracing::debug!(%err, pid = %process_id, "cannot open zombie for thread enumeration");
            return Vec::new();
        }
    };

    let mut threads = Vec::new();
    let mut previous = None;

    loop {
        match driver.next_thread(
            process.as_raw(),
            previous,
            ThreadAccess::QUERY_LIMITED_INFORMATION,
        ) {
            Ok(handle) => {
                previous = Some(handle);
                threads.push(OwnedHandle::new(driver, handle));
            }
            Err(status) => {
                if status != NtStatus::NO_MORE_ENTRIES {
                    tracing::trace!(%status, pid = %process_id, "thread enumeration stopped");
                }
                break;
            }
        }
    }

    threads
}

#[cfg(test)]
#[path = "acquisition_tests.rs"]
mod tests;
