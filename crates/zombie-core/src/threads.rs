use serde::{Deserialize, Serialize};

use crate::{
    EnumerateProcesses, HandleValue, NtStatus, OwnedHandle, ProcessAccess, ProcessId, ThreadAccess,
    ZombieError,
};

/// Thread counts of a process that could be opened for query access.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadCounts {
    /// Threads still running.
    pub active: usize,

    /// Threads that have exited but are still resident.
    pub zombie: usize,

    /// All resident threads.
    ///
    /// May exceed `active + zombie` if the state of a thread could not be
    /// determined.
    pub total: usize,
}

/// One process of the thread report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadReportRow {
    /// The process ID.
    pub process_id: ProcessId,

    /// The image path in NT device form, or the query failure.
    pub image_path: String,

    /// Whether the process has exited.
    pub exited: bool,

    /// Thread counts, if the process could be opened.
    pub threads: Option<ThreadCounts>,

    /// Number of open handles in the process.
    pub handle_count: u32,
}

/// Every process on the system with its thread counts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadReport {
    /// One row per process, in enumeration order.
    pub rows: Vec<ThreadReportRow>,

    /// Non-fatal enumeration errors.
    pub errors: Vec<String>,
}

impl ThreadReport {
    /// Enumerates every process, including exited ones, and counts its
    /// active and exited threads.
    pub fn collect<Driver>(driver: &Driver) -> Self
    where
        Driver: EnumerateProcesses + ?Sized,
    {
        let mut report = Self::default();
        let mut total = 0;
        let mut previous = None;
        let mut current = None;

        let terminal = loop {
            let handle = match driver.next_process(
                previous,
                ProcessAccess::QUERY_LIMITED_INFORMATION | ProcessAccess::SYNCHRONIZE,
            ) {
                Ok(handle) => handle,
                Err(status) => break status,
            };

            previous = Some(handle);
            drop(current.replace(OwnedHandle::new(driver, handle)));
            total += 1;

            match driver.process_basic_info(handle) {
                Ok(info) => report.rows.push(row(driver, handle, info.process_id)),
                Err(status) => report.errors.push(format!(
                    "NtQueryInformationProcess returned {status} during enumeration {total}"
                )),
            }
        };

        drop(current);

        if terminal != NtStatus::NO_MORE_ENTRIES {
            report.errors.push(format!(
                "Process enumeration failed: NtGetNextProcess returned {terminal} after {total} iterations"
            ));
        }

        report
    }

    /// Writes the report as tab-separated text.
    pub fn write_tsv(&self, mut writer: impl std::io::Write) -> Result<(), std::io::Error> {
        writeln!(
            writer,
            "PID\tExe image path\tExited\tActive threads\tZombie threads\tTotal threads\tHandle count"
        )?;

        for row in &self.rows {
            let exited = if row.exited { "Yes" } else { "No" };

            match row.threads {
                Some(threads) => writeln!(
                    writer,
                    "{}\t{}\t{exited}\t{}\t{}\t{}\t{}",
                    row.process_id,
                    row.image_path,
                    threads.active,
                    threads.zombie,
                    threads.total,
                    row.handle_count
                )?,
                None => writeln!(
                    writer,
                    "{}\t{}\t{exited}\t-\t-\t-\t{}",
                    row.process_id, row.image_path, row.handle_count
                )?,
            }
        }

        Ok(())
    }
}

fn row<Driver>(driver: &Driver, process: HandleValue, process_id: ProcessId) -> ThreadReportRow
where
    Driver: EnumerateProcesses + ?Sized,
{
    let image_path = match driver.process_image_file_name(process) {
        Ok(image_path) => image_path,
        Err(status) => status.to_string(),
    };

    let handle_count = driver.handle_count(process).unwrap_or_else(|err| {
        tracing::debug!(%err, pid = %process_id, "handle count unavailable");
        0
    });

    let exited = driver.has_exited(process).unwrap_or_else(|err| {
        tracing::debug!(%err, pid = %process_id, "exit state unavailable");
        false
    });

    let threads = match count_threads(driver, process_id) {
        Ok(threads) => Some(threads),
        Err(err) => {
            tracing::debug!(%err, pid = %process_id, "cannot open process for thread enumeration");
            None
        }
    };

    ThreadReportRow {
        process_id,
        image_path,
        exited,
        threads,
        handle_count,
    }
}

fn count_threads<Driver>(driver: &Driver, process_id: ProcessId) -> Result<ThreadCounts, ZombieError>
where
    Driver: EnumerateProcesses + ?Sized,
{
    let process = OwnedHandle::new(
        driver,
        driver.open_process(process_id, ProcessAccess::QUERY_INFORMATION)?,
    );

    let mut counts = ThreadCounts::default();
    let mut previous = None;
    let mut current = None;

    while let Ok(handle) = driver.next_thread(
        process.as_raw(),
        previous,
        ThreadAccess::QUERY_LIMITED_INFORMATION | ThreadAccess::SYNCHRONIZE,
    ) {
        previous = Some(handle);
        drop(current.replace(OwnedHandle::new(driver, handle)));
        counts.total += 1;

        match driver.has_exited(handle) {
            Ok(true) => counts.zombie += 1,
            Ok(false) => counts.active += 1,
            Err(err) => tracing::debug!(%err, pid = %process_id, "thread state unavailable"),
        }
    }

    drop(current);
    Ok(counts)
}
