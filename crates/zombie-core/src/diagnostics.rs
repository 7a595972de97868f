use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    EnumerateProcesses, FileTime, ProcessId, ServiceLookup, SystemHandleTable, ZombieHandles,
};

/// Paths of the raw dumps written for one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticFiles {
    /// Dump of the handles opened to zombies.
    pub zombie_handles: PathBuf,

    /// Dump of the systemwide handle table.
    pub all_handles: PathBuf,

    /// Dump of the services by process table.
    pub services: PathBuf,
}

impl DiagnosticFiles {
    /// Derives the dump file names in `directory` from `time`.
    ///
    /// All three names share a `ZombieFinder_YYYYMMDD_HHMMSS` prefix.
    pub fn new(directory: &Path, time: FileTime) -> Self {
        let stamp = match time.to_datetime() {
            Some(datetime) => datetime.format("%Y%m%d_%H%M%S").to_string(),
            None => time.0.to_string(),
        };

        let path = |suffix: &str| directory.join(format!("ZombieFinder_{stamp}_{suffix}.txt"));

        Self {
            zombie_handles: path("ZombieHandles"),
            all_handles: path("AllHandles"),
            services: path("Services"),
        }
    }

    /// Writes all three dumps.
    ///
    /// Returns one message per dump that could not be written.
    pub fn write<Driver>(
        &self,
        this_process: ProcessId,
        zombies: &ZombieHandles<'_, Driver>,
        table: &SystemHandleTable,
        services: &ServiceLookup<'_>,
    ) -> Vec<String>
    where
        Driver: EnumerateProcesses + ?Sized,
    {
        let results = [
            (
                &self.zombie_handles,
                write_file(&self.zombie_handles, |writer| {
                    zombies.write_tsv(this_process, writer)
                }),
            ),
            (
                &self.all_handles,
                write_file(&self.all_handles, |writer| table.write_tsv(writer)),
            ),
            (
                &self.services,
                write_file(&self.services, |writer| services.write_report(writer)),
            ),
        ];

        results
            .into_iter()
            .filter_map(|(path, result)| {
                let err = result.err()?;
                tracing::warn!(%err, path = %path.display(), "diagnostic dump failed");
                Some(format!("Failed to write {}: {err}", path.display()))
            })
            .collect()
    }
}

fn write_file(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> Result<(), std::io::Error>,
) -> Result<(), std::io::Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    body(&mut writer)?;
    writer.flush()
}
