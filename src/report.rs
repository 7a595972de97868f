//! Report rendering.

use std::io::Write;

use crate::{FileTime, ServiceNames, ZombieOwners, ZombieRecord};

/// Width of the count column in the summary table.
const COUNT_WIDTH: usize = 6;

/// Padding added to the longest executable name for the " (PID)" suffix.
const PID_SUFFIX_WIDTH: usize = 10;

/// Report layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// One aligned row per owner.
    Summary,

    /// One tab-separated row per owner.
    SummaryTsv,

    /// Every held zombie, grouped by owner.
    Details,

    /// One tab-separated row per held or unexplained zombie.
    DetailsTsv,
}

impl Report {
    /// Selects a layout from the `--details` and `--csv` switches.
    pub fn new(details: bool, csv: bool) -> Self {
        match (details, csv) {
            (false, false) => Self::Summary,
            (false, true) => Self::SummaryTsv,
            (true, false) => Self::Details,
            (true, true) => Self::DetailsTsv,
        }
    }

    /// Writes the report.
    ///
    /// `now` is the time exit ages are measured against.
    pub fn write(
        self,
        owners: &ZombieOwners<'_>,
        now: FileTime,
        writer: impl Write,
    ) -> Result<(), std::io::Error> {
        match self {
            Self::Summary => write_summary(owners, writer),
            Self::SummaryTsv => write_summary_tsv(owners, writer),
            Self::Details => write_details(owners, now, writer),
            Self::DetailsTsv => write_details_tsv(owners, now, writer),
        }
    }
}

/// Writes owners, their zombie handle counts and hosted services as an
/// aligned table.
pub fn write_summary(owners: &ZombieOwners<'_>, mut writer: impl Write) -> Result<(), std::io::Error> {
    let width = owners
        .owners_sorted()
        .map(|owner| owner.exe_name.chars().count())
        .max()
        .unwrap_or(0)
        + PID_SUFFIX_WIDTH;

    writeln!(writer, "{:<width$}{:>COUNT_WIDTH$}     Services", "Exe name (PID)", "Count")?;
    writeln!(writer, "{:<width$}{:>COUNT_WIDTH$}     --------", "--------------", "-----")?;

    for owner in owners.owners_sorted() {
        let name = format!("{} ({})", owner.exe_name, owner.process_id);
        write!(writer, "{name:<width$}{:>COUNT_WIDTH$}", owner.handles.len())?;

        if let Some(services) = owner.services {
            write!(writer, "     {}", service_names(services))?;
        }

        writeln!(writer)?;
    }

    if !owners.unexplained().is_empty() {
        writeln!(
            writer,
            "{:<width$}{:>COUNT_WIDTH$}",
            "(No process)",
            owners.unexplained().len()
        )?;
    }

    for error in owners.process_enum_errors() {
        writeln!(writer, "ERROR: {error}")?;
    }

    Ok(())
}

/// Writes owners, their zombie handle counts and hosted services as
/// tab-separated text.
pub fn write_summary_tsv(owners: &ZombieOwners<'_>, mut writer: impl Write) -> Result<(), std::io::Error> {
    writeln!(writer, "Exe name\tPID\tCount\tServices")?;

    for owner in owners.owners_sorted() {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            owner.exe_name,
            owner.process_id,
            owner.handles.len(),
            owner.services.map(service_names).unwrap_or_default()
        )?;
    }

    if !owners.unexplained().is_empty() {
        writeln!(writer, "(No process)\t\t{}\t", owners.unexplained().len())?;
    }

    for error in owners.process_enum_errors() {
        writeln!(writer, "ERROR: {error}\t\t\t")?;
    }

    Ok(())
}

/// Writes every held zombie grouped by owner, then the zombies no handle
/// was found for.
pub fn write_details(
    owners: &ZombieOwners<'_>,
    now: FileTime,
    mut writer: impl Write,
) -> Result<(), std::io::Error> {
    writeln!(writer, "Zombie processes: {}", owners.zombie_processes())?;
    writeln!(
        writer,
        "Zombie threads  : {}",
        owners.zombie_handles().saturating_sub(owners.zombie_processes())
    )?;
    writeln!(writer)?;

    for owner in owners.owners_sorted() {
        write!(
            writer,
            "{} ({}) | Full path: {}",
            owner.exe_name, owner.process_id, owner.image_path
        )?;

        if let Some(services) = owner.services {
            write!(writer, " | Service(s): {}", service_names(services))?;
        }

        writeln!(writer)?;
        writeln!(writer, "{} zombie handle(s):", owner.handles.len())?;

        for held in &owner.handles {
            let zombie = &held.zombie;

            if zombie.is_thread() {
                write!(
                    writer,
                    "    Handle {}  PID:TID {}:{}",
                    held.handle, zombie.process_id, zombie.thread_id
                )?;
            }
            else {
                write!(
                    writer,
                    "    Handle {}  PID {:>6}",
                    held.handle, zombie.process_id.0
                )?;
            }

            writeln!(
                writer,
                "  {} ; exited {}: {} ago",
                zombie.image_path,
                zombie.exit,
                ago(zombie.exit.seconds_until(now))
            )?;
            writeln!(
                writer,
                "        Parent: {} {}",
                zombie.parent_process_id,
                parent_image_path(zombie)
            )?;
        }

        writeln!(writer)?;
    }

    if !owners.unexplained().is_empty() {
        writeln!(writer, "Zombie processes for which no handles were found:")?;
        writeln!(writer, "{} process(es):", owners.unexplained().len())?;

        for zombie in owners.unexplained() {
            writeln!(writer, "    PID {}  {}", zombie.process_id, zombie.image_path)?;
            writeln!(
                writer,
                "      Exited {}: {} ago",
                zombie.exit,
                ago(zombie.exit.seconds_until(now))
            )?;
            writeln!(writer, "      Threads: {}", zombie.thread_count)?;
            writeln!(
                writer,
                "      Parent: {} {}",
                zombie.parent_process_id,
                parent_image_path(zombie)
            )?;
        }
    }

    for error in owners.process_enum_errors() {
        writeln!(writer, "ERROR: {error}")?;
    }

    Ok(())
}

/// Writes one tab-separated row per held zombie, then one per zombie no
/// handle was found for.
pub fn write_details_tsv(
    owners: &ZombieOwners<'_>,
    now: FileTime,
    mut writer: impl Write,
) -> Result<(), std::io::Error> {
    writeln!(
        writer,
        "Owning process name\tOwning PID\tOwning process image path\tServices\tHandle\t\
         Z PID\tZ TID\tZombie image path\tThreads\tStarted\tExited\tExited ago\tPPID\t\
         Parent image path"
    )?;

    for owner in owners.owners_sorted() {
        let services = owner.services.map(service_names).unwrap_or_default();

        for held in &owner.handles {
            let zombie = &held.zombie;

            // Thread handles carry a TID, process handles a thread count.
            let (thread_id, threads) = if zombie.is_thread() {
                (zombie.thread_id.to_string(), String::new())
            }
            else {
                (String::new(), zombie.thread_count.to_string())
            };

            writeln!(
                writer,
                "{}\t{}\t{}\t{services}\t{}\t{}\t{thread_id}\t{}\t{threads}\t{}",
                owner.exe_name,
                owner.process_id,
                owner.image_path,
                held.handle,
                zombie.process_id,
                zombie.image_path,
                timeline(zombie, now),
            )?;
        }
    }

    for zombie in owners.unexplained() {
        writeln!(
            writer,
            "\t\t\t\t\t{}\t\t{}\t{}\t{}",
            zombie.process_id,
            zombie.image_path,
            zombie.thread_count,
            timeline(zombie, now),
        )?;
    }

    for error in owners.process_enum_errors() {
        writeln!(writer, "ERROR\tERROR\t{error}\t\t\t\t\t\t\t\t\t\t\t")?;
    }

    Ok(())
}

/// Formats the trailing five columns of a details row.
fn timeline(zombie: &ZombieRecord, now: FileTime) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        zombie.creation,
        zombie.exit,
        ago(zombie.exit.seconds_until(now)),
        zombie.parent_process_id,
        parent_image_path(zombie)
    )
}

fn parent_image_path(zombie: &ZombieRecord) -> &str {
    if zombie.parent_image_path.is_empty() {
        "(exited)"
    }
    else {
        &zombie.parent_image_path
    }
}

/// Joins service key names, each followed by a space.
fn service_names(services: &[ServiceNames]) -> String {
    services
        .iter()
        .map(|service| format!("{} ", service.name))
        .collect()
}

/// Formats a number of seconds as English text.
///
/// Larger units are shown once any larger unit is non-zero, e.g.
/// `"1 min 30 secs"` or `"1 day 3 hrs 46 min 40 secs"`.
pub fn ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let days = seconds / DAY;
    let hours = seconds % DAY / HOUR;
    let minutes = seconds % HOUR / MINUTE;
    let seconds = seconds % MINUTE;

    let mut result = String::new();

    if days > 0 {
        result += &format!("{days} {} ", if days == 1 { "day" } else { "days" });
    }

    if days > 0 || hours > 0 {
        result += &format!("{hours} {} ", if hours == 1 { "hour" } else { "hrs" });
    }

    if days > 0 || hours > 0 || minutes > 0 {
        result += &format!("{minutes} min ");
    }

    result += &format!("{seconds} secs");
    result
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
