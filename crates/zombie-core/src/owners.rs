use std::{cmp::Ordering, collections::HashMap, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::{
    DiagnosticFiles, ElevatePrivilege, EnumerateProcesses, HandleValue, ObjectKey, OwnedHandle,
    ProcessAccess, ProcessId, QuerySystemHandles, SE_DEBUG_NAME, ServiceLookup, ServiceNames,
    SystemHandleTable, ZombieError, ZombieHandles, ZombieRecord, with_privilege,
};

/// Options for [`ZombieOwners::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Minimum time since exit for a process to be reported.
    ///
    /// Zero disables the filter.
    pub min_age: Duration,

    /// Directory to write raw diagnostic dumps to.
    pub diagnostics: Option<PathBuf>,
}

impl UpdateOptions {
    /// Default minimum time since exit.
    pub const DEFAULT_MIN_AGE: Duration = Duration::from_secs(3);
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            min_age: Self::DEFAULT_MIN_AGE,
            diagnostics: None,
        }
    }
}

/// A handle to a zombie, held by an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldZombie {
    /// The handle value within the owning process.
    pub handle: HandleValue,

    /// The zombie the handle refers to.
    pub zombie: ZombieRecord,
}

/// A running process holding handles to zombies.
#[derive(Debug, Clone, Serialize)]
pub struct OwnerRecord<'s> {
    /// The process ID.
    pub process_id: ProcessId,

    /// The executable image path. Empty if it could not be resolved.
    pub image_path: String,

    /// The executable file name. Empty if the path could not be resolved.
    pub exe_name: String,

    /// Services hosted by the process.
    pub services: Option<&'s [ServiceNames]>,

    /// Handles to zombies, in systemwide table order.
    pub handles: SmallVec<[HeldZombie; 2]>,
}

impl<'s> OwnerRecord<'s> {
    fn resolve<Driver>(
        driver: &Driver,
        process_id: ProcessId,
        services: &'s ServiceLookup<'_>,
    ) -> Self
    where
        Driver: EnumerateProcesses + ?Sized,
    {
        let image_path =
            match driver.open_process(process_id, ProcessAccess::QUERY_LIMITED_INFORMATION) {
                Ok(handle) => {
                    let process = OwnedHandle::new(driver, handle);
                    driver
                        .process_image_path(process.as_raw())
                        .unwrap_or_default()
                }
                Err(err) => {
                    tracing::debug!(%err, pid = %process_id, "cannot open owner");
                    String::new()
                }
            };

        Self {
            process_id,
            exe_name: file_name(&image_path).to_owned(),
            image_path,
            services: services.services(process_id),
            handles: SmallVec::new(),
        }
    }

    /// Orders owners by handle count descending, then by executable name
    /// ignoring case, then by process ID.
    pub fn report_order(&self, other: &Self) -> Ordering {
        other
            .handles
            .len()
            .cmp(&self.handles.len())
            .then_with(|| {
                let lhs = self.exe_name.chars().flat_map(char::to_lowercase);
                let rhs = other.exe_name.chars().flat_map(char::to_lowercase);
                lhs.cmp(rhs)
            })
            .then_with(|| self.process_id.cmp(&other.process_id))
    }
}

/// Returns the final component of a Windows path.
fn file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// The running processes keeping zombies alive.
///
/// Each [`update`] replaces the previous result. A failed update leaves the
/// result empty.
///
/// [`update`]: Self::update
#[derive(Debug, Default)]
pub struct ZombieOwners<'s> {
    /// Owners by process ID, in discovery order.
    owners: IndexMap<ProcessId, OwnerRecord<'s>>,

    /// Indices into `owners`, in report order.
    sorted: Vec<usize>,

    /// Zombies no handle could be found for.
    unexplained: Vec<ZombieRecord>,

    /// Non-fatal process enumeration errors.
    process_enum_errors: Vec<String>,

    /// Diagnostic dump failures.
    diagnostic_errors: Vec<String>,

    /// Number of processes inspected.
    total_processes: usize,

    /// Number of zombie processes.
    zombie_processes: usize,

    /// Number of handles opened to zombie processes and threads.
    zombie_handles: usize,
}

impl<'s> ZombieOwners<'s> {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds every zombie and the processes holding handles to it.
    ///
    /// Runs with `SeDebugPrivilege` enabled on the calling thread. Fails
    /// without enumerating anything if the privilege cannot be enabled.
    ///
    /// # Implementation Details
    ///
    /// 1. Opens fresh handles to every zombie process and resident thread.
    /// 2. Captures the systemwide handle table.
    /// 3. Maps the kernel object behind each freshly opened handle to its
    ///    zombie, using the entries of the calling process.
    /// 4. Attributes every other handle to one of those objects to its
    ///    owning process. Handles opened in step 1 are skipped, but other
    ///    handles of the calling process are kept.
    /// 5. Reports the zombies no handle was attributed to as unexplained.
    ///
    /// The handles opened in step 1 are closed before returning.
    pub fn update<Driver>(
        &mut self,
        driver: &Driver,
        services: &'s ServiceLookup<'_>,
        options: &UpdateOptions,
    ) -> Result<(), ZombieError>
    where
        Driver: QuerySystemHandles + EnumerateProcesses + ElevatePrivilege + ?Sized,
    {
        *self = Self::default();

        let result = with_privilege(driver, SE_DEBUG_NAME, || {
            Self::correlate(driver, services, options)
        })?;

        *self = result;
        Ok(())
    }

    fn correlate<Driver>(
        driver: &Driver,
        services: &'s ServiceLookup<'_>,
        options: &UpdateOptions,
    ) -> Result<Self, ZombieError>
    where
        Driver: QuerySystemHandles + EnumerateProcesses + ?Sized,
    {
        let zombies = ZombieHandles::acquire(driver, options.min_age);
        let table = SystemHandleTable::capture(driver)?;
        let this_process = driver.current_process_id();

        let mut by_object = HashMap::<ObjectKey, &ZombieRecord>::new();
        for entry in table.iter() {
            if entry.process_id != this_process {
                continue;
            }

            if let Some(zombie) = zombies.get(entry.handle) {
                by_object.insert(entry.object, zombie);
            }
        }

        let mut pending = zombies
            .zombies()
            .iter()
            .map(|(&process_id, zombie)| (process_id, zombie))
            .collect::<IndexMap<_, _>>();

        let mut owners = IndexMap::<ProcessId, OwnerRecord<'s>>::new();
        for entry in table.iter() {
            let zombie = match by_object.get(&entry.object) {
                Some(zombie) => *zombie,
                None => continue,
            };

            // Our own handles from the acquisition pass.
            if entry.process_id == this_process && zombies.contains(entry.handle) {
                continue;
            }

            owners
                .entry(entry.process_id)
                .or_insert_with(|| OwnerRecord::resolve(driver, entry.process_id, services))
                .handles
                .push(HeldZombie {
                    handle: entry.handle,
                    zombie: zombie.clone(),
                });

            pending.shift_remove(&zombie.process_id);
        }

        let unexplained = pending.into_values().cloned().collect::<Vec<_>>();
        for zombie in &unexplained {
            tracing::debug!(pid = %zombie.process_id, image = %zombie.image_path, "no handle found");
        }

        let mut sorted = (0..owners.len()).collect::<Vec<_>>();
        sorted.sort_by(|&lhs, &rhs| owners[lhs].report_order(&owners[rhs]));

        let diagnostic_errors = match &options.diagnostics {
            Some(directory) => DiagnosticFiles::new(directory, driver.system_time())
                .write(this_process, &zombies, &table, services),
            None => Vec::new(),
        };

        Ok(Self {
            owners,
            sorted,
            unexplained,
            process_enum_errors: zombies.errors().to_vec(),
            diagnostic_errors,
            total_processes: zombies.total_processes(),
            zombie_processes: zombies.zombie_processes(),
            zombie_handles: zombies.len(),
        })
    }

    /// Returns the owners by process ID, in discovery order.
    pub fn owners(&self) -> &IndexMap<ProcessId, OwnerRecord<'s>> {
        &self.owners
    }

    /// Returns the owners by handle count descending, then by executable
    /// name, then by process ID.
    pub fn owners_sorted(&self) -> impl Iterator<Item = &OwnerRecord<'s>> {
        self.sorted.iter().filter_map(|&index| {
            self.owners
                .get_index(index)
                .map(|(_, owner)| owner)
        })
    }

    /// Returns the zombies no handle could be found for.
    pub fn unexplained(&self) -> &[ZombieRecord] {
        &self.unexplained
    }

    /// Returns the non-fatal process enumeration errors.
    pub fn process_enum_errors(&self) -> &[String] {
        &self.process_enum_errors
    }

    /// Returns the diagnostic dump failures.
    pub fn diagnostic_errors(&self) -> &[String] {
        &self.diagnostic_errors
    }

    /// Returns the number of processes inspected.
    pub fn total_processes(&self) -> usize {
        self.total_processes
    }

    /// Returns the number of zombie processes.
    pub fn zombie_processes(&self) -> usize {
        self.zombie_processes
    }

    /// Returns the number of handles opened to zombie processes and threads.
    pub fn zombie_handles(&self) -> usize {
        self.zombie_handles
    }

    /// Returns the number of handles attributed to owners.
    pub fn attributed_handles(&self) -> usize {
        self.owners
            .values()
            .map(|owner| owner.handles.len())
            .sum()
    }
}

#[cfg(test)]
#[path = "owners_tests.rs"]
mod tests;
