use std::{collections::BTreeMap, io::Write};

use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::{ProcessId, ServiceSource};

/// Key and display name of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNames {
    /// The service key name.
    pub name: String,

    /// The service display name.
    pub display_name: String,
}

/// Services hosted by each process.
pub type ServicesByProcess = BTreeMap<ProcessId, Vec<ServiceNames>>;

/// Lookup of the services hosted by a process.
///
/// The table is built from the source on first use and kept until
/// [`invalidate`] is called.
///
/// [`invalidate`]: Self::invalidate
pub struct ServiceLookup<'a> {
    source: &'a dyn ServiceSource,
    table: OnceCell<ServicesByProcess>,
}

impl<'a> ServiceLookup<'a> {
    /// Creates a new lookup over `source`.
    pub fn new(source: &'a dyn ServiceSource) -> Self {
        Self {
            source,
            table: OnceCell::new(),
        }
    }

    /// Returns the services hosted by a process, if any.
    pub fn services(&self, process_id: ProcessId) -> Option<&[ServiceNames]> {
        self.table().get(&process_id).map(Vec::as_slice)
    }

    /// Returns the whole table.
    ///
    /// # Notes
    ///
    /// If the source fails, the table is empty.
    pub fn table(&self) -> &ServicesByProcess {
        self.table.get_or_init(|| {
            let entries = match self.source.active_services() {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::debug!(%err, "service enumeration failed");
                    return ServicesByProcess::new();
                }
            };

            let mut table = ServicesByProcess::new();
            for entry in entries {
                table.entry(entry.process_id).or_default().push(ServiceNames {
                    name: entry.name,
                    display_name: entry.display_name,
                });
            }

            table
        })
    }

    /// Discards the table. The next lookup enumerates services again.
    pub fn invalidate(&mut self) {
        self.table.take();
    }

    /// Writes the table as text, one block per process.
    pub fn write_report(&self, mut writer: impl Write) -> Result<(), std::io::Error> {
        let table = self.table();

        let width = table
            .values()
            .flatten()
            .map(|service| service.name.chars().count())
            .max()
            .unwrap_or(0)
            + 3;

        for (process_id, services) in table {
            writeln!(writer, "PID: {process_id}")?;
            for service in services {
                writeln!(
                    writer,
                    "             {:<width$}  {}",
                    service.name, service.display_name
                )?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }
}
