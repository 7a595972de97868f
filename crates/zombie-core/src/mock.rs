//! In-memory driver for exercising the engine without a live system.

use std::cell::{Cell, RefCell};

use indexmap::IndexMap;
use zerocopy::IntoBytes;

use crate::{
    ElevatePrivilege, EnumerateProcesses, FileTime, HandleValue, NtStatus, ObjectKey,
    ProcessAccess, ProcessBasicInfo, ProcessFlags, ProcessId, ProcessTimes, QuerySystemHandles,
    ServiceEntry, ServiceSource, SystemHandle, SystemHandleTable, SystemHandleTableEntry,
    SystemHandleTableHeader, ThreadAccess, ThreadId, Win32Error, ZombieDriver, ZombieError,
};

/// Object type index reported for process handles.
pub const PROCESS_TYPE_INDEX: u16 = 7;

/// Object type index reported for thread handles.
pub const THREAD_TYPE_INDEX: u16 = 8;

/// A simulated thread.
#[derive(Debug, Clone)]
pub struct MockThread {
    /// Thread ID.
    pub thread_id: ThreadId,

    /// Whether the thread has exited.
    pub exited: bool,
}

/// A simulated process.
#[derive(Debug, Clone)]
pub struct MockProcess {
    /// Process ID.
    pub process_id: ProcessId,

    /// Parent process ID.
    pub parent_process_id: ProcessId,

    /// Image path in NT device form.
    pub image_file_name: String,

    /// Image path in Win32 form.
    pub image_path: String,

    /// Creation time.
    pub creation: FileTime,

    /// Exit time. Zero while running.
    pub exit: FileTime,

    /// Whether the deletion flag is reported.
    pub deleting: bool,

    /// Resident threads.
    pub threads: Vec<MockThread>,

    /// Reported handle count.
    pub handle_count: u32,

    /// Whether the process can be opened by ID.
    pub openable: bool,

    /// Status returned by the basic information query, if it should fail.
    pub basic_info_failure: Option<NtStatus>,
}

impl MockProcess {
    /// Creates a running process.
    pub fn running(process_id: u32, image_path: &str) -> Self {
        let name = image_path.rsplit('\\').next().unwrap_or(image_path);

        Self {
            process_id: ProcessId(process_id),
            parent_process_id: ProcessId(0),
            image_file_name: format!("\\Device\\HarddiskVolume3\\Windows\\{name}"),
            image_path: image_path.to_owned(),
            creation: FileTime::from_unix_seconds(1_000),
            exit: FileTime::default(),
            deleting: false,
            threads: vec![MockThread {
                thread_id: ThreadId(process_id + 1),
                exited: false,
            }],
            handle_count: 42,
            openable: true,
            basic_info_failure: None,
        }
    }

    /// Creates a process that exited at `exit_unix_seconds`.
    pub fn exited(process_id: u32, image_path: &str, exit_unix_seconds: u64) -> Self {
        Self {
            exit: FileTime::from_unix_seconds(exit_unix_seconds),
            deleting: true,
            threads: Vec::new(),
            handle_count: 0,
            ..Self::running(process_id, image_path)
        }
    }

    /// Sets the parent process ID.
    pub fn with_parent(mut self, parent: u32) -> Self {
        self.parent_process_id = ProcessId(parent);
        self
    }

    /// Sets the creation time.
    pub fn with_creation(mut self, unix_seconds: u64) -> Self {
        self.creation = FileTime::from_unix_seconds(unix_seconds);
        self
    }

    /// Adds a resident thread.
    pub fn with_thread(mut self, thread_id: u32, exited: bool) -> Self {
        self.threads.push(MockThread {
            thread_id: ThreadId(thread_id),
            exited,
        });
        self
    }

    fn has_exited(&self) -> bool {
        !self.exit.is_zero()
    }
}

/// The object a simulated handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockObject {
    /// A process object.
    Process(ProcessId),

    /// A thread object.
    Thread(ProcessId, ThreadId),
}

#[derive(Debug, Clone, Copy)]
struct MockHandle {
    object: MockObject,
    query_information: bool,
}

/// A simulated security context for the calling thread.
#[derive(Debug, Default)]
pub struct MockSecurity {
    /// Whether the thread currently impersonates.
    pub impersonating: Cell<bool>,

    /// Privileges enabled in the thread token.
    pub enabled: RefCell<Vec<String>>,

    /// Privileges that can be enabled.
    pub available: Vec<String>,

    /// Whether impersonation fails.
    pub deny_impersonation: bool,
}

/// An in-memory driver.
///
/// Hands out sequential handle values for the calling process, records
/// every close, and synthesizes the systemwide handle table from the open
/// handles plus handles registered with [`hold`].
///
/// [`hold`]: Self::hold
#[derive(Debug)]
pub struct MockDriver {
    /// The ID of the calling process.
    pub current_process_id: ProcessId,

    /// The current system time.
    pub now: FileTime,

    /// Simulated processes, in enumeration order.
    pub processes: Vec<MockProcess>,

    /// Handles held by other processes.
    pub foreign_handles: Vec<(ProcessId, HandleValue, MockObject)>,

    /// Objects omitted from the systemwide table.
    pub hidden_objects: Vec<MockObject>,

    /// Status returned by the next-process primitive after this many
    /// processes, instead of `STATUS_NO_MORE_ENTRIES`.
    pub enumeration_failure: Option<(usize, NtStatus)>,

    /// Status returned by the systemwide handle query, if it should fail.
    pub snapshot_failure: Option<NtStatus>,

    /// Entries that appear between consecutive systemwide queries.
    pub snapshot_growth: usize,

    /// Size reported by the systemwide handle query in place of the size
    /// the entries need. Buffers smaller than this are rejected.
    pub snapshot_required: Option<usize>,

    /// Threads whose ID query fails.
    pub thread_id_failures: Vec<ThreadId>,

    /// Security context of the calling thread.
    pub security: MockSecurity,

    open: RefCell<IndexMap<HandleValue, MockHandle>>,
    next_handle: Cell<u64>,
    opened: RefCell<Vec<HandleValue>>,
    closed: RefCell<Vec<HandleValue>>,
    calls: RefCell<Vec<&'static str>>,
    snapshot_queries: RefCell<Vec<usize>>,
}

impl MockDriver {
    /// Creates a driver for the calling process `current_process_id`.
    pub fn new(current_process_id: u32, now_unix_seconds: u64) -> Self {
        Self {
            current_process_id: ProcessId(current_process_id),
            now: FileTime::from_unix_seconds(now_unix_seconds),
            processes: Vec::new(),
            foreign_handles: Vec::new(),
            hidden_objects: Vec::new(),
            enumeration_failure: None,
            snapshot_failure: None,
            snapshot_growth: 0,
            snapshot_required: None,
            thread_id_failures: Vec::new(),
            security: MockSecurity {
                available: vec![String::from("SeDebugPrivilege")],
                ..MockSecurity::default()
            },
            open: RefCell::new(IndexMap::new()),
            next_handle: Cell::new(0x100),
            opened: RefCell::new(Vec::new()),
            closed: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            snapshot_queries: RefCell::new(Vec::new()),
        }
    }

    /// Adds a process.
    pub fn with_process(mut self, process: MockProcess) -> Self {
        self.processes.push(process);
        self
    }

    /// Registers a handle held by another process.
    pub fn hold(mut self, owner: u32, handle: u64, object: MockObject) -> Self {
        self.foreign_handles
            .push((ProcessId(owner), HandleValue(handle), object));
        self
    }

    /// Returns the kernel address of a simulated object.
    pub fn object_key(object: MockObject) -> ObjectKey {
        match object {
            MockObject::Process(pid) => ObjectKey(0xffff_a000_0000_0000 | u64::from(pid.0) << 8),
            MockObject::Thread(_, tid) => ObjectKey(0xffff_b000_0000_0000 | u64::from(tid.0) << 8),
        }
    }

    /// Returns every handle value handed out so far.
    pub fn opened_handles(&self) -> Vec<HandleValue> {
        self.opened.borrow().clone()
    }

    /// Returns every handle value closed so far, in order.
    pub fn closed_handles(&self) -> Vec<HandleValue> {
        self.closed.borrow().clone()
    }

    /// Returns the number of handles currently open.
    pub fn open_handle_count(&self) -> usize {
        self.open.borrow().len()
    }

    /// Returns the names of the driver methods called so far.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    /// Returns the buffer sizes passed to the systemwide handle query.
    pub fn snapshot_queries(&self) -> Vec<usize> {
        self.snapshot_queries.borrow().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.borrow_mut().push(call);
    }

    fn allocate(&self, object: MockObject, query_information: bool) -> HandleValue {
        let handle = HandleValue(self.next_handle.get());
        self.next_handle.set(handle.0 + 4);

        self.open.borrow_mut().insert(
            handle,
            MockHandle {
                object,
                query_information,
            },
        );
        self.opened.borrow_mut().push(handle);
        handle
    }

    fn object_of(&self, handle: HandleValue) -> Option<MockHandle> {
        self.open.borrow().get(&handle).copied()
    }

    fn process(&self, process_id: ProcessId) -> Option<&MockProcess> {
        self.processes
            .iter()
            .find(|process| process.process_id == process_id)
    }

    fn process_of(&self, handle: HandleValue) -> Option<&MockProcess> {
        match self.object_of(handle)?.object {
            MockObject::Process(pid) => self.process(pid),
            MockObject::Thread(..) => None,
        }
    }

    fn system_handles(&self) -> Vec<SystemHandle> {
        let current = self
            .open
            .borrow()
            .iter()
            .map(|(&handle, entry)| (self.current_process_id, handle, entry.object))
            .collect::<Vec<_>>();

        current
            .into_iter()
            .chain(self.foreign_handles.iter().copied())
            .filter(|(_, _, object)| !self.hidden_objects.contains(object))
            .map(|(process_id, handle, object)| SystemHandle {
                process_id,
                handle,
                object: Self::object_key(object),
                object_type_index: match object {
                    MockObject::Process(_) => PROCESS_TYPE_INDEX,
                    MockObject::Thread(..) => THREAD_TYPE_INDEX,
                },
                granted_access: 0x1000,
                creator_back_trace_index: 0,
                attributes: 0,
            })
            .collect()
    }
}

impl ZombieDriver for MockDriver {
    fn current_process_id(&self) -> ProcessId {
        self.current_process_id
    }

    fn system_time(&self) -> FileTime {
        self.now
    }

    fn close_handle(&self, handle: HandleValue) -> Result<(), ZombieError> {
        self.closed.borrow_mut().push(handle);

        match self.open.borrow_mut().shift_remove(&handle) {
            Some(_) => Ok(()),
            None => Err(ZombieError::win32("CloseHandle", 6u32)),
        }
    }
}

impl QuerySystemHandles for MockDriver {
    fn query_system_handles(&self, buffer: &mut [u8]) -> (NtStatus, usize) {
        self.record("query_system_handles");

        let queries = {
            let mut queries = self.snapshot_queries.borrow_mut();
            queries.push(buffer.len());
            queries.len()
        };

        if let Some(status) = self.snapshot_failure {
            return (status, 0);
        }

        let mut entries = self.system_handles();
        for index in 0..self.snapshot_growth * queries {
            entries.push(SystemHandle {
                process_id: ProcessId(4),
                handle: HandleValue(0x10_0000 + 4 * index as u64),
                object: ObjectKey(0xffff_c000_0000_0000 | (index as u64) << 8),
                object_type_index: 37,
                granted_access: 0,
                creator_back_trace_index: 0,
                attributes: 0,
            });
        }

        let required =
            SystemHandleTable::HEADER_SIZE + entries.len() * SystemHandleTable::ENTRY_SIZE;
        let required = self.snapshot_required.unwrap_or(required).max(required);
        if buffer.len() < required {
            return (NtStatus::INFO_LENGTH_MISMATCH, required);
        }

        let header = SystemHandleTableHeader {
            number_of_handles: entries.len() as u64,
            reserved: 0,
        };

        let (head, mut rest) = buffer.split_at_mut(SystemHandleTable::HEADER_SIZE);
        head.copy_from_slice(header.as_bytes());

        for entry in entries {
            let (slot, tail) = rest.split_at_mut(SystemHandleTable::ENTRY_SIZE);
            slot.copy_from_slice(SystemHandleTableEntry::from(entry).as_bytes());
            rest = tail;
        }

        (NtStatus::SUCCESS, required)
    }
}

impl EnumerateProcesses for MockDriver {
    fn next_process(
        &self,
        previous: Option<HandleValue>,
        access: ProcessAccess,
    ) -> Result<HandleValue, NtStatus> {
        self.record("next_process");

        let index = match previous {
            Some(previous) => {
                let pid = match self.object_of(previous).map(|entry| entry.object) {
                    Some(MockObject::Process(pid)) => pid,
                    _ => return Err(NtStatus::INVALID_PARAMETER),
                };

                self.processes
                    .iter()
                    .position(|process| process.process_id == pid)
                    .map_or(self.processes.len(), |index| index + 1)
            }
            None => 0,
        };

        if let Some((limit, status)) = self.enumeration_failure {
            if index >= limit {
                return Err(status);
            }
        }

        match self.processes.get(index) {
            Some(process) => Ok(self.allocate(
                MockObject::Process(process.process_id),
                access.contains(ProcessAccess::QUERY_INFORMATION),
            )),
            None => Err(NtStatus::NO_MORE_ENTRIES),
        }
    }

    fn next_thread(
        &self,
        process: HandleValue,
        previous: Option<HandleValue>,
        _access: ThreadAccess,
    ) -> Result<HandleValue, NtStatus> {
        self.record("next_thread");

        let entry = self.object_of(process).ok_or(NtStatus::INVALID_PARAMETER)?;
        if !entry.query_information {
            return Err(NtStatus::ACCESS_DENIED);
        }

        let process = self
            .process_of(process)
            .ok_or(NtStatus::INVALID_PARAMETER)?;

        let index = match previous {
            Some(previous) => {
                let tid = match self.object_of(previous).map(|entry| entry.object) {
                    Some(MockObject::Thread(_, tid)) => tid,
                    _ => return Err(NtStatus::INVALID_PARAMETER),
                };

                process
                    .threads
                    .iter()
                    .position(|thread| thread.thread_id == tid)
                    .map_or(process.threads.len(), |index| index + 1)
            }
            None => 0,
        };

        match process.threads.get(index) {
            Some(thread) => Ok(self.allocate(
                MockObject::Thread(process.process_id, thread.thread_id),
                false,
            )),
            None => Err(NtStatus::NO_MORE_ENTRIES),
        }
    }

    fn process_basic_info(&self, process: HandleValue) -> Result<ProcessBasicInfo, NtStatus> {
        self.record("process_basic_info");

        let process = self
            .process_of(process)
            .ok_or(NtStatus::INVALID_PARAMETER)?;

        if let Some(status) = process.basic_info_failure {
            return Err(status);
        }

        let mut flags = ProcessFlags::empty();
        if process.deleting {
            flags |= ProcessFlags::IS_PROCESS_DELETING;
        }

        Ok(ProcessBasicInfo {
            process_id: process.process_id,
            parent_process_id: process.parent_process_id,
            flags,
        })
    }

    fn process_times(&self, process: HandleValue) -> Result<ProcessTimes, ZombieError> {
        self.record("process_times");

        let process = self
            .process_of(process)
            .ok_or(ZombieError::win32("GetProcessTimes", Win32Error::INVALID_PARAMETER))?;

        Ok(ProcessTimes {
            creation: process.creation,
            exit: process.exit,
            ..ProcessTimes::default()
        })
    }

    fn process_image_file_name(&self, process: HandleValue) -> Result<String, NtStatus> {
        self.record("process_image_file_name");

        self.process_of(process)
            .map(|process| process.image_file_name.clone())
            .ok_or(NtStatus::INVALID_PARAMETER)
    }

    fn open_process(
        &self,
        process_id: ProcessId,
        access: ProcessAccess,
    ) -> Result<HandleValue, ZombieError> {
        self.record("open_process");

        match self.process(process_id) {
            Some(process) if process.openable => Ok(self.allocate(
                MockObject::Process(process_id),
                access.contains(ProcessAccess::QUERY_INFORMATION),
            )),
            Some(_) => Err(ZombieError::win32("OpenProcess", Win32Error::ACCESS_DENIED)),
            None => Err(ZombieError::win32("OpenProcess", Win32Error::INVALID_PARAMETER)),
        }
    }

    fn process_image_path(&self, process: HandleValue) -> Result<String, ZombieError> {
        self.record("process_image_path");

        match self.process_of(process) {
            Some(process) if !process.has_exited() => Ok(process.image_path.clone()),
            _ => Err(ZombieError::win32(
                "QueryFullProcessImageNameW",
                Win32Error::INVALID_PARAMETER,
            )),
        }
    }

    fn thread_id(&self, thread: HandleValue) -> Result<ThreadId, ZombieError> {
        match self.object_of(thread).map(|entry| entry.object) {
            Some(MockObject::Thread(_, tid)) if !self.thread_id_failures.contains(&tid) => Ok(tid),
            _ => Err(ZombieError::win32("GetThreadId", Win32Error::INVALID_PARAMETER)),
        }
    }

    fn has_exited(&self, handle: HandleValue) -> Result<bool, ZombieError> {
        let invalid = || ZombieError::win32("WaitForSingleObject", Win32Error::INVALID_PARAMETER);

        match self.object_of(handle).map(|entry| entry.object) {
            Some(MockObject::Process(pid)) => {
                self.process(pid).map(MockProcess::has_exited).ok_or_else(invalid)
            }
            Some(MockObject::Thread(pid, tid)) => self
                .process(pid)
                .and_then(|process| process.threads.iter().find(|t| t.thread_id == tid))
                .map(|thread| thread.exited)
                .ok_or_else(invalid),
            None => Err(invalid()),
        }
    }

    fn handle_count(&self, process: HandleValue) -> Result<u32, ZombieError> {
        self.process_of(process)
            .map(|process| process.handle_count)
            .ok_or(ZombieError::win32(
                "GetProcessHandleCount",
                Win32Error::INVALID_PARAMETER,
            ))
    }
}

impl ElevatePrivilege for MockDriver {
    fn impersonate_self(&self) -> Result<(), ZombieError> {
        self.record("impersonate_self");

        if self.security.deny_impersonation {
            return Err(ZombieError::win32("ImpersonateSelf", Win32Error::ACCESS_DENIED));
        }

        self.security.impersonating.set(true);
        Ok(())
    }

    fn enable_privilege(&self, name: &str) -> Result<(), ZombieError> {
        self.record("enable_privilege");

        if !self.security.impersonating.get() {
            return Err(ZombieError::win32(
                "OpenThreadToken",
                Win32Error::INVALID_PARAMETER,
            ));
        }

        if !self.security.available.iter().any(|available| available == name) {
            return Err(ZombieError::win32(
                "AdjustTokenPrivileges",
                Win32Error::NOT_ALL_ASSIGNED,
            ));
        }

        self.security.enabled.borrow_mut().push(name.to_owned());
        Ok(())
    }

    fn revert_to_self(&self) -> Result<(), ZombieError> {
        self.record("revert_to_self");

        self.security.impersonating.set(false);
        self.security.enabled.borrow_mut().clear();
        Ok(())
    }
}

/// An in-memory service source.
#[derive(Debug, Default)]
pub struct MockServices {
    /// Reported services.
    pub entries: Vec<ServiceEntry>,

    /// Whether enumeration fails.
    pub fail: bool,

    /// Number of enumerations performed.
    pub queries: Cell<usize>,
}

impl MockServices {
    /// Adds a service hosted by `process_id`.
    pub fn with_service(mut self, process_id: u32, name: &str, display_name: &str) -> Self {
        self.entries.push(ServiceEntry {
            process_id: ProcessId(process_id),
            name: name.to_owned(),
            display_name: display_name.to_owned(),
        });
        self
    }
}

impl ServiceSource for MockServices {
    fn active_services(&self) -> Result<Vec<ServiceEntry>, ZombieError> {
        self.queries.set(self.queries.get() + 1);

        if self.fail {
            return Err(ZombieError::win32("EnumServicesStatusExW", Win32Error::ACCESS_DENIED));
        }

        Ok(self.entries.clone())
    }
}
