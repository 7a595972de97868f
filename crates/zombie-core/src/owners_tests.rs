use std::time::Duration;

use super::{UpdateOptions, ZombieOwners};
use crate::{
    HandleValue, NtStatus, ProcessId, ServiceLookup, ThreadId, ZombieError,
    mock::{MockDriver, MockObject, MockProcess, MockServices},
};

///////////////////////////////////////////////////////////////////////////////
// Test Helpers
///////////////////////////////////////////////////////////////////////////////

const NOW: u64 = 50_000;
const THIS_PID: u32 = 100;

fn zombie_process(pid: u32) -> MockObject {
    MockObject::Process(ProcessId(pid))
}

fn zombie_thread(pid: u32, tid: u32) -> MockObject {
    MockObject::Thread(ProcessId(pid), ThreadId(tid))
}

/// One zombie with a resident thread, held through both objects by one
/// service host.
fn single_holder() -> MockDriver {
    MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::running(600, "C:\\Windows\\System32\\svchost.exe"))
        .with_process(
            MockProcess::exited(1200, "C:\\Tools\\worker.exe", NOW - 60).with_thread(1204, true),
        )
        .hold(600, 0x44, zombie_process(1200))
        .hold(600, 0x48, zombie_thread(1200, 1204))
}

fn options() -> UpdateOptions {
    UpdateOptions {
        min_age: Duration::from_secs(3),
        diagnostics: None,
    }
}

///////////////////////////////////////////////////////////////////////////////
// Correlation
///////////////////////////////////////////////////////////////////////////////

#[test]
fn process_and_thread_handles_share_one_owner() -> Result<(), ZombieError> {
    let driver = single_holder();
    let source = MockServices::default().with_service(600, "Schedule", "Task Scheduler");
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    assert_eq!(owners.owners().len(), 1);
    assert!(owners.unexplained().is_empty());
    assert_eq!(owners.zombie_processes(), 1);
    assert_eq!(owners.zombie_handles(), 2);

    let owner = &owners.owners()[&ProcessId(600)];
    assert_eq!(owner.exe_name, "svchost.exe");
    assert_eq!(owner.image_path, "C:\\Windows\\System32\\svchost.exe");
    assert_eq!(owner.handles.len(), 2);
    assert_eq!(owner.handles[0].handle, HandleValue(0x44));
    assert!(!owner.handles[0].zombie.is_thread());
    assert_eq!(owner.handles[1].handle, HandleValue(0x48));
    assert_eq!(owner.handles[1].zombie.thread_id, ThreadId(1204));

    let hosted = owner.services.unwrap_or_default();
    assert_eq!(hosted.len(), 1);
    assert_eq!(hosted[0].name, "Schedule");

    Ok(())
}

#[test]
fn zombie_without_any_handle_is_unexplained() -> Result<(), ZombieError> {
    let mut driver = single_holder()
        .with_process(MockProcess::exited(1300, "C:\\Tools\\orphan.exe", NOW - 60));
    driver.hidden_objects.push(zombie_process(1300));

    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    assert_eq!(owners.unexplained().len(), 1);
    assert_eq!(owners.unexplained()[0].process_id, ProcessId(1300));
    assert!(owners.owners().values().all(|owner| {
        owner
            .handles
            .iter()
            .all(|held| held.zombie.process_id != ProcessId(1300))
    }));

    Ok(())
}

#[test]
fn only_own_acquired_handles_are_skipped() -> Result<(), ZombieError> {
    // The calling process also holds an older handle to the zombie.
    let driver = MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::running(THIS_PID, "C:\\Tools\\zombie-finder.exe"))
        .with_process(MockProcess::exited(1200, "C:\\Tools\\worker.exe", NOW - 60))
        .hold(THIS_PID, 0x9000, zombie_process(1200));

    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    assert_eq!(owners.owners().len(), 1);
    let owner = &owners.owners()[&ProcessId(THIS_PID)];
    assert_eq!(owner.handles.len(), 1);
    assert_eq!(owner.handles[0].handle, HandleValue(0x9000));
    assert!(owners.unexplained().is_empty());

    Ok(())
}

#[test]
fn held_only_by_ourselves_is_unexplained() -> Result<(), ZombieError> {
    let driver = MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::exited(1200, "C:\\Tools\\worker.exe", NOW - 60));

    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    assert!(owners.owners().is_empty());
    assert_eq!(owners.unexplained().len(), 1);

    Ok(())
}

#[test]
fn attributed_and_unexplained_account_for_every_zombie() -> Result<(), ZombieError> {
    let mut driver = MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::running(600, "C:\\a.exe"))
        .with_process(MockProcess::running(700, "C:\\b.exe"))
        .with_process(MockProcess::exited(1200, "C:\\z1.exe", NOW - 60))
        .with_process(MockProcess::exited(1300, "C:\\z2.exe", NOW - 60))
        .with_process(MockProcess::exited(1400, "C:\\z3.exe", NOW - 60))
        .with_process(MockProcess::exited(1500, "C:\\z4.exe", NOW - 60))
        .hold(600, 0x10, zombie_process(1200))
        .hold(600, 0x14, zombie_process(1300))
        .hold(700, 0x10, zombie_process(1400));
    driver.hidden_objects.push(zombie_process(1500));

    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    assert_eq!(owners.zombie_processes(), 4);
    assert_eq!(owners.attributed_handles(), 3);
    assert_eq!(
        owners.attributed_handles() + owners.unexplained().len(),
        owners.zombie_processes()
    );

    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Ordering
///////////////////////////////////////////////////////////////////////////////

#[test]
fn owners_sorted_by_count_then_name_then_pid() -> Result<(), ZombieError> {
    let mut driver = MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::running(700, "C:\\Apps\\beta.exe"))
        .with_process(MockProcess::running(800, "C:\\Apps\\Alpha.exe"))
        .with_process(MockProcess::running(900, "C:\\Apps\\gamma.exe"))
        .with_process(MockProcess::exited(1200, "C:\\Tools\\worker.exe", NOW - 60));

    for (owner, count) in [(700, 5), (800, 5), (900, 2)] {
        for index in 0..count {
            driver = driver.hold(owner, 0x100 + 4 * index, zombie_process(1200));
        }
    }

    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    let order = owners
        .owners_sorted()
        .map(|owner| (owner.exe_name.as_str(), owner.handles.len()))
        .collect::<Vec<_>>();

    assert_eq!(order, [("Alpha.exe", 5), ("beta.exe", 5), ("gamma.exe", 2)]);

    // Discovery order is kept separately.
    let discovered = owners.owners().keys().copied().collect::<Vec<_>>();
    assert_eq!(discovered, [ProcessId(700), ProcessId(800), ProcessId(900)]);

    Ok(())
}

#[test]
fn equal_names_fall_back_to_pid() -> Result<(), ZombieError> {
    let driver = MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::running(900, "C:\\Apps\\host.exe"))
        .with_process(MockProcess::running(700, "C:\\Apps\\HOST.exe"))
        .with_process(MockProcess::exited(1200, "C:\\Tools\\worker.exe", NOW - 60))
        .hold(900, 0x10, zombie_process(1200))
        .hold(700, 0x10, zombie_process(1200));

    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    let order = owners
        .owners_sorted()
        .map(|owner| owner.process_id)
        .collect::<Vec<_>>();
    assert_eq!(order, [ProcessId(700), ProcessId(900)]);

    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Failures
///////////////////////////////////////////////////////////////////////////////

#[test]
fn privilege_failure_enumerates_nothing() -> Result<(), ZombieError> {
    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    // A successful update first, so there is something to discard.
    let mut owners = ZombieOwners::new();
    owners.update(&single_holder(), &services, &options())?;
    assert_eq!(owners.owners().len(), 1);

    let mut driver = single_holder();
    driver.security.available.clear();

    let result = owners.update(&driver, &services, &options());

    assert!(matches!(result, Err(ZombieError::Privilege { .. })));
    assert!(!driver.calls().contains(&"next_process"));
    assert!(!driver.calls().contains(&"query_system_handles"));
    assert!(!driver.security.impersonating.get());
    assert!(driver.security.enabled.borrow().is_empty());
    assert!(owners.owners().is_empty());
    assert_eq!(owners.zombie_processes(), 0);

    Ok(())
}

#[test]
fn snapshot_failure_aborts_and_releases_handles() {
    let mut driver = single_holder();
    driver.snapshot_failure = Some(NtStatus::ACCESS_DENIED);

    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    let result = owners.update(&driver, &services, &options());

    assert!(matches!(result, Err(ZombieError::SnapshotQuery { .. })));
    assert!(owners.owners().is_empty());
    assert_eq!(driver.open_handle_count(), 0);
    assert!(!driver.security.impersonating.get());
}

#[test]
fn enumeration_error_is_reported_alongside_results() -> Result<(), ZombieError> {
    let mut driver = single_holder().with_process(MockProcess::running(4000, "C:\\late.exe"));
    driver.enumeration_failure = Some((2, NtStatus::ACCESS_DENIED));

    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    assert_eq!(owners.owners().len(), 1);
    assert_eq!(owners.process_enum_errors().len(), 1);
    assert!(owners.process_enum_errors()[0].starts_with("Process enumeration failed"));

    Ok(())
}

#[test]
fn update_closes_every_handle_it_opened() -> Result<(), ZombieError> {
    let driver = single_holder();
    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(&driver, &services, &options())?;

    let mut opened = driver.opened_handles();
    let mut closed = driver.closed_handles();
    opened.sort();
    closed.sort();

    assert!(!opened.is_empty());
    assert_eq!(opened, closed);
    assert_eq!(driver.open_handle_count(), 0);

    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Diagnostics
///////////////////////////////////////////////////////////////////////////////

#[test]
fn diagnostics_write_three_dumps() -> Result<(), ZombieError> {
    let directory = std::env::temp_dir().join(format!("zombie-core-diag-{}", std::process::id()));
    std::fs::create_dir_all(&directory)?;

    let driver = single_holder();
    let source = MockServices::default().with_service(600, "Schedule", "Task Scheduler");
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(
        &driver,
        &services,
        &UpdateOptions {
            diagnostics: Some(directory.clone()),
            ..options()
        },
    )?;

    assert!(owners.diagnostic_errors().is_empty());

    let mut names = std::fs::read_dir(&directory)?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();

    assert_eq!(names.len(), 3);
    assert!(names[0].ends_with("_AllHandles.txt"));
    assert!(names[1].ends_with("_Services.txt"));
    assert!(names[2].ends_with("_ZombieHandles.txt"));

    std::fs::remove_dir_all(&directory)?;
    Ok(())
}

#[test]
fn diagnostics_failure_does_not_fail_update() -> Result<(), ZombieError> {
    let directory = std::env::temp_dir()
        .join(format!("zombie-core-missing-{}", std::process::id()))
        .join("nested");

    let driver = single_holder();
    let source = MockServices::default();
    let services = ServiceLookup::new(&source);

    let mut owners = ZombieOwners::new();
    owners.update(
        &driver,
        &services,
        &UpdateOptions {
            diagnostics: Some(directory),
            ..options()
        },
    )?;

    assert_eq!(owners.owners().len(), 1);
    assert_eq!(owners.diagnostic_errors().len(), 3);

    Ok(())
}
