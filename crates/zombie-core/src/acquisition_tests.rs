use std::time::Duration;

use super::ZombieHandles;
use crate::{
    NtStatus, ProcessId, ThreadId,
    mock::{MockDriver, MockProcess},
};

///////////////////////////////////////////////////////////////////////////////
// Test Helpers
///////////////////////////////////////////////////////////////////////////////

const NOW: u64 = 50_000;
const THIS_PID: u32 = 100;

fn system() -> MockDriver {
    MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::running(4, "System"))
        .with_process(MockProcess::running(600, "C:\\Windows\\explorer.exe").with_creation(500))
        .with_process(
            MockProcess::exited(1200, "C:\\Tools\\old.exe", NOW - 60)
                .with_parent(600)
                .with_creation(900)
                .with_thread(1204, true),
        )
        .with_process(MockProcess::exited(1300, "C:\\Tools\\fresh.exe", NOW - 1))
}

///////////////////////////////////////////////////////////////////////////////
// Classification
///////////////////////////////////////////////////////////////////////////////

#[test]
fn retains_process_and_thread_handles() {
    let driver = system();
    let zombies = ZombieHandles::acquire(&driver, Duration::from_secs(3));

    assert_eq!(zombies.total_processes(), 4);
    assert_eq!(zombies.zombie_processes(), 1);
    assert_eq!(zombies.len(), 2);
    assert!(zombies.errors().is_empty());

    let records = zombies.iter().map(|(_, record)| record).collect::<Vec<_>>();

    let thread = records
        .iter()
        .find(|record| record.is_thread())
        .expect("thread record");
    assert_eq!(thread.thread_id, ThreadId(1204));
    assert_eq!(thread.process_id, ProcessId(1200));
    assert_eq!(thread.thread_count, 0);

    let process = &zombies.zombies()[&ProcessId(1200)];
    assert_eq!(process.thread_count, 1);
    assert!(process.image_path.ends_with("old.exe"));
    assert_eq!(process.parent_process_id, ProcessId(600));
    assert_eq!(process.parent_image_path, "C:\\Windows\\explorer.exe");
}

#[test]
fn min_age_filters_recent_exits() {
    let driver = system();

    let filtered = ZombieHandles::acquire(&driver, Duration::from_secs(3));
    assert!(!filtered.zombies().contains_key(&ProcessId(1300)));
    drop(filtered);

    let unfiltered = ZombieHandles::acquire(&driver, Duration::ZERO);
    assert!(unfiltered.zombies().contains_key(&ProcessId(1300)));
    assert_eq!(unfiltered.zombie_processes(), 2);

    for record in unfiltered.zombies().values() {
        assert!(record.exit.seconds_until(driver.now) >= 1);
    }
}

#[test]
fn exit_in_the_future_is_filtered() {
    let driver = MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::exited(1400, "C:\\skew.exe", NOW + 10));

    let zombies = ZombieHandles::acquire(&driver, Duration::from_secs(1));
    assert_eq!(zombies.zombie_processes(), 0);

    let zombies = ZombieHandles::acquire(&driver, Duration::ZERO);
    assert_eq!(zombies.zombie_processes(), 1);
}

#[test]
fn deleting_without_exit_time_is_skipped() {
    let mut process = MockProcess::running(1500, "C:\\exiting.exe");
    process.deleting = true;

    let driver = MockDriver::new(THIS_PID, NOW).with_process(process);
    let zombies = ZombieHandles::acquire(&driver, Duration::ZERO);

    assert_eq!(zombies.zombie_processes(), 0);
    assert!(zombies.is_empty());
}

#[test]
fn reused_parent_id_is_treated_as_exited() {
    let driver = MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::running(600, "C:\\new.exe").with_creation(2_000))
        .with_process(
            MockProcess::exited(1200, "C:\\child.exe", NOW - 60)
                .with_parent(600)
                .with_creation(1_500),
        );

    let zombies = ZombieHandles::acquire(&driver, Duration::ZERO);
    let record = &zombies.zombies()[&ProcessId(1200)];

    assert_eq!(record.parent_process_id, ProcessId(600));
    assert!(record.parent_image_path.is_empty());
}

#[test]
fn unopenable_zombie_has_no_thread_data() {
    let mut process = MockProcess::exited(1200, "C:\\locked.exe", NOW - 60).with_thread(1204, true);
    process.openable = false;

    let driver = MockDriver::new(THIS_PID, NOW).with_process(process);
    let zombies = ZombieHandles::acquire(&driver, Duration::ZERO);

    assert_eq!(zombies.len(), 1);
    assert_eq!(zombies.zombies()[&ProcessId(1200)].thread_count, 0);
}

///////////////////////////////////////////////////////////////////////////////
// Errors
///////////////////////////////////////////////////////////////////////////////

#[test]
fn thread_without_id_is_counted_but_not_retained() {
    let mut driver = system();
    driver.thread_id_failures.push(ThreadId(1204));

    let zombies = ZombieHandles::acquire(&driver, Duration::from_secs(3));

    assert_eq!(zombies.len(), 1);
    assert!(zombies.iter().all(|(_, record)| !record.is_thread()));
    assert_eq!(zombies.zombies()[&ProcessId(1200)].thread_count, 1);

    // Only the retained process handle stays open.
    assert_eq!(driver.open_handle_count(), 1);
}

#[test]
fn info_query_failure_is_recorded_and_enumeration_continues() {
    let mut broken = MockProcess::running(700, "C:\\protected.exe");
    broken.basic_info_failure = Some(NtStatus::ACCESS_DENIED);

    let driver = MockDriver::new(THIS_PID, NOW)
        .with_process(broken)
        .with_process(MockProcess::exited(1200, "C:\\old.exe", NOW - 60));

    let zombies = ZombieHandles::acquire(&driver, Duration::ZERO);

    assert_eq!(zombies.zombie_processes(), 1);
    assert_eq!(
        zombies.errors(),
        ["NtQueryInformationProcess failed during enumeration 1: 0xc0000022 (STATUS_ACCESS_DENIED)"]
    );
}

#[test]
fn unexpected_terminal_status_keeps_collected_zombies() {
    let mut driver = system();
    driver.enumeration_failure = Some((3, NtStatus::ACCESS_DENIED));

    let zombies = ZombieHandles::acquire(&driver, Duration::from_secs(3));

    assert_eq!(zombies.total_processes(), 3);
    assert_eq!(zombies.zombie_processes(), 1);
    assert_eq!(
        zombies.errors(),
        ["Process enumeration failed: NtGetNextProcess returned 0xc0000022 (STATUS_ACCESS_DENIED) after 3 iterations"]
    );
}

///////////////////////////////////////////////////////////////////////////////
// Handle Lifecycle
///////////////////////////////////////////////////////////////////////////////

#[test]
fn every_handle_is_closed_exactly_once() {
    let driver = system();

    let zombies = ZombieHandles::acquire(&driver, Duration::from_secs(3));
    let retained = zombies.iter().map(|(handle, _)| handle).collect::<Vec<_>>();

    // Only the retained handles stay open.
    assert_eq!(driver.open_handle_count(), retained.len());
    for handle in &retained {
        assert!(!driver.closed_handles().contains(handle));
    }

    drop(zombies);

    let mut opened = driver.opened_handles();
    let mut closed = driver.closed_handles();
    opened.sort();
    closed.sort();

    assert_eq!(opened, closed);
    assert_eq!(driver.open_handle_count(), 0);
}

#[test]
fn retained_handle_is_not_closed_during_enumeration() {
    // The zombie is not the last process, so its handle is the `previous`
    // argument of the next enumeration step.
    let driver = MockDriver::new(THIS_PID, NOW)
        .with_process(MockProcess::exited(1200, "C:\\old.exe", NOW - 60))
        .with_process(MockProcess::running(600, "C:\\explorer.exe"));

    let zombies = ZombieHandles::acquire(&driver, Duration::ZERO);
    let (handle, record) = zombies.iter().next().expect("retained handle");

    assert_eq!(record.process_id, ProcessId(1200));
    assert!(!driver.closed_handles().contains(&handle));
    assert_eq!(driver.open_handle_count(), 1);
}

#[test]
fn tsv_lists_every_retained_handle() -> Result<(), std::io::Error> {
    let driver = system();
    let zombies = ZombieHandles::acquire(&driver, Duration::from_secs(3));

    let mut output = Vec::new();
    zombies.write_tsv(ProcessId(THIS_PID), &mut output)?;

    let text = String::from_utf8_lossy(&output);
    let lines = text.lines().collect::<Vec<_>>();

    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("ThisPID\tHandleValue\tPID\tTID"));
    assert!(lines[1].starts_with("100\t0x"));
    assert!(lines[1].contains("\t1200\t1204\t0\t"));
    assert!(lines[2].contains("\t1200\t0\t1\t"));

    Ok(())
}
