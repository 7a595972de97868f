use super::SystemHandleTable;
use crate::{
    NtStatus, ProcessId, ZombieError,
    mock::{MockDriver, MockObject, PROCESS_TYPE_INDEX},
};

fn holders() -> MockDriver {
    MockDriver::new(100, 10_000)
        .hold(600, 0x44, MockObject::Process(ProcessId(1200)))
        .hold(700, 0x80, MockObject::Process(ProcessId(1300)))
}

#[test]
fn capture_retries_until_buffer_fits() -> Result<(), ZombieError> {
    let driver = holders();
    let table = SystemHandleTable::capture(&driver)?;

    assert_eq!(table.len(), 2);
    assert!(table.buffer_size() >= table.reported_size());

    let queries = driver.snapshot_queries();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0], SystemHandleTable::HEADER_SIZE);

    // 25% on top of the reported size, rounded up to whole words.
    let reported = SystemHandleTable::HEADER_SIZE + 2 * SystemHandleTable::ENTRY_SIZE;
    assert_eq!(queries[1], (reported + reported / 4).div_ceil(8) * 8);

    Ok(())
}

#[test]
fn capture_survives_growth_between_queries() -> Result<(), ZombieError> {
    let mut driver = holders();
    driver.snapshot_growth = 1;

    let table = SystemHandleTable::capture(&driver)?;

    assert!(table.buffer_size() >= table.reported_size());
    assert_eq!(table.len(), 2 + driver.snapshot_queries().len());

    Ok(())
}

#[test]
fn capture_keeps_retrying_while_growth_outpaces_margin() -> Result<(), ZombieError> {
    let mut driver = holders();
    driver.snapshot_growth = 40;

    let table = SystemHandleTable::capture(&driver)?;
    let queries = driver.snapshot_queries();

    assert!(queries.len() > 2);
    assert!(queries.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(table.buffer_size() >= table.reported_size());

    Ok(())
}

#[test]
fn unexpected_status_aborts() {
    let mut driver = holders();
    driver.snapshot_failure = Some(NtStatus::ACCESS_DENIED);

    match SystemHandleTable::capture(&driver) {
        Err(ZombieError::SnapshotQuery {
            status,
            attempted,
            reported,
        }) => {
            assert_eq!(status, NtStatus::ACCESS_DENIED);
            assert_eq!(attempted, SystemHandleTable::HEADER_SIZE);
            assert_eq!(reported, 0);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(driver.snapshot_queries().len(), 1);
}

#[test]
fn entries_are_typed_and_bounds_checked() -> Result<(), ZombieError> {
    let driver = holders();
    let table = SystemHandleTable::capture(&driver)?;

    let first = table.get(0).expect("first entry");
    assert_eq!(first.process_id, ProcessId(600));
    assert_eq!(first.handle.0, 0x44);
    assert_eq!(first.object_type_index, PROCESS_TYPE_INDEX);
    assert_eq!(
        first.object,
        MockDriver::object_key(MockObject::Process(ProcessId(1200)))
    );

    assert!(table.get(2).is_none());
    assert!(table.get(usize::MAX).is_none());
    assert_eq!(table.iter().count(), 2);

    Ok(())
}

#[test]
fn overflowing_grow_size_aborts() {
    let mut driver = holders();
    driver.snapshot_required = Some(usize::MAX);

    match SystemHandleTable::capture(&driver) {
        Err(ZombieError::SizeOverflow(reported)) => assert_eq!(reported, usize::MAX),
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(driver.snapshot_queries(), [SystemHandleTable::HEADER_SIZE]);
}

#[test]
fn unallocatable_size_aborts() {
    let reported = isize::MAX as usize;

    let mut driver = holders();
    driver.snapshot_required = Some(reported);

    match SystemHandleTable::capture(&driver) {
        Err(ZombieError::Allocation(size)) => assert_eq!(size, reported + reported / 4),
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(driver.snapshot_queries().len(), 1);
}

#[test]
fn header_count_is_clamped_to_buffer() {
    let words =
        (SystemHandleTable::HEADER_SIZE + 2 * SystemHandleTable::ENTRY_SIZE) / size_of::<u64>();
    let mut buffer = vec![0u64; words];

    // The header claims five entries, but only two fit.
    buffer[0] = 5;

    let table = SystemHandleTable::from_buffer(buffer, 0);

    assert_eq!(table.len(), 2);
    assert_eq!(table.iter().count(), 2);
    assert!(table.get(1).is_some());
    assert!(table.get(2).is_none());
}

#[test]
fn tsv_has_one_row_per_entry() -> Result<(), ZombieError> {
    let driver = holders();
    let table = SystemHandleTable::capture(&driver)?;

    let mut output = Vec::new();
    table.write_tsv(&mut output)?;

    let text = String::from_utf8_lossy(&output);
    let object = MockDriver::object_key(MockObject::Process(ProcessId(1300)));

    assert_eq!(
        text.lines().collect::<Vec<_>>(),
        [
            "PID\tHandle\tObjectTypeIndex\tObjectAddr".to_owned(),
            format!(
                "600\t0x00000044\t7\t{}",
                MockDriver::object_key(MockObject::Process(ProcessId(1200)))
            ),
            format!("700\t0x00000080\t7\t{object}"),
        ]
    );

    Ok(())
}
