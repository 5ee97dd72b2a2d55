use std::fs;
use tempfile::TempDir;
use tent_thermostat::counters::*;
use tent_thermostat::fault::{FaultCounters, FaultEscalationPolicy, FaultTracker};
use tent_thermostat::records::{LogRecord, RecordError, SensorLog};
use tent_thermostat::sensors::{SensorId, SensorReading};
use tent_thermostat::HeaterState;

#[test]
fn test_missing_counter_file_reads_as_zero() {
    let dir = TempDir::new().unwrap();
    let store = FileCounterStore::new(dir.path());
    assert_eq!(store.load().unwrap(), FaultCounters::default());
}

#[test]
fn test_counters_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let mut store = FileCounterStore::new(dir.path());
    store.save(&FaultCounters { io_errors: 2, reboots: 4 }).unwrap();

    let reopened = FileCounterStore::new(dir.path());
    assert_eq!(reopened.load().unwrap(), FaultCounters { io_errors: 2, reboots: 4 });
    assert_eq!(fs::read_to_string(reopened.path()).unwrap(), "io_errors=2\nreboots=4\n");
}

#[test]
fn test_corrupt_counter_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let store = FileCounterStore::new(dir.path());
    fs::write(store.path(), "io_errors=two\n").unwrap();

    match store.load() {
        Err(StoreError::Corrupt { .. }) => {}
        other => panic!("expected corrupt error, got {:?}", other),
    }
}

#[test]
fn test_unwritable_store_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut store = FileCounterStore::new(dir.path().join("missing"));
    assert!(store.save(&FaultCounters::default()).is_err());
}

#[test]
fn test_reboot_count_persists_across_restarts() {
    let dir = TempDir::new().unwrap();
    let policy = FaultEscalationPolicy::new(3, 5);

    // Each tracker stands in for one boot of the host
    for boot in 1..=5 {
        let mut tracker = FaultTracker::new(policy, Box::new(FileCounterStore::new(dir.path())));
        assert!(!tracker.on_cycle(true, 0).requests_reboot());
        assert!(!tracker.on_cycle(true, 1).requests_reboot());
        assert!(tracker.on_cycle(true, 2).requests_reboot());
        assert_eq!(tracker.get_counters().reboots, boot);
    }

    let mut tracker = FaultTracker::new(policy, Box::new(FileCounterStore::new(dir.path())));
    for _ in 0..10 {
        assert!(!tracker.on_cycle(true, 3).requests_reboot());
    }
    assert_eq!(
        FileCounterStore::new(dir.path()).load().unwrap(),
        FaultCounters { io_errors: 10, reboots: 5 }
    );

    tracker.on_cycle(false, 4);
    assert_eq!(FileCounterStore::new(dir.path()).load().unwrap(), FaultCounters::default());
}

#[test]
fn test_memory_store_clones_share_counters() {
    let store = MemoryCounterStore::new(FaultCounters { io_errors: 1, reboots: 2 });
    let mut tracker = FaultTracker::new(FaultEscalationPolicy::new(3, 5), Box::new(store.clone()));

    tracker.on_cycle(true, 0);
    assert_eq!(store.get_counters(), FaultCounters { io_errors: 2, reboots: 2 });

    let mut handle = store.clone();
    handle.reset().unwrap();
    assert_eq!(store.load().unwrap(), FaultCounters::default());
}

#[test]
fn test_closed_sensor_log_rejects_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sensors.csv");
    let mut log = SensorLog::open(&path, false).unwrap();

    let readings = [SensorReading::valid(SensorId("28-0000".into()), 19.5)];
    let record = LogRecord::new(chrono::Local::now(), &readings, None, Some(19.5), Some(12.0), HeaterState::Off, 90.0);
    log.append(&record).unwrap();
    log.close().unwrap();
    log.close().unwrap();

    assert!(matches!(log.append(&record), Err(RecordError::Closed(_))));
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("\nTimestamp,Sensor#1,Heater\n"));
    assert!(text.ends_with(",19.5,OFF\n"));
}
