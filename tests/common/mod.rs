#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tent_thermostat::config::{ControllerConfig, OutdoorConfig, RelayLayout};
use tent_thermostat::counters::{CounterStore, StoreError};
use tent_thermostat::fault::FaultCounters;
use tent_thermostat::heater::HardwareError;
use tent_thermostat::sensors::{Co2Sensor, SensorError, SensorId, SensorReading, SensorSet};
use tent_thermostat::{ControlLoop, Hardware, RelayDriver, Rebooter};

/// Per-device answer: `Some(t)` reads `t`, `None` does not respond.
#[derive(Debug, Default)]
pub struct MockBus {
    pub temperatures: Vec<Option<f64>>,
    pub bus_down: bool,
    pub detect_calls: usize,
}

pub struct MockSensorSet {
    bus: Arc<Mutex<MockBus>>,
    detected: usize,
}

impl MockSensorSet {
    pub fn new(temperatures: Vec<Option<f64>>) -> (Self, Arc<Mutex<MockBus>>) {
        let bus = Arc::new(Mutex::new(MockBus {
            temperatures,
            ..MockBus::default()
        }));
        (
            Self {
                bus: Arc::clone(&bus),
                detected: 0,
            },
            bus,
        )
    }
}

impl SensorSet for MockSensorSet {
    fn family(&self) -> &'static str {
        "mock"
    }

    fn detect(&mut self) -> Result<usize, SensorError> {
        let mut bus = self.bus.lock().unwrap();
        bus.detect_calls += 1;
        if bus.bus_down {
            self.detected = 0;
            return Err(SensorError::BusUnavailable {
                family: "mock",
                reason: "bus down".into(),
            });
        }
        self.detected = bus.temperatures.len();
        Ok(self.detected)
    }

    fn read_all(&mut self) -> Result<Vec<SensorReading>, SensorError> {
        let bus = self.bus.lock().unwrap();
        Ok(bus
            .temperatures
            .iter()
            .take(self.detected)
            .enumerate()
            .map(|(i, t)| {
                let id = SensorId(format!("mock-{}", i));
                match t {
                    Some(t) => SensorReading::valid(id, *t),
                    None => SensorReading::invalid(id, None),
                }
            })
            .collect())
    }

    fn detected(&self) -> usize {
        self.detected
    }
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub counters: FaultCounters,
    pub saves: usize,
    pub fail_saves: bool,
}

#[derive(Clone, Default)]
pub struct RecordingCounterStore(pub Arc<Mutex<StoreState>>);

impl RecordingCounterStore {
    pub fn with_counters(io_errors: u32, reboots: u32) -> Self {
        let store = Self::default();
        store.0.lock().unwrap().counters = FaultCounters { io_errors, reboots };
        store
    }

    pub fn counters(&self) -> FaultCounters {
        self.0.lock().unwrap().counters
    }
}

impl CounterStore for RecordingCounterStore {
    fn load(&self) -> Result<FaultCounters, StoreError> {
        Ok(self.0.lock().unwrap().counters)
    }

    fn save(&mut self, counters: &FaultCounters) -> Result<(), StoreError> {
        let mut state = self.0.lock().unwrap();
        if state.fail_saves {
            return Err(StoreError::Io {
                path: "memory".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        state.counters = *counters;
        state.saves += 1;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingRelays(pub Arc<Mutex<Vec<bool>>>);

impl RecordingRelays {
    pub fn last(&self) -> Option<bool> {
        self.0.lock().unwrap().last().copied()
    }

    pub fn writes(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl RelayDriver for RecordingRelays {
    fn set_heating(&mut self, on: bool) -> Result<(), HardwareError> {
        self.0.lock().unwrap().push(on);
        Ok(())
    }

    fn is_heating(&self) -> bool {
        self.last().unwrap_or(false)
    }
}

#[derive(Clone, Default)]
pub struct RecordingRebooter(pub Arc<Mutex<usize>>);

impl RecordingRebooter {
    pub fn requests(&self) -> usize {
        *self.0.lock().unwrap()
    }
}

impl Rebooter for RecordingRebooter {
    fn request_reboot(&mut self) -> std::io::Result<()> {
        *self.0.lock().unwrap() += 1;
        Ok(())
    }
}

/// `None` makes every read time out.
#[derive(Clone, Default)]
pub struct MockCo2(pub Arc<Mutex<Option<u16>>>);

impl Co2Sensor for MockCo2 {
    fn read_ppm(&mut self) -> Result<u16, SensorError> {
        self.0.lock().unwrap().ok_or(SensorError::Timeout("mock co2"))
    }

    fn calibrate_zero(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}

/// Config with every output path inside `dir` and a fixed outdoor reference.
pub fn test_config(dir: &TempDir, outdoor: Option<f64>) -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.tent_id = "07".into();
    config.relays.layout = RelayLayout::Single { signal_pin: 17 };
    config.outdoor = outdoor.map(|value| OutdoorConfig::Fixed { value });
    config.paths.state_dir = dir.path().to_path_buf();
    config.paths.sensor_log = dir.path().join("sensors.csv");
    config.paths.summary_log = Some(dir.path().join("07.txt"));
    config.paths.reference_file = Some(dir.path().join("outdoor"));
    config.paths.status_file = Some(dir.path().join("status.json"));
    config.paths.connection_log = dir.path().join("connection.csv");
    config
}

pub struct Harness {
    pub control: ControlLoop,
    pub bus: Arc<Mutex<MockBus>>,
    pub store: RecordingCounterStore,
    pub relays: RecordingRelays,
    pub rebooter: RecordingRebooter,
    pub co2: MockCo2,
}

pub fn harness(config: ControllerConfig, temperatures: Vec<Option<f64>>, store: RecordingCounterStore) -> Harness {
    let (set, bus) = MockSensorSet::new(temperatures);
    let relays = RecordingRelays::default();
    let rebooter = RecordingRebooter::default();
    let co2 = MockCo2::default();
    let hardware = Hardware {
        sensors: vec![Box::new(set)],
        co2: config.co2.as_ref().map(|_| Box::new(co2.clone()) as Box<dyn Co2Sensor>),
        relays: Box::new(relays.clone()),
        counter_store: Box::new(store.clone()),
        rebooter: Box::new(rebooter.clone()),
    };
    let control = ControlLoop::new(config, hardware).unwrap();
    Harness {
        control,
        bus,
        store,
        relays,
        rebooter,
        co2,
    }
}
