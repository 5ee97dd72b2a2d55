use crate::config::{ControllerConfig, RelayLayout};
use crate::counters::{CounterStore, FileCounterStore};
use crate::fault::{Escalation, FaultCounters, FaultEscalationPolicy, FaultLevel, FaultTracker};
use crate::heater::{build_relays, HardwareError, HeaterDecision, HeaterState, RelayCommand, RelayDriver};
use crate::outdoor::OutdoorSource;
use crate::reboot::{Rebooter, SystemReboot};
use crate::records::{self, LogRecord, RecordError, SensorLog, StatusSnapshot};
use crate::sensors::{self, Co2Sensor, MhZ19, SensorReading, SensorSet, MAX_SENSORS};
use crate::transfer::SummaryTransfer;
use chrono::{DateTime, Local};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("relay output failed: {0}")]
    Relay(#[from] HardwareError),
    #[error("log setup failed: {0}")]
    Record(#[from] RecordError),
}

/// Everything one cycle learned. Built fresh each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub indoor_avg: Option<f64>,
    pub outdoor: Option<f64>,
    pub readings: Vec<SensorReading, MAX_SENSORS>,
    pub co2_ppm: Option<u16>,
    pub heater_state: HeaterState,
    pub escalation: Escalation,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleResult),
    /// Reboot requested; this process must not run another cycle.
    Rebooting(FaultCounters),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    RebootRequested,
    CycleLimit,
}

/// The hardware-facing collaborators of a [`ControlLoop`].
pub struct Hardware {
    pub sensors: std::vec::Vec<Box<dyn SensorSet>>,
    pub co2: Option<Box<dyn Co2Sensor>>,
    pub relays: Box<dyn RelayDriver>,
    pub counter_store: Box<dyn CounterStore>,
    pub rebooter: Box<dyn Rebooter>,
}

impl Hardware {
    /// Real devices as described by `config`. Claims the relay GPIO lines.
    pub fn from_config(config: &ControllerConfig) -> Result<Self, HardwareError> {
        let co2 = config.co2.as_ref().map(|co2| -> Box<dyn Co2Sensor> {
            Box::new(MhZ19::open(co2.device.clone(), Duration::from_millis(co2.timeout_ms)))
        });
        Ok(Self {
            sensors: sensors::build_sensor_sets(&config.sensors),
            co2,
            relays: build_relays(&config.relays.layout)?,
            counter_store: Box::new(FileCounterStore::new(config.paths.state_dir.clone())),
            rebooter: Box::new(SystemReboot::default()),
        })
    }
}

/// Mean of the valid readings rounded to 0.001 °C; `None` without any.
pub fn average_valid(readings: &[SensorReading]) -> Option<f64> {
    let (sum, count) = readings
        .iter()
        .filter_map(SensorReading::value)
        .fold((0.0, 0u32), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(round_millis(sum / f64::from(count)))
    }
}

pub fn round_millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Single-tent thermostat: detect, read, escalate, decide, log, sleep.
pub struct ControlLoop {
    config: ControllerConfig,
    sensors: std::vec::Vec<Box<dyn SensorSet>>,
    co2: Option<Box<dyn Co2Sensor>>,
    outdoor: Option<OutdoorSource>,
    relays: Box<dyn RelayDriver>,
    decision: HeaterDecision,
    faults: FaultTracker,
    rebooter: Box<dyn Rebooter>,
    sensor_log: SensorLog,
    transfer: Option<SummaryTransfer>,

    cycle_count: u64,
    since_summary: Duration,
    last_result: Option<CycleResult>,
}

impl ControlLoop {
    pub fn new(config: ControllerConfig, hardware: Hardware) -> Result<Self, ControlError> {
        let sensor_log = SensorLog::open(config.paths.sensor_log.clone(), config.co2.is_some())?;
        let policy = FaultEscalationPolicy::from(config.fault);
        let decision = HeaterDecision::for_layout(config.temperature_diff, &config.relays.layout);
        let outdoor = config.outdoor.as_ref().map(OutdoorSource::from);
        let transfer = config.transfer.as_ref().map(SummaryTransfer::from);

        let mut control = Self {
            sensors: hardware.sensors,
            co2: hardware.co2,
            outdoor,
            relays: hardware.relays,
            decision,
            faults: FaultTracker::new(policy, hardware.counter_store),
            rebooter: hardware.rebooter,
            sensor_log,
            transfer,
            cycle_count: 0,
            since_summary: Duration::ZERO,
            last_result: None,
            config,
        };

        if control.config.co2.as_ref().is_some_and(|co2| co2.calibrate_on_start) {
            if let Some(co2) = control.co2.as_mut() {
                if let Err(e) = co2.calibrate_zero() {
                    warn!("CO2 zero point calibration failed: {}", e);
                }
            }
        }

        Ok(control)
    }

    pub fn from_config(config: ControllerConfig) -> Result<Self, ControlError> {
        let hardware = Hardware::from_config(&config)?;
        Self::new(config, hardware)
    }

    /// Runs cycles until a reboot is requested or `max_cycles` have run.
    pub async fn run(&mut self, max_cycles: Option<u64>) -> Result<ExitReason, ControlError> {
        info!("SYSTEM ONLINE (tent {})", self.config.tent_id);
        for set in &self.sensors {
            info!("Configured {} sensors", set.family());
        }
        if let RelayLayout::None = self.config.relays.layout {
            info!("No relay board configured; heater decisions are logged only");
        }

        let mut interval = time::interval(self.config.check_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if max_cycles.is_some_and(|max| self.cycle_count >= max) {
                return Ok(ExitReason::CycleLimit);
            }
            interval.tick().await;

            match self.run_cycle().await? {
                CycleOutcome::Completed(_) => {}
                CycleOutcome::Rebooting(_) => return Ok(ExitReason::RebootRequested),
            }
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, ControlError> {
        let now = Local::now();

        let (readings, bus_faults) = self.read_sensors();
        let co2_ppm = self.read_co2();

        let failed_reads = readings.iter().filter(|r| !r.valid).count();
        let no_valid = readings.iter().all(|r| !r.valid);
        let cycle_failed = failed_reads > 0 || bus_faults > 0 || no_valid;
        if no_valid {
            error!("No valid indoor readings this cycle ({} sensors, {} bus faults)", readings.len(), bus_faults);
        }

        let escalation = self.faults.on_cycle(cycle_failed, now.timestamp());
        if let Escalation::Reboot { counters } = escalation {
            self.shutdown_for_reboot();
            return Ok(CycleOutcome::Rebooting(counters));
        }

        let indoor_avg = average_valid(&readings);
        match indoor_avg {
            Some(indoor) => info!("Detected indoor temp of {:.2}", indoor),
            None => warn!("Indoor temperature undefined"),
        }

        let outdoor = self.fetch_outdoor().await;

        let heater_state = if indoor_avg.is_none() && outdoor.is_none() {
            error!("Indoor and outdoor temperatures both undefined; forcing sensor fault");
            HeaterState::SensorFault
        } else {
            self.decision.decide_optional(indoor_avg, outdoor)
        };
        self.apply_relays(heater_state)?;

        let sentinel = self.config.sentinel;
        info!(
            "{:.2} inside, {:.2} outside, heater {}",
            indoor_avg.unwrap_or(sentinel),
            outdoor.unwrap_or(sentinel),
            heater_state
        );

        let record = LogRecord::new(now, &readings, co2_ppm, indoor_avg, outdoor, heater_state, sentinel);
        if let Err(e) = self.sensor_log.append(&record) {
            error!("Could not append sensor log: {}", e);
        }

        let result = CycleResult {
            indoor_avg,
            outdoor,
            readings,
            co2_ppm,
            heater_state,
            escalation,
        };

        self.write_status(&record, &result);
        self.since_summary += self.config.check_interval();
        if self.since_summary >= self.config.log_interval() {
            self.since_summary = Duration::ZERO;
            self.write_summary(now, &record, indoor_avg).await;
        }

        self.cycle_count += 1;
        self.last_result = Some(result.clone());
        Ok(CycleOutcome::Completed(result))
    }

    fn read_sensors(&mut self) -> (Vec<SensorReading, MAX_SENSORS>, usize) {
        let mut readings: Vec<SensorReading, MAX_SENSORS> = Vec::new();
        let mut bus_faults = 0;

        for set in &mut self.sensors {
            match set.detect() {
                Ok(count) => debug!("{} {} sensors present", count, set.family()),
                Err(e) => {
                    warn!("Error detecting {} sensors: {}", set.family(), e);
                    bus_faults += 1;
                    continue;
                }
            }

            match set.read_all() {
                Ok(batch) => {
                    for reading in batch {
                        if readings.push(reading).is_err() {
                            warn!("More than {} sensors attached; extra readings dropped", MAX_SENSORS);
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!("Error reading {} sensors: {}", set.family(), e);
                    bus_faults += 1;
                }
            }
        }

        (readings, bus_faults)
    }

    fn read_co2(&mut self) -> Option<u16> {
        let co2 = self.co2.as_mut()?;
        match co2.read_ppm() {
            Ok(ppm) => {
                debug!("CO2 reading {} ppm", ppm);
                Some(ppm)
            }
            Err(e) => {
                info!("Unable to read CO2 data: {}", e);
                None
            }
        }
    }

    async fn fetch_outdoor(&self) -> Option<f64> {
        let source = self.outdoor.as_ref()?;
        match source.fetch().await {
            Ok(value) => {
                let value = round_millis(value);
                info!("Retrieved outdoor temperature: {:.2}", value);
                Some(value)
            }
            Err(e) => {
                warn!("Outdoor reference unavailable: {}", e);
                None
            }
        }
    }

    fn apply_relays(&mut self, state: HeaterState) -> Result<(), ControlError> {
        match RelayCommand::for_state(state, self.config.relays.on_sensor_fault) {
            RelayCommand::Energize => self.relays.set_heating(true)?,
            RelayCommand::DeEnergize => self.relays.set_heating(false)?,
            RelayCommand::Hold => debug!("Holding relays {}", if self.relays.is_heating() { "on" } else { "off" }),
        }
        Ok(())
    }

    fn write_status(&self, record: &LogRecord, result: &CycleResult) {
        let Some(path) = self.config.paths.status_file.as_ref() else {
            return;
        };
        let snapshot = StatusSnapshot {
            tent_id: self.config.tent_id.clone(),
            record: record.clone(),
            sensors_detected: self.sensors.iter().map(|s| s.detected()).sum(),
            indoor_avg: result.indoor_avg,
            outdoor: result.outdoor,
            counters: self.faults.get_counters(),
            fault_level: self.faults.get_level(),
            history: self.faults.get_history().to_vec(),
        };
        if let Err(e) = snapshot.write(path) {
            warn!("Could not write status file: {}", e);
        }
    }

    async fn write_summary(&self, now: DateTime<Local>, record: &LogRecord, indoor_avg: Option<f64>) {
        let summary_path = self.config.summary_log_path();
        info!("Recording temperature data to tent file {}", summary_path.display());
        if let Err(e) = records::append_line(&summary_path, &record.summary_row()) {
            error!("Could not append summary log: {}", e);
        }

        if let Some(reference) = self.config.paths.reference_file.as_ref() {
            match indoor_avg {
                Some(indoor) => {
                    if let Err(e) = records::write_reference(reference, indoor) {
                        error!("Could not write reference file: {}", e);
                    }
                }
                None => info!("Cannot read sensors; reference file left unchanged"),
            }
        }

        if let Some(transfer) = self.transfer.as_ref() {
            let code = match transfer.send(&summary_path).await {
                Ok(0) => 0,
                Ok(code) => {
                    warn!("Transfer to {} exited with {}", transfer.get_destination(), code);
                    code
                }
                Err(e) => {
                    warn!("Transfer to {} failed: {}", transfer.get_destination(), e);
                    -1
                }
            };
            let row = records::connection_row(now, code);
            if let Err(e) = records::append_line(&self.config.paths.connection_log, &row) {
                warn!("Could not append connection log: {}", e);
            }
        }
    }

    fn shutdown_for_reboot(&mut self) {
        if let Err(e) = self.relays.set_heating(false) {
            error!("Could not release relays before reboot: {}", e);
        }
        if let Err(e) = self.sensor_log.close() {
            error!("Could not close sensor log before reboot: {}", e);
        }
        error!("Rebooting host");
        if let Err(e) = self.rebooter.request_reboot() {
            error!("Reboot request failed: {}", e);
        }
    }

    pub fn get_config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn get_last_result(&self) -> Option<&CycleResult> {
        self.last_result.as_ref()
    }

    pub fn get_counters(&self) -> FaultCounters {
        self.faults.get_counters()
    }

    pub fn get_fault_level(&self) -> FaultLevel {
        self.faults.get_level()
    }

    pub fn get_cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn is_heating(&self) -> bool {
        self.relays.is_heating()
    }
}
