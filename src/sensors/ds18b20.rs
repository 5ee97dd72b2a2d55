use super::{SensorError, SensorId, SensorReading, SensorSet};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const FAMILY: &str = "ds18b20";
const SLAVE_FILE: &str = "w1_slave";

/// Power-on reset value of the scratchpad; a DS18B20 reporting this or more
/// has lost power mid-conversion or is wired wrong.
pub const FAULT_THRESHOLD_C: f64 = 85.0;

const CRC_RETRY_LIMIT: u32 = 3;
const CRC_RETRY_DELAY: Duration = Duration::from_millis(200);

/// DS18B20 probes exposed by the kernel `w1-therm` driver under
/// `/sys/bus/w1/devices/28-*`.
pub struct Ds18b20Set {
    devices_dir: PathBuf,
    prefix: String,
    devices: Vec<PathBuf>,
    retry_delay: Duration,
}

#[derive(Debug, PartialEq)]
pub enum SlaveRead {
    /// CRC line did not end in `YES`, conversion still in flight.
    NotReady,
    Celsius(f64),
}

impl Ds18b20Set {
    pub fn new(devices_dir: PathBuf, prefix: String) -> Self {
        Self {
            devices_dir,
            prefix,
            devices: Vec::new(),
            retry_delay: CRC_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn sensor_id(device: &std::path::Path) -> SensorId {
        let name = device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        SensorId(name)
    }

    fn read_device(&self, device: &std::path::Path) -> Result<f64, SensorError> {
        let slave = device.join(SLAVE_FILE);
        for attempt in 0..CRC_RETRY_LIMIT {
            let text = std::fs::read_to_string(&slave)?;
            match parse_w1_slave(&text) {
                Some(SlaveRead::Celsius(celsius)) => return Ok(celsius),
                Some(SlaveRead::NotReady) => {
                    debug!("{} CRC not ready (attempt {})", slave.display(), attempt + 1);
                    thread::sleep(self.retry_delay);
                }
                None => {
                    return Err(SensorError::Device {
                        id: Self::sensor_id(device),
                        reason: "malformed w1_slave contents".into(),
                    });
                }
            }
        }
        Err(SensorError::Timeout(FAMILY))
    }
}

/// Parse the two-line `w1_slave` format:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(text: &str) -> Option<SlaveRead> {
    let mut lines = text.lines();
    let crc_line = lines.next()?;
    if !crc_line.trim_end().ends_with("YES") {
        return Some(SlaveRead::NotReady);
    }
    let data_line = lines.next()?;
    let millis = data_line.split("t=").nth(1)?.trim().parse::<i32>().ok()?;
    Some(SlaveRead::Celsius(f64::from(millis) / 1000.0))
}

impl SensorSet for Ds18b20Set {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn detect(&mut self) -> Result<usize, SensorError> {
        let entries = match std::fs::read_dir(&self.devices_dir) {
            Ok(entries) => entries,
            Err(e) => {
                self.devices.clear();
                return Err(SensorError::BusUnavailable {
                    family: FAMILY,
                    reason: format!("{}: {}", self.devices_dir.display(), e),
                });
            }
        };

        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&self.prefix))
            .map(|entry| entry.path())
            .collect();
        found.sort();

        if found != self.devices {
            info!("Detected {} {} sensors", found.len(), FAMILY);
        }
        self.devices = found;
        Ok(self.devices.len())
    }

    fn read_all(&mut self) -> Result<Vec<SensorReading>, SensorError> {
        let mut readings = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            let id = Self::sensor_id(device);
            match self.read_device(device) {
                Ok(celsius) if celsius >= FAULT_THRESHOLD_C => {
                    info!("{} reported {:.3}, treating as disconnected", id, celsius);
                    readings.push(SensorReading::invalid(id, Some(celsius)));
                }
                Ok(celsius) => readings.push(SensorReading::valid(id, celsius)),
                Err(e) => {
                    info!("Error reading {}: {}", id, e);
                    readings.push(SensorReading::invalid(id, None));
                }
            }
        }
        Ok(readings)
    }

    fn detected(&self) -> usize {
        self.devices.len()
    }
}
