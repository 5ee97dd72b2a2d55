pub mod bus;
pub mod co2;
pub mod ds18b20;
pub mod mcp9808;

pub use bus::{I2cBus, LinuxI2c};
pub use co2::{Co2Sensor, MhZ19, SerialLink, UartLink};
pub use ds18b20::Ds18b20Set;
pub use mcp9808::Mcp9808Set;

use crate::config::SensorFamilyConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on readings carried through a single cycle.
pub const MAX_SENSORS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorId(pub String);

impl core::fmt::Display for SensorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    /// Raw value when the device answered, even if it was rejected.
    pub temperature_celsius: Option<f64>,
    pub valid: bool,
}

impl SensorReading {
    pub fn valid(sensor_id: SensorId, temperature_celsius: f64) -> Self {
        Self {
            sensor_id,
            temperature_celsius: Some(temperature_celsius),
            valid: true,
        }
    }

    pub fn invalid(sensor_id: SensorId, raw: Option<f64>) -> Self {
        Self {
            sensor_id,
            temperature_celsius: raw,
            valid: false,
        }
    }

    /// Temperature usable for aggregation.
    pub fn value(&self) -> Option<f64> {
        if self.valid {
            self.temperature_celsius
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{family} bus unavailable: {reason}")]
    BusUnavailable { family: &'static str, reason: String },
    #[error("device {id} failed: {reason}")]
    Device { id: SensorId, reason: String },
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("bad checksum in {0} frame")]
    Checksum(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One family of temperature sensors sharing a bus.
///
/// `detect` re-enumerates the bus and is safe to call every cycle. A device
/// that does not answer is left out of the count. `read_all` attempts every
/// detected device and reports failures as invalid readings; both only
/// return `Err` when the bus itself cannot be reached.
pub trait SensorSet {
    fn family(&self) -> &'static str;
    fn detect(&mut self) -> Result<usize, SensorError>;
    fn read_all(&mut self) -> Result<Vec<SensorReading>, SensorError>;
    fn detected(&self) -> usize;
}

pub fn build_sensor_sets(families: &[SensorFamilyConfig]) -> Vec<Box<dyn SensorSet>> {
    families
        .iter()
        .map(|family| -> Box<dyn SensorSet> {
            match family {
                SensorFamilyConfig::Mcp9808 { bus, reserved, first, last } => Box::new(
                    Mcp9808Set::new(LinuxI2c::new(*bus), reserved.clone(), *first..=*last),
                ),
                SensorFamilyConfig::Ds18b20 { devices_dir, family_prefix } => {
                    Box::new(Ds18b20Set::new(devices_dir.clone(), family_prefix.clone()))
                }
            }
        })
        .collect()
}
