use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LOG_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_TEMPERATURE_DIFF_C: f64 = 4.0;
pub const DEFAULT_SENTINEL_C: f64 = 90.0;
pub const DEFAULT_ERROR_MAX: u32 = 3;
pub const DEFAULT_REBOOT_MAX: u32 = 5;

const DEFAULT_SIGNAL_PIN: u8 = 17;
const DEFAULT_STAGE_ONE_PIN: u8 = 27;
const DEFAULT_STAGE_TWO_PIN: u8 = 22;

// RTC on the shared I2C bus
const DEFAULT_RESERVED_I2C: [u8; 1] = [0x68];
const I2C_FIRST_ADDRESS: u8 = 0x03;
const I2C_LAST_ADDRESS: u8 = 0x77;

static_assertions::const_assert!(DEFAULT_ERROR_MAX > 0);
static_assertions::const_assert!(DEFAULT_LOG_INTERVAL_SECS >= DEFAULT_CHECK_INTERVAL_SECS);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full description of one tent deployment.
///
/// Per-tent differences such as sensor families, relay wiring, CO2 presence
/// and the outdoor reference source all live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub tent_id: String,
    pub check_interval_secs: u64,
    pub log_interval_secs: u64,
    pub temperature_diff: f64,
    pub sentinel: f64,
    pub fault: FaultConfig,
    pub relays: RelayConfig,
    pub sensors: Vec<SensorFamilyConfig>,
    pub co2: Option<Co2Config>,
    pub outdoor: Option<OutdoorConfig>,
    pub transfer: Option<TransferConfig>,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FaultConfig {
    pub error_max: u32,
    pub reboot_max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub layout: RelayLayout,
    pub on_sensor_fault: FaultOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RelayLayout {
    None,
    Single {
        signal_pin: u8,
    },
    TwoStage {
        signal_pin: u8,
        stage_one_pin: u8,
        stage_two_pin: u8,
    },
}

/// What the relays do on a cycle whose heater state is `SensorFault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultOutput {
    Off,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SensorFamilyConfig {
    Mcp9808 {
        #[serde(default = "default_i2c_bus")]
        bus: u8,
        #[serde(default = "default_reserved")]
        reserved: Vec<u8>,
        #[serde(default = "default_first_address")]
        first: u8,
        #[serde(default = "default_last_address")]
        last: u8,
    },
    Ds18b20 {
        #[serde(default = "default_w1_dir")]
        devices_dir: PathBuf,
        #[serde(default = "default_w1_prefix")]
        family_prefix: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Co2Config {
    pub device: PathBuf,
    pub calibrate_on_start: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum OutdoorConfig {
    Fixed {
        value: f64,
    },
    File {
        path: PathBuf,
    },
    Remote {
        host: String,
        path: String,
        #[serde(default = "default_remote_timeout")]
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    pub destination: String,
    #[serde(default = "default_transfer_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub state_dir: PathBuf,
    pub sensor_log: PathBuf,
    /// Defaults to `<tent_id>.txt` when unset.
    pub summary_log: Option<PathBuf>,
    pub reference_file: Option<PathBuf>,
    pub status_file: Option<PathBuf>,
    pub connection_log: PathBuf,
    pub control_log: Option<PathBuf>,
}

fn default_i2c_bus() -> u8 {
    1
}

fn default_reserved() -> Vec<u8> {
    DEFAULT_RESERVED_I2C.to_vec()
}

fn default_first_address() -> u8 {
    I2C_FIRST_ADDRESS
}

fn default_last_address() -> u8 {
    I2C_LAST_ADDRESS
}

fn default_w1_dir() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}

fn default_w1_prefix() -> String {
    "28-".to_string()
}

fn default_remote_timeout() -> u64 {
    5
}

fn default_transfer_timeout() -> u64 {
    30
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tent_id: "01".to_string(),
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            log_interval_secs: DEFAULT_LOG_INTERVAL_SECS,
            temperature_diff: DEFAULT_TEMPERATURE_DIFF_C,
            sentinel: DEFAULT_SENTINEL_C,
            fault: FaultConfig::default(),
            relays: RelayConfig::default(),
            sensors: vec![SensorFamilyConfig::default()],
            co2: None,
            outdoor: None,
            transfer: None,
            paths: PathsConfig::default(),
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            error_max: DEFAULT_ERROR_MAX,
            reboot_max: DEFAULT_REBOOT_MAX,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            layout: RelayLayout::TwoStage {
                signal_pin: DEFAULT_SIGNAL_PIN,
                stage_one_pin: DEFAULT_STAGE_ONE_PIN,
                stage_two_pin: DEFAULT_STAGE_TWO_PIN,
            },
            on_sensor_fault: FaultOutput::Off,
        }
    }
}

impl Default for SensorFamilyConfig {
    fn default() -> Self {
        SensorFamilyConfig::Mcp9808 {
            bus: default_i2c_bus(),
            reserved: default_reserved(),
            first: I2C_FIRST_ADDRESS,
            last: I2C_LAST_ADDRESS,
        }
    }
}

impl Default for Co2Config {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/serial0"),
            calibrate_on_start: false,
            timeout_ms: 1000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            sensor_log: PathBuf::from("sensors.csv"),
            summary_log: None,
            reference_file: None,
            status_file: None,
            connection_log: PathBuf::from("connection.csv"),
            control_log: None,
        }
    }
}

impl RelayLayout {
    pub fn pins(&self) -> Vec<u8> {
        match *self {
            RelayLayout::None => Vec::new(),
            RelayLayout::Single { signal_pin } => vec![signal_pin],
            RelayLayout::TwoStage { signal_pin, stage_one_pin, stage_two_pin } => {
                vec![signal_pin, stage_one_pin, stage_two_pin]
            }
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Invalid("check_interval_secs must be positive".into()));
        }
        if self.log_interval_secs < self.check_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "log_interval_secs ({}) shorter than check_interval_secs ({})",
                self.log_interval_secs, self.check_interval_secs
            )));
        }
        if self.fault.error_max == 0 {
            return Err(ConfigError::Invalid("fault.error_max must be at least 1".into()));
        }
        if !self.temperature_diff.is_finite() || !self.sentinel.is_finite() {
            return Err(ConfigError::Invalid("temperature_diff and sentinel must be finite".into()));
        }
        if self.sensors.is_empty() {
            return Err(ConfigError::Invalid("at least one sensor family is required".into()));
        }

        let pins = self.relays.layout.pins();
        let distinct: HashSet<u8> = pins.iter().copied().collect();
        if distinct.len() != pins.len() {
            return Err(ConfigError::Invalid(format!("relay pins must be distinct: {:?}", pins)));
        }

        for family in &self.sensors {
            if let SensorFamilyConfig::Mcp9808 { first, last, .. } = family {
                if first > last || *last > I2C_LAST_ADDRESS {
                    return Err(ConfigError::Invalid(format!(
                        "invalid I2C scan range 0x{:02x}..=0x{:02x}",
                        first, last
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs)
    }

    pub fn summary_log_path(&self) -> PathBuf {
        self.paths
            .summary_log
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.txt", self.tent_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ControllerConfig::from_toml("").unwrap();
        assert_eq!(config.tent_id, "01");
        assert_eq!(config.fault.error_max, 3);
        assert_eq!(config.fault.reboot_max, 5);
        assert_eq!(config.relays.layout.pins(), vec![17, 27, 22]);
        assert_eq!(config.summary_log_path(), PathBuf::from("01.txt"));
        assert!(matches!(config.sensors[0], SensorFamilyConfig::Mcp9808 { bus: 1, .. }));
    }

    #[test]
    fn parses_full_deployment() {
        let text = r#"
            tent_id = "06"
            temperature_diff = 6.0

            [relays]
            on_sensor_fault = "hold"
            layout = { kind = "single", signal_pin = 17 }

            [[sensors]]
            kind = "ds18b20"

            [[sensors]]
            kind = "mcp9808"
            reserved = [0x68, 0x40]

            [outdoor]
            source = "remote"
            host = "pi@192.168.4.2"
            path = "/home/pi/thermostat-controllers/src/outdoor"

            [transfer]
            destination = "pi@192.168.4.1:/home/pi/Desktop"
        "#;
        let config = ControllerConfig::from_toml(text).unwrap();
        assert_eq!(config.relays.on_sensor_fault, FaultOutput::Hold);
        assert_eq!(config.relays.layout, RelayLayout::Single { signal_pin: 17 });
        assert_eq!(config.sensors.len(), 2);
        match &config.outdoor {
            Some(OutdoorConfig::Remote { timeout_secs, .. }) => assert_eq!(*timeout_secs, 5),
            other => panic!("unexpected outdoor config {:?}", other),
        }
        assert_eq!(config.transfer.unwrap().timeout_secs, 30);
    }

    #[test]
    fn rejects_log_interval_shorter_than_check() {
        let err = ControllerConfig::from_toml("check_interval_secs = 60\nlog_interval_secs = 30").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_shared_relay_pins() {
        let text = r#"
            [relays.layout]
            kind = "two-stage"
            signal_pin = 17
            stage_one_pin = 17
            stage_two_pin = 22
        "#;
        assert!(ControllerConfig::from_toml(text).is_err());
    }
}
