use super::SensorError;
use rppal::i2c::I2c;
use tracing::debug;

const FAMILY: &str = "i2c";

/// Register-level access to an I2C bus.
pub trait I2cBus {
    /// True when a device acknowledges at `address`.
    fn probe(&mut self, address: u8) -> Result<bool, SensorError>;
    fn read_register(&mut self, address: u8, register: u8, buf: &mut [u8]) -> Result<(), SensorError>;
}

/// `/dev/i2c-N` through rppal, opened on first use and reopened after a
/// bus-level failure so a reseated cable recovers without a restart.
pub struct LinuxI2c {
    bus: u8,
    handle: Option<I2c>,
}

impl LinuxI2c {
    pub fn new(bus: u8) -> Self {
        Self { bus, handle: None }
    }

    fn handle(&mut self) -> Result<&mut I2c, SensorError> {
        if self.handle.is_none() {
            let i2c = I2c::with_bus(self.bus).map_err(|e| SensorError::BusUnavailable {
                family: FAMILY,
                reason: format!("bus {}: {}", self.bus, e),
            })?;
            debug!("Opened I2C bus {}", self.bus);
            self.handle = Some(i2c);
        }
        self.handle.as_mut().ok_or(SensorError::BusUnavailable {
            family: FAMILY,
            reason: "bus handle missing".into(),
        })
    }
}

impl I2cBus for LinuxI2c {
    fn probe(&mut self, address: u8) -> Result<bool, SensorError> {
        let i2c = self.handle()?;
        if let Err(e) = i2c.set_slave_address(u16::from(address)) {
            self.handle = None;
            return Err(SensorError::BusUnavailable {
                family: FAMILY,
                reason: e.to_string(),
            });
        }
        let mut byte = [0u8; 1];
        Ok(i2c.read(&mut byte).is_ok())
    }

    fn read_register(&mut self, address: u8, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        let i2c = self.handle()?;
        i2c.set_slave_address(u16::from(address))
            .and_then(|()| i2c.write_read(&[register], buf))
            .map_err(|e| SensorError::Device {
                id: super::SensorId(format!("i2c-0x{:02x}", address)),
                reason: e.to_string(),
            })
    }
}
