use super::{I2cBus, SensorError, SensorId, SensorReading, SensorSet};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use tracing::{debug, info};

const FAMILY: &str = "mcp9808";
const REG_AMBIENT_TEMP: u8 = 0x05;

/// MCP9808 boards on one I2C bus. Every acknowledging address that is not
/// reserved for another peripheral is treated as a temperature sensor.
pub struct Mcp9808Set<B: I2cBus> {
    bus: B,
    reserved: BTreeSet<u8>,
    scan: RangeInclusive<u8>,
    addresses: Vec<u8>,
}

impl<B: I2cBus> Mcp9808Set<B> {
    pub fn new(bus: B, reserved: impl IntoIterator<Item = u8>, scan: RangeInclusive<u8>) -> Self {
        Self {
            bus,
            reserved: reserved.into_iter().collect(),
            scan,
            addresses: Vec::new(),
        }
    }

    pub fn get_addresses(&self) -> &[u8] {
        &self.addresses
    }

    fn sensor_id(address: u8) -> SensorId {
        SensorId(format!("{}@0x{:02x}", FAMILY, address))
    }
}

/// Ambient temperature register to degrees Celsius (13-bit two's complement,
/// 0.0625 °C per LSB, top three bits are alert flags).
pub fn decode_ambient(raw: [u8; 2]) -> f64 {
    let word = u16::from_be_bytes(raw);
    let mut celsius = f64::from(word & 0x0FFF) / 16.0;
    if word & 0x1000 != 0 {
        celsius -= 256.0;
    }
    celsius
}

impl<B: I2cBus> SensorSet for Mcp9808Set<B> {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn detect(&mut self) -> Result<usize, SensorError> {
        let mut found = Vec::new();
        for address in self.scan.clone() {
            if self.reserved.contains(&address) {
                continue;
            }
            match self.bus.probe(address) {
                Ok(true) => found.push(address),
                Ok(false) => {}
                Err(e) => {
                    self.addresses.clear();
                    return Err(e);
                }
            }
        }

        if found != self.addresses {
            info!("Detected {} {} sensors at {:02x?}", found.len(), FAMILY, found);
        }
        self.addresses = found;
        Ok(self.addresses.len())
    }

    fn read_all(&mut self) -> Result<Vec<SensorReading>, SensorError> {
        let mut readings = Vec::with_capacity(self.addresses.len());
        for &address in &self.addresses {
            let id = Self::sensor_id(address);
            let mut raw = [0u8; 2];
            match self.bus.read_register(address, REG_AMBIENT_TEMP, &mut raw) {
                Ok(()) => {
                    let celsius = decode_ambient(raw);
                    debug!("{} read {:.4}", id, celsius);
                    readings.push(SensorReading::valid(id, celsius));
                }
                Err(SensorError::BusUnavailable { family, reason }) => {
                    return Err(SensorError::BusUnavailable { family, reason });
                }
                Err(e) => {
                    info!("Error reading a sensor: {}", e);
                    readings.push(SensorReading::invalid(id, None));
                }
            }
        }
        Ok(readings)
    }

    fn detected(&self) -> usize {
        self.addresses.len()
    }
}
