use super::SensorError;
use rppal::uart::{Parity, Uart};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const FAMILY: &str = "mh-z19";
const FRAME_LEN: usize = 9;
const BAUD_RATE: u32 = 9600;

const CMD_READ_CO2: u8 = 0x86;
const CMD_ZERO_POINT: u8 = 0x87;

/// Optional CO2 peripheral. Failures here never affect heater control.
pub trait Co2Sensor {
    fn read_ppm(&mut self) -> Result<u16, SensorError>;
    fn calibrate_zero(&mut self) -> Result<(), SensorError>;
}

/// Byte transport to a serial peripheral.
pub trait SerialLink {
    fn send(&mut self, frame: &[u8]) -> Result<(), SensorError>;
    /// Fills as much of `buf` as arrives before the link's timeout.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SensorError>;
}

/// Serial port through rppal, opened on first use.
pub struct UartLink {
    device: PathBuf,
    timeout: Duration,
    uart: Option<Uart>,
}

impl UartLink {
    pub fn new(device: PathBuf, timeout: Duration) -> Self {
        Self {
            device,
            timeout,
            uart: None,
        }
    }

    fn uart(&mut self) -> Result<&mut Uart, SensorError> {
        if self.uart.is_none() {
            let unavailable = |e: rppal::uart::Error| SensorError::BusUnavailable {
                family: FAMILY,
                reason: format!("{}: {}", self.device.display(), e),
            };
            let mut uart = Uart::with_path(&self.device, BAUD_RATE, Parity::None, 8, 1).map_err(unavailable)?;
            uart.set_read_mode(FRAME_LEN as u8, self.timeout).map_err(unavailable)?;
            self.uart = Some(uart);
        }
        self.uart.as_mut().ok_or(SensorError::BusUnavailable {
            family: FAMILY,
            reason: "uart handle missing".into(),
        })
    }

    fn io_failed(&mut self, e: rppal::uart::Error) -> SensorError {
        self.uart = None;
        SensorError::BusUnavailable {
            family: FAMILY,
            reason: e.to_string(),
        }
    }
}

impl SerialLink for UartLink {
    fn send(&mut self, frame: &[u8]) -> Result<(), SensorError> {
        let result = self.uart()?.write(frame);
        result.map(|_| ()).map_err(|e| self.io_failed(e))
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SensorError> {
        let result = self.uart()?.read(buf);
        result.map_err(|e| self.io_failed(e))
    }
}

/// Winsen MH-Z19 NDIR sensor.
pub struct MhZ19<L: SerialLink> {
    link: L,
}

pub fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    let sum = frame[1..8].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

pub fn command_frame(command: u8) -> [u8; FRAME_LEN] {
    let mut frame = [0xFF, 0x01, command, 0, 0, 0, 0, 0, 0];
    frame[8] = checksum(&frame);
    frame
}

pub fn parse_co2_response(frame: &[u8; FRAME_LEN]) -> Result<u16, SensorError> {
    if frame[0] != 0xFF || frame[1] != CMD_READ_CO2 {
        return Err(SensorError::Device {
            id: super::SensorId(FAMILY.into()),
            reason: format!("unexpected response header {:02x} {:02x}", frame[0], frame[1]),
        });
    }
    if checksum(frame) != frame[8] {
        return Err(SensorError::Checksum(FAMILY));
    }
    Ok(u16::from_be_bytes([frame[2], frame[3]]))
}

impl<L: SerialLink> MhZ19<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }
}

impl MhZ19<UartLink> {
    pub fn open(device: PathBuf, timeout: Duration) -> Self {
        Self::new(UartLink::new(device, timeout))
    }
}

impl<L: SerialLink> Co2Sensor for MhZ19<L> {
    fn read_ppm(&mut self) -> Result<u16, SensorError> {
        self.link.send(&command_frame(CMD_READ_CO2))?;
        let mut response = [0u8; FRAME_LEN];
        let received = self.link.receive(&mut response)?;
        if received < FRAME_LEN {
            return Err(SensorError::Timeout(FAMILY));
        }
        let ppm = parse_co2_response(&response)?;
        debug!("CO2 {} ppm", ppm);
        Ok(ppm)
    }

    fn calibrate_zero(&mut self) -> Result<(), SensorError> {
        self.link.send(&command_frame(CMD_ZERO_POINT))?;
        info!("Requested CO2 zero point calibration");
        Ok(())
    }
}
