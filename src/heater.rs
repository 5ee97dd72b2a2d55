use crate::config::{FaultOutput, RelayLayout};
use rppal::gpio::{Gpio, OutputPin};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaterState {
    Off,
    On,
    Stage2,
    SensorFault,
}

impl HeaterState {
    /// Column value used in the CSV logs.
    pub fn label(&self) -> &'static str {
        match self {
            HeaterState::Off => "OFF",
            HeaterState::On => "ON",
            HeaterState::Stage2 => "ST2",
            HeaterState::SensorFault => "SENSOR",
        }
    }

    pub fn is_heating(&self) -> bool {
        matches!(self, HeaterState::On | HeaterState::Stage2)
    }
}

impl core::fmt::Display for HeaterState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

fn to_millidegrees(celsius: f64) -> i64 {
    (celsius * 1000.0).round() as i64
}

/// Fixed-threshold heater rule: heat while the tent is not at least
/// `threshold` degrees warmer than outside.
#[derive(Debug, Clone, Copy)]
pub struct HeaterDecision {
    threshold: f64,
    two_stage: bool,
}

impl HeaterDecision {
    pub fn new(threshold: f64, two_stage: bool) -> Self {
        Self { threshold, two_stage }
    }

    pub fn for_layout(threshold: f64, layout: &RelayLayout) -> Self {
        Self::new(threshold, matches!(layout, RelayLayout::TwoStage { .. }))
    }

    pub fn decide(&self, indoor: f64, outdoor: f64, valid: bool) -> HeaterState {
        if !valid {
            return HeaterState::SensorFault;
        }
        // Compared in whole millidegrees so a difference exactly at the
        // threshold heats regardless of binary rounding.
        if to_millidegrees(indoor - outdoor) <= to_millidegrees(self.threshold) {
            if self.two_stage {
                HeaterState::Stage2
            } else {
                HeaterState::On
            }
        } else {
            HeaterState::Off
        }
    }

    /// `decide` over possibly-missing temperatures; a missing side is a fault.
    pub fn decide_optional(&self, indoor: Option<f64>, outdoor: Option<f64>) -> HeaterState {
        match (indoor, outdoor) {
            (Some(indoor), Some(outdoor)) => self.decide(indoor, outdoor, true),
            _ => HeaterState::SensorFault,
        }
    }

    pub fn get_threshold(&self) -> f64 {
        self.threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Energize,
    DeEnergize,
    Hold,
}

impl RelayCommand {
    pub fn for_state(state: HeaterState, on_fault: FaultOutput) -> Self {
        match state {
            HeaterState::On | HeaterState::Stage2 => RelayCommand::Energize,
            HeaterState::Off => RelayCommand::DeEnergize,
            HeaterState::SensorFault => match on_fault {
                FaultOutput::Off => RelayCommand::DeEnergize,
                FaultOutput::Hold => RelayCommand::Hold,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Heater relay outputs. All stages switch together.
pub trait RelayDriver {
    fn set_heating(&mut self, on: bool) -> Result<(), HardwareError>;
    fn is_heating(&self) -> bool;
}

/// BCM-numbered GPIO lines driving the relay board.
pub struct GpioRelays {
    pins: Vec<OutputPin>,
    heating: bool,
}

impl GpioRelays {
    /// Claims every pin of `layout` and pulls it low.
    pub fn new(layout: &RelayLayout) -> Result<Self, HardwareError> {
        let gpio = Gpio::new()?;
        let mut pins = Vec::new();
        for pin in layout.pins() {
            let mut output = gpio.get(pin)?.into_output();
            output.set_low();
            pins.push(output);
        }
        info!("Relay pins {:?} initialised low", layout.pins());
        Ok(Self { pins, heating: false })
    }
}

impl RelayDriver for GpioRelays {
    fn set_heating(&mut self, on: bool) -> Result<(), HardwareError> {
        for pin in &mut self.pins {
            if on {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        if on != self.heating {
            debug!("Relays switched {}", if on { "high" } else { "low" });
        }
        self.heating = on;
        Ok(())
    }

    fn is_heating(&self) -> bool {
        self.heating
    }
}

/// Reference tents without a relay board.
#[derive(Debug, Default)]
pub struct NullRelays {
    heating: bool,
}

impl RelayDriver for NullRelays {
    fn set_heating(&mut self, on: bool) -> Result<(), HardwareError> {
        self.heating = on;
        Ok(())
    }

    fn is_heating(&self) -> bool {
        self.heating
    }
}

pub fn build_relays(layout: &RelayLayout) -> Result<Box<dyn RelayDriver>, HardwareError> {
    match layout {
        RelayLayout::None => Ok(Box::new(NullRelays::default())),
        _ => Ok(Box::new(GpioRelays::new(layout)?)),
    }
}
