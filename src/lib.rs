//! # Tent Thermostat
//!
//! Heater control for a small greenhouse tent: average the indoor temperature
//! sensors, compare against an outdoor reference and switch the heater relays
//! on a fixed differential rule.
//!
//! ## Features
//!
//! - **Sensor families**: MCP9808 over I2C and DS18B20 over 1-Wire, detected every cycle
//! - **Optional CO2**: MH-Z19 over UART, logged but never part of the control rule
//! - **Fault escalation**: persisted I/O-error and reboot counters with a bounded reboot budget
//! - **Logs**: per-cycle sensor CSV, periodic summary row and a JSON status snapshot
//!
//! ## Quick Start
//!
//! ```no_run
//! use tent_thermostat::{ControlLoop, ControllerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ControllerConfig::load("thermostat.toml".as_ref())?;
//! let mut control = ControlLoop::from_config(config)?;
//! control.run(None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`controller`] - The control loop and its per-cycle result
//! - [`sensors`] - Sensor families behind the [`SensorSet`] trait
//! - [`heater`] - Heater rule and relay outputs
//! - [`fault`] - Escalation policy over the persisted counters
//! - [`counters`] - Durable counter storage
//! - [`records`] - CSV logs and status snapshot

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod controller;
pub mod counters;
pub mod fault;
pub mod heater;
pub mod outdoor;
pub mod reboot;
pub mod records;
pub mod sensors;
pub mod transfer;

pub use config::{ConfigError, ControllerConfig};
pub use controller::{ControlError, ControlLoop, CycleOutcome, CycleResult, ExitReason, Hardware};
pub use counters::{CounterStore, FileCounterStore, StoreError};
pub use fault::{Escalation, FaultCounters, FaultEscalationPolicy, FaultLevel, FaultTracker};
pub use heater::{HeaterDecision, HeaterState, RelayCommand, RelayDriver};
pub use reboot::Rebooter;
pub use sensors::{Co2Sensor, SensorError, SensorId, SensorReading, SensorSet};
