use crate::config::FaultConfig;
use crate::counters::CounterStore;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const MAX_ESCALATION_HISTORY: usize = 32;

/// Durable I/O-error and reboot counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCounters {
    pub io_errors: u32,
    pub reboots: u32,
}

impl FaultCounters {
    pub fn is_zero(&self) -> bool {
        self.io_errors == 0 && self.reboots == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultLevel {
    Normal,
    Degraded,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Escalation {
    /// No failures and nothing to reset.
    Clean,
    /// No failures; the previous non-zero counters were cleared.
    Recovered { previous: FaultCounters },
    Recorded { counters: FaultCounters },
    /// Counters already persisted; the caller must reboot the host.
    Reboot { counters: FaultCounters },
    /// Reboot budget spent; keep running and keep counting.
    Exhausted { counters: FaultCounters },
}

impl Escalation {
    pub fn counters(&self) -> FaultCounters {
        match *self {
            Escalation::Clean | Escalation::Recovered { .. } => FaultCounters::default(),
            Escalation::Recorded { counters }
            | Escalation::Reboot { counters }
            | Escalation::Exhausted { counters } => counters,
        }
    }

    pub fn requests_reboot(&self) -> bool {
        matches!(self, Escalation::Reboot { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub timestamp: i64,
    pub escalation: Escalation,
}

/// Pure transition function over [`FaultCounters`].
#[derive(Debug, Clone, Copy)]
pub struct FaultEscalationPolicy {
    error_max: u32,
    reboot_max: u32,
}

impl FaultEscalationPolicy {
    pub fn new(error_max: u32, reboot_max: u32) -> Self {
        Self {
            error_max: error_max.max(1),
            reboot_max,
        }
    }

    pub fn level(&self, counters: FaultCounters) -> FaultLevel {
        if counters.reboots >= self.reboot_max {
            FaultLevel::Exhausted
        } else if counters.io_errors >= self.error_max {
            FaultLevel::Degraded
        } else {
            FaultLevel::Normal
        }
    }

    pub fn evaluate(&self, counters: FaultCounters, cycle_failed: bool) -> Escalation {
        if !cycle_failed {
            return if counters.is_zero() {
                Escalation::Clean
            } else {
                Escalation::Recovered { previous: counters }
            };
        }

        let mut next = counters;
        next.io_errors = next.io_errors.saturating_add(1);

        if self.level(counters) == FaultLevel::Exhausted {
            return Escalation::Exhausted { counters: next };
        }

        if next.io_errors >= self.error_max {
            next.io_errors = 0;
            next.reboots = next.reboots.saturating_add(1);
            return Escalation::Reboot { counters: next };
        }

        Escalation::Recorded { counters: next }
    }

    pub fn get_error_max(&self) -> u32 {
        self.error_max
    }

    pub fn get_reboot_max(&self) -> u32 {
        self.reboot_max
    }
}

impl From<FaultConfig> for FaultEscalationPolicy {
    fn from(config: FaultConfig) -> Self {
        Self::new(config.error_max, config.reboot_max)
    }
}

/// Applies the policy once per cycle with a read-modify-write of the store.
pub struct FaultTracker {
    policy: FaultEscalationPolicy,
    store: Box<dyn CounterStore>,
    last_known: FaultCounters,
    history: Vec<EscalationRecord, MAX_ESCALATION_HISTORY>,
}

impl FaultTracker {
    pub fn new(policy: FaultEscalationPolicy, store: Box<dyn CounterStore>) -> Self {
        let last_known = match store.load() {
            Ok(counters) => counters,
            Err(e) => {
                warn!("Could not load fault counters, assuming zero: {}", e);
                FaultCounters::default()
            }
        };
        Self {
            policy,
            store,
            last_known,
            history: Vec::new(),
        }
    }

    pub fn on_cycle(&mut self, cycle_failed: bool, timestamp: i64) -> Escalation {
        let current = match self.store.load() {
            Ok(counters) => counters,
            Err(e) => {
                warn!("Could not load fault counters, using last known {:?}: {}", self.last_known, e);
                self.last_known
            }
        };

        let mut escalation = self.policy.evaluate(current, cycle_failed);
        let next = escalation.counters();

        let mut persisted = next;
        if next != current {
            if let Err(e) = self.store.save(&next) {
                error!("Could not persist fault counters {:?}: {}", next, e);
                persisted = current;
                if escalation.requests_reboot() {
                    // An unrecorded reboot would never count against the budget.
                    error!("Suppressing reboot because the reboot count could not be saved");
                    escalation = Escalation::Recorded { counters: current };
                }
            }
        }
        self.last_known = persisted;

        match escalation {
            Escalation::Clean => {}
            Escalation::Recovered { previous } => {
                info!(
                    "No I/O error detected; resetting {} errors and {} reboots",
                    previous.io_errors, previous.reboots
                );
            }
            Escalation::Recorded { counters } => {
                warn!("I/O error #{} occurred", counters.io_errors);
            }
            Escalation::Reboot { counters } => {
                error!(
                    "Maximum I/O errors ({}) reached; reboot {} of {}",
                    self.policy.get_error_max(),
                    counters.reboots,
                    self.policy.get_reboot_max()
                );
            }
            Escalation::Exhausted { counters } => {
                warn!(
                    "Max reboots ({}) reached; I/O error #{} occurred",
                    counters.reboots, counters.io_errors
                );
            }
        }

        if escalation != Escalation::Clean {
            self.record(EscalationRecord { timestamp, escalation });
        }
        escalation
    }

    /// Zeroes the persisted counters outside the normal cycle.
    pub fn reset(&mut self) -> Result<(), crate::counters::StoreError> {
        self.store.reset()?;
        self.last_known = FaultCounters::default();
        Ok(())
    }

    fn record(&mut self, record: EscalationRecord) {
        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(record);
    }

    pub fn get_counters(&self) -> FaultCounters {
        self.last_known
    }

    pub fn get_level(&self) -> FaultLevel {
        self.policy.level(self.last_known)
    }

    pub fn get_policy(&self) -> &FaultEscalationPolicy {
        &self.policy
    }

    pub fn get_history(&self) -> &[EscalationRecord] {
        &self.history
    }
}
