//! The coordinator's published view of the installation (§3 Snapshot).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::codec::Value;

pub type RegisterMap = HashMap<&'static str, Value>;

/// The coordinator's current view of all devices. Immutable once
/// published; a new tick produces a whole new `Snapshot` rather than
/// mutating this one.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Snapshot {
    pub plant: RegisterMap,
    pub inverters: HashMap<String, RegisterMap>,
    pub ac_chargers: HashMap<String, RegisterMap>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub fetched_at: Instant,
    pub partial: bool,
    /// How long this tick's whole fetch pass took (§B.1).
    pub tick_duration: Duration,
}

impl Snapshot {
    pub fn empty(fetched_at: Instant) -> Self {
        Self {
            plant: HashMap::new(),
            inverters: HashMap::new(),
            ac_chargers: HashMap::new(),
            fetched_at,
            partial: true,
            tick_duration: Duration::ZERO,
        }
    }

    pub fn plant_value(&self, name: &str) -> Option<&Value> {
        self.plant.get(name)
    }

    pub fn inverter_value(&self, logical_name: &str, name: &str) -> Option<&Value> {
        self.inverters.get(logical_name).and_then(|m| m.get(name))
    }
}
