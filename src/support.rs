//! Per-device register support tracking and the plausibility-bounds
//! validator (§4.4.1).
//!
//! The catalog (`catalog.rs`) stays immutable; `supported` lives here,
//! in a map owned exclusively by the [`crate::hub::ModbusHub`], keyed by
//! `(device, register name)` so two devices of the same kind but
//! different firmware can disagree about what they expose.

use std::collections::HashMap;

use crate::codec::Value;
use crate::device::DeviceId;
use crate::registers::Unit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportState {
    Unknown,
    Yes,
    No,
}

#[derive(Debug, Default)]
pub struct SupportMap {
    entries: HashMap<(DeviceId, &'static str), SupportState>,
}

impl SupportMap {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, device: &DeviceId, register: &'static str) -> SupportState {
        self.entries
            .get(&(device.clone(), register))
            .copied()
            .unwrap_or(SupportState::Unknown)
    }

    pub fn set(&mut self, device: &DeviceId, register: &'static str, state: SupportState) {
        self.entries.insert((device.clone(), register), state);
    }
}

/// Plausibility bounds, absolute value, by unit hint. `None` means "no unit": any finite value passes.
fn bounds(unit: Unit) -> Option<(f64, f64)> {
    match unit {
        Unit::Volt => Some((0.0, 1000.0)),
        Unit::Ampere => Some((0.0, 1000.0)),
        Unit::Watt | Unit::Kilowatt => Some((0.0, 100.0)),
        Unit::WattHour | Unit::KilowattHour => Some((0.0, 100_000.0)),
        Unit::Temperature => Some((-50.0, 100.0)),
        Unit::Percent => Some((0.0, 120.0)),
        Unit::None => None,
    }
}

/// Judges whether a decoded `value`, read for a register with the given
/// `unit` hint, looks like real device data rather than sentinel garbage
/// from an unsupported address range.
pub fn is_plausible(unit: Unit, value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Str(s) => !s.is_empty(),
        Value::Int(_) | Value::Real(_) => {
            let Some(n) = value.as_f64() else {
                return false;
            };
            if !n.is_finite() {
                return false;
            }
            match bounds(unit) {
                Some((lo, hi)) => n.abs() >= lo && n.abs() <= hi,
                None => true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_above_120_is_implausible() {
        assert!(!is_plausible(Unit::Percent, &Value::Int(121)));
    }

    #[test]
    fn voltage_near_1000_is_plausible() {
        assert!(is_plausible(Unit::Volt, &Value::Int(999)));
    }

    #[test]
    fn zero_values_are_permitted() {
        assert!(is_plausible(Unit::Volt, &Value::Int(0)));
        assert!(is_plausible(Unit::Kilowatt, &Value::Real(0.0)));
    }

    #[test]
    fn empty_string_is_unsupported_but_non_empty_is_supported() {
        // an all-zero STRING register decodes to an empty string (codec.rs
        // strips trailing zero bytes), which this validator treats the
        // same as "no data returned": unsupported.
        assert!(!is_plausible(Unit::None, &Value::Str(String::new())));
        assert!(is_plausible(Unit::None, &Value::Str("SGN-1234".to_string())));
    }

    #[test]
    fn support_map_defaults_to_unknown() {
        let map = SupportMap::new();
        let d = DeviceId::plant();
        assert_eq!(map.get(&d, "plant_pv_power"), SupportState::Unknown);
    }
}
