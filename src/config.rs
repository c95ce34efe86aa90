//! Persisted configuration and integrator-state document formats (§6).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceKind, DeviceRecord, Endpoint, PLANT_UNIT_ID};
use crate::error::{Error, Result};

fn default_high() -> humantime_duration::Wrapper {
    humantime_duration::Wrapper(std::time::Duration::from_secs(5))
}
fn default_medium() -> humantime_duration::Wrapper {
    humantime_duration::Wrapper(std::time::Duration::from_secs(10))
}
fn default_low() -> humantime_duration::Wrapper {
    humantime_duration::Wrapper(std::time::Duration::from_secs(60))
}
fn default_alarm() -> humantime_duration::Wrapper {
    humantime_duration::Wrapper(std::time::Duration::from_secs(5))
}

/// Duration newtype so scan intervals serialize as human-readable
/// strings (`"5s"`) in the YAML document rather than as nanosecond counts.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Wrapper(pub Duration);

    impl Serialize for Wrapper {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&humantime::format_duration(self.0).to_string())
        }
    }

    impl<'de> Deserialize<'de> for Wrapper {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            let s = String::deserialize(d)?;
            humantime::parse_duration(&s)
                .map(Wrapper)
                .map_err(serde::de::Error::custom)
        }
    }

    impl From<Wrapper> for Duration {
        fn from(w: Wrapper) -> Duration {
            w.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanIntervals {
    #[serde(default = "default_high")]
    pub high: humantime_duration::Wrapper,
    #[serde(default = "default_alarm")]
    pub alarm: humantime_duration::Wrapper,
    #[serde(default = "default_medium")]
    pub medium: humantime_duration::Wrapper,
    #[serde(default = "default_low")]
    pub low: humantime_duration::Wrapper,
}

impl Default for ScanIntervals {
    fn default() -> Self {
        Self {
            high: default_high(),
            alarm: default_alarm(),
            medium: default_medium(),
            low: default_low(),
        }
    }
}

impl ScanIntervals {
    /// Builds a `ScanIntervals` directly from second counts, useful for
    /// tests and for CLI overrides where a YAML document isn't involved.
    pub fn from_secs(high: u64, alarm: u64, medium: u64, low: u64) -> Self {
        Self {
            high: humantime_duration::Wrapper(std::time::Duration::from_secs(high)),
            alarm: humantime_duration::Wrapper(std::time::Duration::from_secs(alarm)),
            medium: humantime_duration::Wrapper(std::time::Duration::from_secs(medium)),
            low: humantime_duration::Wrapper(std::time::Duration::from_secs(low)),
        }
    }

    /// Validates the tier rules of §4.6: all tiers must be integer
    /// multiples of the high-frequency period, and ordered
    /// `high <= alarm, medium, low`.
    pub fn validate(&self) -> Result<()> {
        let high = self.high.0;
        if high < std::time::Duration::from_secs(1) {
            return Err(Error::Configuration("high tier must be >= 1s".into()));
        }
        for (name, tier) in [("alarm", self.alarm.0), ("medium", self.medium.0), ("low", self.low.0)] {
            if tier < high {
                return Err(Error::Configuration(format!("{name} tier must be >= high tier")));
            }
            if tier.as_millis() % high.as_millis() != 0 {
                return Err(Error::Configuration(format!(
                    "{name} tier must be an integer multiple of the high tier"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantConnectionConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_plant_unit_id")]
    pub unit_id: u8,
    #[serde(default)]
    pub scan_intervals: ScanIntervals,
    #[serde(default)]
    pub read_only: bool,
}

fn default_plant_unit_id() -> u8 {
    PLANT_UNIT_ID
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverterConnectionConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    #[serde(default)]
    pub has_dc_charger: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcChargerConnectionConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

fn default_local_timezone() -> String {
    "UTC".to_string()
}

/// The persisted installation document (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationConfig {
    pub plant_connection: PlantConnectionConfig,
    #[serde(default)]
    pub inverter_connections: HashMap<String, InverterConnectionConfig>,
    #[serde(default)]
    pub ac_charger_connections: HashMap<String, AcChargerConnectionConfig>,
    /// IANA timezone name (e.g. `"Europe/Berlin"`) governing the daily
    /// local-midnight reset boundary for integrators (§4.5). Does not
    /// affect any register's own reported clock offset.
    #[serde(default = "default_local_timezone")]
    pub local_timezone: String,
}

impl InstallationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Configuration(format!("cannot open {}: {e}", path.display())))?;
        let config: Self = serde_yaml::from_reader(file)
            .map_err(|e| Error::Configuration(format!("cannot parse {}: {e}", path.display())))?;
        config.plant_connection.scan_intervals.validate()?;
        Ok(config)
    }

    pub fn device_records(&self) -> Vec<DeviceRecord> {
        let mut records = Vec::new();
        for (name, cfg) in &self.inverter_connections {
            records.push(DeviceRecord {
                kind: DeviceKind::Inverter,
                logical_name: name.clone(),
                endpoint: Endpoint::new(cfg.host.clone(), cfg.port),
                unit_id: cfg.unit_id,
                has_dc_charger: cfg.has_dc_charger,
            });
        }
        for (name, cfg) in &self.ac_charger_connections {
            records.push(DeviceRecord {
                kind: DeviceKind::AcCharger,
                logical_name: name.clone(),
                endpoint: Endpoint::new(cfg.host.clone(), cfg.port),
                unit_id: cfg.unit_id,
                has_dc_charger: false,
            });
        }
        records
    }

    pub fn plant_endpoint(&self) -> Endpoint {
        Endpoint::new(self.plant_connection.host.clone(), self.plant_connection.port)
    }

    /// Parses `local_timezone` into a `chrono_tz::Tz`, falling back to
    /// UTC if the configured name is not a recognized IANA zone.
    pub fn local_timezone(&self) -> chrono_tz::Tz {
        self.local_timezone.parse().unwrap_or(chrono_tz::Tz::UTC)
    }
}

/// One persisted record per integrator (§6): `{total_kwh, last_reset_at}`.
/// `total_kwh` is a human-readable decimal string; `last_reset_at`, when
/// present, is the local calendar day of the last daily reset formatted
/// as `YYYY-MM-DD` (not a full timestamp — only the day is ever compared
/// against "today" for missed-reset recovery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedIntegratorState {
    pub total_kwh: String,
    pub last_reset_at: Option<String>,
}

pub type PersistedIntegratorStates = HashMap<String, PersistedIntegratorState>;

pub fn load_integrator_states(path: impl AsRef<Path>) -> Result<PersistedIntegratorStates> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Configuration(format!("cannot open {}: {e}", path.display())))?;
    serde_yaml::from_reader(file)
        .map_err(|e| Error::Configuration(format!("cannot parse {}: {e}", path.display())))
}

pub fn save_integrator_states(path: impl AsRef<Path>, states: &PersistedIntegratorStates) -> Result<()> {
    let file = std::fs::File::create(path.as_ref())
        .map_err(|e| Error::Configuration(format!("cannot write {}: {e}", path.as_ref().display())))?;
    serde_yaml::to_writer(file, states)
        .map_err(|e| Error::Configuration(format!("cannot serialize integrator state: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_intervals_reject_non_multiple_tiers() {
        let mut intervals = ScanIntervals::default();
        intervals.medium.0 = std::time::Duration::from_millis(7_500);
        assert!(intervals.validate().is_err());
    }

    #[test]
    fn default_scan_intervals_are_valid() {
        assert!(ScanIntervals::default().validate().is_ok());
    }
}
