//! Derived-Value Functions (§4.7): pure transforms over a [`Snapshot`].
//!
//! Per the design notes' re-architecture guidance, this replaces the
//! original's per-sensor runtime-dispatched "value function" with a
//! small closed set of tagged transform variants, each a pure function
//! over the snapshot. Adding a new derived sensor means adding a
//! variant, not a new ad-hoc closure captured somewhere.

use log::warn;

use crate::snapshot::Snapshot;

/// A closed set of ways a derived sensor's value can be computed from a
/// snapshot. `Formula` covers the handful of named compound expressions
/// this gateway needs (grid split, consumed power, PV string power);
/// it does not aim to be a general expression language.
#[derive(Debug, Clone)]
pub enum Transform {
    Identity {
        path: ValuePath,
    },
    Map(MapKind),
    EpochToLocal {
        path: ValuePath,
        tz_offset_minutes_path: ValuePath,
    },
    Formula(Formula),
}

#[derive(Debug, Clone)]
pub enum ValuePath {
    Plant(&'static str),
    Inverter { logical_name: String, register: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub enum MapKind {
    RunningState,
    GridConnectionStatus,
    AcChargerSystemState,
    EmsWorkMode,
    RemoteEmsControlMode,
}

#[derive(Debug, Clone)]
pub enum Formula {
    GridImportKw,
    GridExportKw,
    ConsumedKw,
    PvStringPowerKw { inverter: String, string_index: u8 },
}

fn resolve(snapshot: &Snapshot, path: &ValuePath) -> Option<f64> {
    match path {
        ValuePath::Plant(name) => snapshot.plant_value(name).and_then(|v| v.as_f64()),
        ValuePath::Inverter {
            logical_name,
            register,
        } => snapshot
            .inverter_value(logical_name, register)
            .and_then(|v| v.as_f64()),
    }
}

impl Transform {
    pub fn evaluate(&self, snapshot: &Snapshot) -> Option<f64> {
        match self {
            Transform::Identity { path } => resolve(snapshot, path),
            Transform::Map(kind) => {
                let raw = match kind {
                    MapKind::RunningState => ValuePath::Plant("plant_running_state"),
                    MapKind::GridConnectionStatus => {
                        ValuePath::Plant("plant_grid_connection_status")
                    }
                    MapKind::AcChargerSystemState => ValuePath::Plant("ac_charger_system_state"),
                    MapKind::EmsWorkMode => ValuePath::Plant("plant_ems_work_mode"),
                    MapKind::RemoteEmsControlMode => {
                        ValuePath::Plant("plant_remote_ems_control_mode")
                    }
                };
                resolve(snapshot, &raw)
            }
            Transform::EpochToLocal {
                path,
                tz_offset_minutes_path,
            } => {
                let epoch = resolve(snapshot, path)?;
                let offset = resolve(snapshot, tz_offset_minutes_path).unwrap_or(0.0);
                epoch_to_datetime(epoch as i64, offset as i32).map(|dt| dt.timestamp() as f64)
            }
            Transform::Formula(f) => match f {
                Formula::GridImportKw => Some(grid_import_kw(snapshot)?),
                Formula::GridExportKw => Some(grid_export_kw(snapshot)?),
                Formula::ConsumedKw => consumed_kw(snapshot),
                Formula::PvStringPowerKw {
                    inverter,
                    string_index,
                } => pv_string_power_kw(snapshot, inverter, *string_index),
            },
        }
    }
}

/// Running-state value map shared by plant and inverter.
pub fn running_state_label(code: i64) -> &'static str {
    match code {
        0 => "standby",
        1 => "running",
        2 => "fault",
        3 => "shutdown",
        _ => "unknown",
    }
}

pub fn grid_connection_status_label(code: i64) -> &'static str {
    match code {
        0 => "on_grid",
        1 => "off_grid_auto",
        2 => "off_grid_manual",
        _ => "unknown",
    }
}

pub fn ac_charger_system_state_label(code: i64) -> &'static str {
    match code {
        0 => "system_init",
        1 => "a1_a2",
        2 => "b1",
        3 => "b2",
        4 => "c1",
        5 => "c2",
        6 => "f",
        7 => "e",
        _ => "unknown",
    }
}

/// EMS work-mode value map (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmsWorkMode {
    MaxSelfConsumption,
    AiMode,
    Tou,
    RemoteEms,
}

impl TryFrom<i64> for EmsWorkMode {
    type Error = ();
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(EmsWorkMode::MaxSelfConsumption),
            1 => Ok(EmsWorkMode::AiMode),
            2 => Ok(EmsWorkMode::Tou),
            3 => Ok(EmsWorkMode::RemoteEms),
            _ => Err(()),
        }
    }
}

/// Remote-EMS control mode value map (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEmsControlMode {
    PcsRemoteControl,
    Standby,
    MaximumSelfConsumption,
    CommandChargingGridFirst,
    CommandChargingPvFirst,
    CommandDischargingPvFirst,
    CommandDischargingEssFirst,
}

impl TryFrom<i64> for RemoteEmsControlMode {
    type Error = ();
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        use RemoteEmsControlMode::*;
        match v {
            0 => Ok(PcsRemoteControl),
            1 => Ok(Standby),
            2 => Ok(MaximumSelfConsumption),
            3 => Ok(CommandChargingGridFirst),
            4 => Ok(CommandChargingPvFirst),
            5 => Ok(CommandDischargingPvFirst),
            6 => Ok(CommandDischargingEssFirst),
            _ => Err(()),
        }
    }
}

/// Grid-code integer to country mapping; entries beyond the known
/// `1..=13` surface the raw integer per the spec's resolution of that
/// open question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridCountry {
    Germany,
    Austria,
    Belgium,
    France,
    Italy,
    Netherlands,
    Spain,
    Portugal,
    Switzerland,
    UnitedKingdom,
    Poland,
    CzechRepublic,
    Denmark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridCode {
    Known(GridCountry),
    Raw(i64),
}

pub fn grid_code(value: i64) -> GridCode {
    use GridCountry::*;
    let known = match value {
        1 => Some(Germany),
        2 => Some(Austria),
        3 => Some(Belgium),
        4 => Some(France),
        5 => Some(Italy),
        6 => Some(Netherlands),
        7 => Some(Spain),
        8 => Some(Portugal),
        9 => Some(Switzerland),
        10 => Some(UnitedKingdom),
        11 => Some(Poland),
        12 => Some(CzechRepublic),
        13 => Some(Denmark),
        _ => None,
    };
    match known {
        Some(country) => GridCode::Known(country),
        None => GridCode::Raw(value),
    }
}

/// `minutes_to_gmt(null) = null`, `minutes_to_gmt(0) = "GMT+0"`.
pub fn minutes_to_gmt(minutes: Option<i32>) -> Option<String> {
    let minutes = minutes?;
    let sign = if minutes < 0 { "-" } else { "+" };
    let hours = minutes.abs() / 60;
    let rem = minutes.abs() % 60;
    if rem == 0 {
        Some(format!("GMT{sign}{hours}"))
    } else {
        Some(format!("GMT{sign}{hours}:{rem:02}"))
    }
}

const MAX_PLAUSIBLE_EPOCH_SECONDS: i64 = 32_503_680_000;

/// `epoch_to_datetime(0) = null`; any epoch `> 32_503_680_000` yields null.
pub fn epoch_to_datetime(epoch_seconds: i64, tz_offset_minutes: i32) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    if epoch_seconds == 0 || epoch_seconds > MAX_PLAUSIBLE_EPOCH_SECONDS {
        return None;
    }
    let offset = chrono::FixedOffset::east_opt(tz_offset_minutes * 60)?;
    chrono::DateTime::from_timestamp(epoch_seconds, 0).map(|utc| utc.with_timezone(&offset))
}

pub fn grid_import_kw(snapshot: &Snapshot) -> Option<f64> {
    let grid = snapshot
        .plant_value("plant_grid_active_power")
        .and_then(|v| v.as_f64())?;
    Some(grid.max(0.0))
}

pub fn grid_export_kw(snapshot: &Snapshot) -> Option<f64> {
    let grid = snapshot
        .plant_value("plant_grid_active_power")
        .and_then(|v| v.as_f64())?;
    Some((-grid).max(0.0))
}

/// `consumed_kw = pv + grid_import - grid_export - battery`. Negative
/// results are allowed through but logged; results above 50 kW are
/// logged but retained.
pub fn consumed_kw(snapshot: &Snapshot) -> Option<f64> {
    let pv = snapshot.plant_value("plant_pv_power").and_then(|v| v.as_f64())?;
    let battery = snapshot
        .plant_value("plant_battery_power")
        .and_then(|v| v.as_f64())?;
    let import = grid_import_kw(snapshot)?;
    let export = grid_export_kw(snapshot)?;

    let consumed = pv + import - export - battery;
    if consumed < 0.0 {
        warn!("consumed_kw computed negative ({consumed:.3} kW); retaining");
    } else if consumed > 50.0 {
        warn!("consumed_kw exceeds 50 kW ({consumed:.3} kW); retaining");
    }
    Some(consumed)
}

/// `(voltage * current) / 1000` for the given PV string of an inverter.
/// Any missing input yields `None`; results with `|W| > 20_000` are
/// logged but retained.
pub fn pv_string_power_kw(snapshot: &Snapshot, inverter: &str, string_index: u8) -> Option<f64> {
    let registers = snapshot.inverters.get(inverter)?;
    let voltage_key = format!("inverter_pv{string_index}_voltage");
    let current_key = format!("inverter_pv{string_index}_current");
    let voltage = registers.get(voltage_key.as_str()).and_then(|v| v.as_f64())?;
    let current = registers.get(current_key.as_str()).and_then(|v| v.as_f64())?;

    let watts = voltage * current;
    if watts.abs() > 20_000.0 {
        warn!("pv_string_power for {inverter}#{string_index} exceeds 20kW ({watts:.1} W); retaining");
    }
    Some(watts / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use std::time::Instant;

    fn snapshot_with_plant(pv: f64, grid: f64, battery: f64) -> Snapshot {
        let mut s = Snapshot::empty(Instant::now());
        s.plant.insert("plant_pv_power", Value::Real(pv));
        s.plant.insert("plant_grid_active_power", Value::Real(grid));
        s.plant.insert("plant_battery_power", Value::Real(battery));
        s
    }

    #[test]
    fn grid_import_and_export_are_mutually_exclusive() {
        let s = snapshot_with_plant(4.0, -1.5, 0.5);
        assert_eq!(grid_import_kw(&s), Some(0.0));
        assert_eq!(grid_export_kw(&s), Some(1.5));
        assert_eq!(consumed_kw(&s), Some(4.0 + 0.0 - 1.5 - 0.5));
    }

    #[test]
    fn minutes_to_gmt_boundary_behaviors() {
        assert_eq!(minutes_to_gmt(None), None);
        assert_eq!(minutes_to_gmt(Some(0)), Some("GMT+0".to_string()));
        let negative = minutes_to_gmt(Some(-330)).unwrap();
        assert!(negative.starts_with("GMT-"));
    }

    #[test]
    fn epoch_to_datetime_boundary_behaviors() {
        assert!(epoch_to_datetime(0, 0).is_none());
        assert!(epoch_to_datetime(32_503_680_001, 0).is_none());
        assert!(epoch_to_datetime(1_700_000_000, 0).is_some());
    }

    #[test]
    fn grid_code_falls_back_to_raw_for_unknown_values() {
        assert_eq!(grid_code(1), GridCode::Known(GridCountry::Germany));
        assert_eq!(grid_code(999), GridCode::Raw(999));
    }

    #[test]
    fn missing_input_yields_none() {
        let s = Snapshot::empty(Instant::now());
        assert_eq!(consumed_kw(&s), None);
        assert_eq!(pv_string_power_kw(&s, "inv_a", 1), None);
    }
}
