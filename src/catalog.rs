//! Static register catalog: one table per [`DeviceKind`].
//!
//! Mirrors the teacher crate's declarative per-register tables in
//! `protocol.rs`, generalized from one struct-per-register to a data
//! table, since this gateway's register set is configured per device
//! kind rather than fixed at compile time for a single meter model.
//!
//! Addresses beyond the three fingerprint registers named in the wire
//! contract (30578, 31501, 32000) are illustrative of the catalog's
//! shape, not a transcription of Sigenergy's full public register map.

use crate::device::DeviceKind;
use crate::registers::{Access, DataType, RegisterBank, RegisterDescriptor, Unit};

macro_rules! reg {
    ($name:literal, $addr:expr, $ty:expr, $gain:expr, $unit:expr, $access:expr, $bank:expr) => {
        RegisterDescriptor::new($name, $addr, $ty, $gain, $unit, $access, $bank)
    };
}

/// Fingerprint register used by [`crate::discovery`] to recognize an inverter with a DC charger.
pub const DC_CHARGER_FINGERPRINT_ADDRESS: u16 = 31501;
/// Fingerprint register used by [`crate::discovery`] to recognize a bare inverter.
pub const INVERTER_FINGERPRINT_ADDRESS: u16 = 30578;
/// Fingerprint register used by [`crate::discovery`] to recognize an AC charger.
pub const AC_CHARGER_FINGERPRINT_ADDRESS: u16 = 32000;

pub static PLANT_REGISTERS: &[RegisterDescriptor] = &[
    reg!(
        "plant_running_state",
        30000,
        DataType::U16,
        1.0,
        Unit::None,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "plant_grid_connection_status",
        30001,
        DataType::U16,
        1.0,
        Unit::None,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "plant_grid_active_power",
        30004,
        DataType::S32,
        1000.0,
        Unit::Kilowatt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "plant_pv_power",
        30006,
        DataType::S32,
        1000.0,
        Unit::Kilowatt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "plant_battery_power",
        30008,
        DataType::S32,
        1000.0,
        Unit::Kilowatt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "plant_ems_work_mode",
        30010,
        DataType::U16,
        1.0,
        Unit::None,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "plant_grid_code",
        30012,
        DataType::U16,
        1.0,
        Unit::None,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "plant_model_name",
        30050,
        DataType::String { len_registers: 10 },
        1.0,
        Unit::None,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "plant_timezone_offset_minutes",
        40500,
        DataType::S16,
        1.0,
        Unit::None,
        Access::ReadWrite,
        RegisterBank::Holding
    ),
    reg!(
        "plant_remote_ems_enable",
        41001,
        DataType::U16,
        1.0,
        Unit::None,
        Access::ReadWrite,
        RegisterBank::Holding
    ),
    reg!(
        "plant_remote_ems_control_mode",
        41002,
        DataType::U16,
        1.0,
        Unit::None,
        Access::ReadWrite,
        RegisterBank::Holding
    ),
    RegisterDescriptor::new(
        "plant_active_power_fixed_target",
        41010,
        DataType::S32,
        1000.0,
        Unit::Kilowatt,
        Access::ReadWrite,
        RegisterBank::Holding,
    )
    .plant_parameter_32(),
];

pub static INVERTER_REGISTERS: &[RegisterDescriptor] = &[
    reg!(
        "inverter_running_state",
        INVERTER_FINGERPRINT_ADDRESS,
        DataType::U16,
        1.0,
        Unit::None,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "inverter_rated_power",
        30580,
        DataType::U32,
        1000.0,
        Unit::Kilowatt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "inverter_pv1_voltage",
        30600,
        DataType::U16,
        10.0,
        Unit::Volt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "inverter_pv1_current",
        30601,
        DataType::U16,
        100.0,
        Unit::Ampere,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "inverter_pv2_voltage",
        30602,
        DataType::U16,
        10.0,
        Unit::Volt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "inverter_pv2_current",
        30603,
        DataType::U16,
        100.0,
        Unit::Ampere,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "inverter_temperature",
        30610,
        DataType::S16,
        10.0,
        Unit::Temperature,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "inverter_active_power_target",
        41101,
        DataType::S32,
        1000.0,
        Unit::Kilowatt,
        Access::ReadWrite,
        RegisterBank::Holding
    ),
];

pub static DC_CHARGER_REGISTERS: &[RegisterDescriptor] = &[
    reg!(
        "dc_charger_current",
        DC_CHARGER_FINGERPRINT_ADDRESS,
        DataType::U16,
        100.0,
        Unit::Ampere,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "dc_charger_voltage",
        31502,
        DataType::U16,
        10.0,
        Unit::Volt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "dc_charger_power",
        31503,
        DataType::U32,
        1000.0,
        Unit::Kilowatt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
];

pub static AC_CHARGER_REGISTERS: &[RegisterDescriptor] = &[
    reg!(
        "ac_charger_system_state",
        AC_CHARGER_FINGERPRINT_ADDRESS,
        DataType::U16,
        1.0,
        Unit::None,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "ac_charger_output_power",
        32010,
        DataType::U32,
        1000.0,
        Unit::Kilowatt,
        Access::ReadOnly,
        RegisterBank::Input
    ),
    reg!(
        "ac_charger_rated_current",
        32012,
        DataType::U16,
        100.0,
        Unit::Ampere,
        Access::ReadWrite,
        RegisterBank::Holding
    ),
];

/// The full set of registers for a device kind: its running-info and
/// parameter registers, readable and writable alike. §4.1's
/// `capability_set` is simply "all entries of this table" — the reader
/// and writer each filter by [`RegisterDescriptor::access`] as needed.
pub fn capability_set(kind: DeviceKind) -> &'static [RegisterDescriptor] {
    match kind {
        DeviceKind::Plant => PLANT_REGISTERS,
        DeviceKind::Inverter => INVERTER_REGISTERS,
        DeviceKind::AcCharger => AC_CHARGER_REGISTERS,
        DeviceKind::DcCharger => DC_CHARGER_REGISTERS,
    }
}

/// Look up a single descriptor by name within a device kind's catalog.
pub fn find(kind: DeviceKind, name: &str) -> Option<&'static RegisterDescriptor> {
    capability_set(kind).iter().find(|d| d.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_addresses_match_identification_registers() {
        assert_eq!(
            find(DeviceKind::Inverter, "inverter_running_state")
                .unwrap()
                .address,
            INVERTER_FINGERPRINT_ADDRESS
        );
        assert_eq!(
            find(DeviceKind::DcCharger, "dc_charger_current")
                .unwrap()
                .address,
            DC_CHARGER_FINGERPRINT_ADDRESS
        );
        assert_eq!(
            find(DeviceKind::AcCharger, "ac_charger_system_state")
                .unwrap()
                .address,
            AC_CHARGER_FINGERPRINT_ADDRESS
        );
    }

    #[test]
    fn plant_active_power_target_is_a_32bit_plant_parameter() {
        let d = find(DeviceKind::Plant, "plant_active_power_fixed_target").unwrap();
        assert_eq!(d.write_class, crate::registers::WriteClass::PlantParameter32);
    }
}
