//! Register descriptor types shared by the catalog, codec and support validator.

use std::fmt;

/// Numeric/string shape of a register's decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U16,
    S16,
    U32,
    S32,
    U64,
    String { len_registers: u16 },
}

impl DataType {
    /// Number of 16-bit registers this type occupies on the wire.
    pub fn register_count(&self) -> u16 {
        match self {
            DataType::U16 | DataType::S16 => 1,
            DataType::U32 | DataType::S32 => 2,
            DataType::U64 => 4,
            DataType::String { len_registers } => *len_registers,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::String { .. })
    }
}

/// Unit hint used by the Support Validator's plausibility bounds and by
/// the derived-value layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Volt,
    Ampere,
    Watt,
    Kilowatt,
    WattHour,
    KilowattHour,
    Temperature,
    Percent,
    None,
}

/// Whether a register may be read, written, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl Access {
    pub fn is_readable(&self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Access::ReadWrite | Access::WriteOnly)
    }
}

/// Whether a register is read with function code "read input registers"
/// (running-info) or "read holding registers" (parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterBank {
    Input,
    Holding,
}

/// Whether this register participates in the 32-bit plant-parameter extra
/// write fallbacks of §4.4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteClass {
    Standard,
    PlantParameter32,
}

/// A single, immutable catalog entry. `supported` is deliberately absent:
/// it lives in the hub's per-device [`crate::support::SupportMap`] instead,
/// so two devices of the same kind but different firmware can disagree.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub address: u16,
    pub data_type: DataType,
    pub gain: f64,
    pub unit: Unit,
    pub access: Access,
    pub bank: RegisterBank,
    pub write_class: WriteClass,
}

impl RegisterDescriptor {
    pub const fn new(
        name: &'static str,
        address: u16,
        data_type: DataType,
        gain: f64,
        unit: Unit,
        access: Access,
        bank: RegisterBank,
    ) -> Self {
        Self {
            name,
            address,
            data_type,
            gain,
            unit,
            access,
            bank,
            write_class: WriteClass::Standard,
        }
    }

    pub const fn plant_parameter_32(mut self) -> Self {
        self.write_class = WriteClass::PlantParameter32;
        self
    }

    pub fn count(&self) -> u16 {
        self.data_type.register_count()
    }
}

impl fmt::Display for RegisterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}
