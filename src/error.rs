//! Error types used throughout the gateway library.
//!
//! Per-register and per-device failures (a bad read, an unsupported
//! register) are recovered from locally by the [`crate::hub::ModbusHub`]
//! and never reach this enum as a read-pass return value; this enum is
//! for errors that must be surfaced to a caller: a resolved write, a
//! tick-level timeout, or a configuration mistake.

use crate::device::{DeviceKind, Endpoint};

/// Errors surfaced by the gateway's public contract.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport/connect failure; the endpoint is marked disconnected.
    #[error("connection to {0} failed: {1}")]
    Connection(Endpoint, String),

    /// A per-operation or per-tick timeout was exceeded.
    #[error("operation on {0} timed out")]
    Timeout(Endpoint),

    /// A tick exceeded its deadline; the previous snapshot is retained.
    #[error("snapshot tick exceeded its deadline")]
    SnapshotTimeout,

    /// The coordinator could not produce any usable data this tick.
    #[error("update failed: {0}")]
    UpdateFailed(String),

    /// A Modbus protocol-level exception was returned by the device.
    #[error("device returned modbus exception: {0}")]
    ModbusException(#[from] tokio_modbus::ExceptionCode),

    /// A probe concluded the device does not expose this register.
    #[error("register '{0}' is not supported by this device")]
    UnsupportedRegister(&'static str),

    /// The named register does not exist in the catalog for this device kind.
    #[error("unknown register '{0}' for device kind {1:?}")]
    UnknownRegister(String, DeviceKind),

    /// No device with this logical name is configured.
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    /// The requested device kind is not one of plant/inverter/ac_charger/dc_charger.
    #[error("unknown device kind '{0}'")]
    UnknownDeviceKind(String),

    /// A write was attempted while the hub is in read-only mode.
    #[error("write refused: gateway is in read-only mode")]
    ReadOnlyMode,

    /// Every addressing fallback in the write strategy failed.
    #[error("write to '{register}' on {endpoint} failed after exhausting all addressing fallbacks: {source}")]
    WriteFailed {
        register: String,
        endpoint: Endpoint,
        #[source]
        source: Box<Error>,
    },

    /// Raw registers could not be interpreted as the declared type.
    #[error("could not decode register '{0}' as its declared type")]
    DecodeError(&'static str),

    /// A transport error from the underlying `tokio-modbus` client.
    #[error(transparent)]
    Modbus(#[from] tokio_modbus::Error),

    /// The persisted configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub(crate) type Result<T> = std::result::Result<T, Error>;
