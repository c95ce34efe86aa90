//! Device and endpoint identity: the installation's static topology.

use std::fmt;

/// Which kind of physical (or, for DC chargers, logical) device a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeviceKind {
    Plant,
    Inverter,
    AcCharger,
    DcCharger,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Plant => "plant",
            DeviceKind::Inverter => "inverter",
            DeviceKind::AcCharger => "ac_charger",
            DeviceKind::DcCharger => "dc_charger",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeviceKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plant" => Ok(DeviceKind::Plant),
            "inverter" => Ok(DeviceKind::Inverter),
            "ac_charger" => Ok(DeviceKind::AcCharger),
            "dc_charger" => Ok(DeviceKind::DcCharger),
            other => Err(crate::error::Error::UnknownDeviceKind(other.to_string())),
        }
    }
}

/// A `(host, port)` pair addressing a Modbus/TCP server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn socket_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        use std::net::ToSocketAddrs;
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Unit id reserved for the plant controller; device unit ids are `1..=246`.
pub const PLANT_UNIT_ID: u8 = 247;

/// Unique identifier for a device record: its kind plus its logical name
/// (the plant has no logical name of its own and uses an empty string).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub kind: DeviceKind,
    pub logical_name: String,
}

impl DeviceId {
    pub fn plant() -> Self {
        Self {
            kind: DeviceKind::Plant,
            logical_name: String::new(),
        }
    }

    pub fn new(kind: DeviceKind, logical_name: impl Into<String>) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.logical_name.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}:{}", self.kind, self.logical_name)
        }
    }
}

/// A configured device in the installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub kind: DeviceKind,
    pub logical_name: String,
    pub endpoint: Endpoint,
    pub unit_id: u8,
    /// Only meaningful for inverters: whether a DC charger sub-device is probed for.
    pub has_dc_charger: bool,
}

impl DeviceRecord {
    pub fn id(&self) -> DeviceId {
        DeviceId::new(self.kind, self.logical_name.clone())
    }
}
