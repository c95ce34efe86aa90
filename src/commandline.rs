use std::{fmt, ops::Deref, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use sigen_gateway::device::DeviceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceKindArg(pub DeviceKind);

impl ValueEnum for DeviceKindArg {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            DeviceKindArg(DeviceKind::Plant),
            DeviceKindArg(DeviceKind::Inverter),
            DeviceKindArg(DeviceKind::AcCharger),
            DeviceKindArg(DeviceKind::DcCharger),
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        let name = match self.0 {
            DeviceKind::Plant => "plant",
            DeviceKind::Inverter => "inverter",
            DeviceKind::AcCharger => "ac-charger",
            DeviceKind::DcCharger => "dc-charger",
        };
        Some(clap::builder::PossibleValue::new(name))
    }
}

impl Deref for DeviceKindArg {
    type Target = DeviceKind;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for DeviceKindArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the polling coordinator continuously, publishing snapshots
    /// and serving out-of-cycle refresh requests from writes.
    Daemon,

    /// Print the current snapshot as JSON.
    GetSnapshot,

    /// List the configured devices.
    ListDevices,

    /// List the register catalog for one device kind.
    ListRegisters {
        #[arg(value_enum)]
        device_kind: DeviceKindArg,
    },

    /// Write a value to a named parameter.
    WriteParameter {
        #[arg(value_enum)]
        device_kind: DeviceKindArg,

        /// Logical name of the device (omit for the plant).
        #[arg(long)]
        device: Option<String>,

        /// Register name as it appears in the catalog.
        register: String,

        /// Value to write, already in the register's engineering unit.
        value: f64,
    },

    /// Probe a host:port for its device fingerprint without adding it
    /// to the configuration.
    Identify {
        host: String,
        port: u16,
        #[arg(long)]
        unit_id: Option<u8>,
    },
}

const fn about_text() -> &'static str {
    "Polling gateway and control plane for a Sigenergy energy-storage installation"
}

#[derive(Parser, Debug)]
#[command(version, about = about_text(), long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Path to the installation configuration document.
    #[arg(long, short = 'c', default_value = "sigen-gateway.yaml")]
    pub config: PathBuf,

    /// Path to the persisted integrator-state document.
    #[arg(long, default_value = "sigen-gateway-state.yaml")]
    pub state: PathBuf,

    /// Output to stdout not in JSON format.
    #[arg(long, default_value = "false")]
    pub no_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}
