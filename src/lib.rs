#![cfg_attr(docsrs, feature(doc_cfg))]
//! A Modbus/TCP polling gateway and control plane for a Sigenergy
//! energy-storage installation: plant controller, inverters, AC
//! chargers, and their DC-charger sub-devices.
//!
//! ## Layout
//!
//! - [`device`], [`registers`], [`catalog`]: the installation's static
//!   topology and the immutable per-`DeviceKind` register catalogs.
//! - [`codec`]: wire <-> typed [`codec::Value`] conversion.
//! - [`support`]: the plausibility-based Support Validator and the
//!   per-device [`support::SupportMap`].
//! - [`pool`]: the pooled Modbus/TCP transport, one client per endpoint.
//! - [`hub`]: [`hub::ModbusHub`], the probe/read/write primitive that
//!   owns support state.
//! - [`reader`], [`writer`]: the read and write entry points built on
//!   top of the hub.
//! - [`derived`]: pure derived-value transforms over a [`snapshot::Snapshot`].
//! - [`integration`]: trapezoidal power-to-energy integration.
//! - [`discovery`]: endpoint fingerprint identification.
//! - [`coordinator`]: the tiered polling loop that ties the above together.
//! - [`config`]: the persisted installation and integrator-state documents.
//! - [`service`]: [`service::ServiceHandle`], the surface shared by the
//!   daemon loop and the operational CLI.
//!
//! ## Quick start
//!
//! ```no_run
//! use sigen_gateway::config::InstallationConfig;
//! use sigen_gateway::pool::ConnectionPool;
//! use sigen_gateway::hub::ModbusHub;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = InstallationConfig::load("sigen-gateway.yaml")?;
//! let pool = ConnectionPool::tcp();
//! let hub = ModbusHub::new(pool, config.plant_connection.read_only);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod derived;
pub mod device;
pub mod discovery;
pub mod error;
pub mod hub;
pub mod integration;
pub mod pool;
pub mod reader;
pub mod registers;
pub mod service;
pub mod snapshot;
pub mod support;
pub mod writer;

pub use error::Error;
