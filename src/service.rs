//! The `ServiceHandle` (§9 design notes): a single explicit value that
//! bundles the hub, the coordinator's published snapshot, and the
//! writer, giving both the daemon loop and the operational CLI the same
//! surface. No singletons: callers construct one of these and pass it
//! around, the way the teacher's `SafeClient` is constructed and shared
//! via `Arc` rather than reached for through a global.

use std::sync::Arc;

use tokio::sync::watch;

use crate::catalog;
use crate::config::InstallationConfig;
use crate::device::{DeviceId, DeviceKind, DeviceRecord, Endpoint, PLANT_UNIT_ID};
use crate::discovery::{self, Identification};
use crate::error::{Error, Result};
use crate::hub::ModbusHub;
use crate::registers::RegisterDescriptor;
use crate::snapshot::Snapshot;
use crate::writer::ParameterWriter;

pub struct ServiceHandle {
    hub: Arc<ModbusHub>,
    snapshot_rx: watch::Receiver<Arc<Snapshot>>,
    writer: ParameterWriter,
    plant: DeviceRecord,
    devices: Vec<DeviceRecord>,
}

impl ServiceHandle {
    pub fn new(
        hub: Arc<ModbusHub>,
        snapshot_rx: watch::Receiver<Arc<Snapshot>>,
        writer: ParameterWriter,
        config: &InstallationConfig,
    ) -> Self {
        let plant = DeviceRecord {
            kind: DeviceKind::Plant,
            logical_name: String::new(),
            endpoint: config.plant_endpoint(),
            unit_id: config.plant_connection.unit_id,
            has_dc_charger: false,
        };
        Self {
            hub,
            snapshot_rx,
            writer,
            plant,
            devices: config.device_records(),
        }
    }

    /// Returns the most recently published snapshot without blocking;
    /// the coordinator keeps publishing new ones as ticks complete.
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Blocks until a snapshot newer than the one currently held is published.
    pub async fn wait_for_snapshot(&mut self) -> Arc<Snapshot> {
        let _ = self.snapshot_rx.changed().await;
        self.snapshot_rx.borrow().clone()
    }

    fn find_device(&self, kind: DeviceKind, logical_name: Option<&str>) -> Result<&DeviceRecord> {
        if kind == DeviceKind::Plant {
            return Ok(&self.plant);
        }
        let name = logical_name.ok_or_else(|| Error::UnknownDevice(format!("{kind} requires a logical name")))?;
        self.devices
            .iter()
            .find(|d| d.kind == kind && d.logical_name == name)
            .ok_or_else(|| Error::UnknownDevice(name.to_string()))
    }

    pub async fn write_parameter(
        &self,
        device_kind: DeviceKind,
        logical_name: Option<&str>,
        register: &str,
        value: f64,
    ) -> Result<()> {
        let record = self.find_device(device_kind, logical_name)?;
        self.writer.write(record, register, value).await
    }

    pub fn list_devices(&self) -> Vec<DeviceId> {
        std::iter::once(self.plant.id())
            .chain(self.devices.iter().map(DeviceRecord::id))
            .collect()
    }

    pub fn list_registers(&self, device_kind: DeviceKind) -> &'static [RegisterDescriptor] {
        catalog::capability_set(device_kind)
    }

    /// Probes a candidate endpoint with the discovery fingerprint order
    /// without requiring it to already be part of the configuration.
    pub async fn identify(&self, host: &str, port: u16, unit_id: Option<u8>) -> Identification {
        let endpoint = Endpoint::new(host, port);
        let unit_id = unit_id.unwrap_or(1);
        discovery::identify(self.hub.pool(), &endpoint, unit_id).await
    }

    pub fn plant_unit_id(&self) -> u8 {
        PLANT_UNIT_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstallationConfig, PlantConnectionConfig, ScanIntervals};
    use crate::pool::tests::{MockBehavior, MockTransportFactory};
    use crate::pool::ConnectionPool;
    use std::collections::HashMap;

    fn config() -> InstallationConfig {
        InstallationConfig {
            plant_connection: PlantConnectionConfig {
                host: "mock".into(),
                port: 502,
                unit_id: PLANT_UNIT_ID,
                scan_intervals: ScanIntervals::default(),
                read_only: false,
            },
            inverter_connections: HashMap::new(),
            ac_charger_connections: HashMap::new(),
            local_timezone: "UTC".to_string(),
        }
    }

    #[tokio::test]
    async fn write_to_unknown_device_is_rejected_before_touching_the_wire() {
        let factory = MockTransportFactory::new(MockBehavior::AllOk);
        let hub = ModbusHub::new(ConnectionPool::new(Arc::new(factory)), false);
        let (_tx, rx) = watch::channel(Arc::new(Snapshot::empty(std::time::Instant::now())));
        let writer = ParameterWriter::new(Arc::clone(&hub));
        let service = ServiceHandle::new(hub, rx, writer, &config());

        let err = service
            .write_parameter(DeviceKind::Inverter, Some("missing"), "some_register", 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDevice(_)));
    }

    #[test]
    fn list_devices_always_includes_the_plant() {
        let factory = MockTransportFactory::new(MockBehavior::AllOk);
        let hub = ModbusHub::new(ConnectionPool::new(Arc::new(factory)), false);
        let (_tx, rx) = watch::channel(Arc::new(Snapshot::empty(std::time::Instant::now())));
        let writer = ParameterWriter::new(Arc::clone(&hub));
        let service = ServiceHandle::new(hub, rx, writer, &config());

        assert!(service.list_devices().contains(&DeviceId::plant()));
    }
}
