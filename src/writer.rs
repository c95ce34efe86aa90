//! Parameter Writer (§4.9): the write-side counterpart to [`crate::reader::DeviceReader`].
//!
//! Resolves a logical device to its wire target, delegates the actual
//! write (including the fallback address strategy) to the hub, and then
//! asks the coordinator for an out-of-cycle refresh of the device that
//! was just written, so the operator doesn't have to wait for the next
//! scheduled tick to see the effect of their own write.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::device::{DeviceId, DeviceRecord};
use crate::error::Result;
use crate::hub::{DeviceTarget, ModbusHub};

/// Sent to the coordinator to request an immediate re-read of one
/// device, outside its normal tiered schedule.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub device: DeviceId,
}

#[derive(Clone)]
pub struct ParameterWriter {
    hub: Arc<ModbusHub>,
    refresh_tx: Option<mpsc::UnboundedSender<RefreshRequest>>,
}

impl ParameterWriter {
    pub fn new(hub: Arc<ModbusHub>) -> Self {
        Self {
            hub,
            refresh_tx: None,
        }
    }

    /// Wires the writer to the coordinator's refresh channel. Without
    /// this, writes still succeed; they simply wait for the next
    /// scheduled tick to be reflected in a snapshot.
    pub fn with_refresh_channel(mut self, tx: mpsc::UnboundedSender<RefreshRequest>) -> Self {
        self.refresh_tx = Some(tx);
        self
    }

    pub async fn write(&self, record: &DeviceRecord, register_name: &str, value: f64) -> Result<()> {
        let target = DeviceTarget {
            id: record.id(),
            endpoint: record.endpoint.clone(),
            unit_id: record.unit_id,
        };

        self.hub.write_parameter(&target, register_name, value).await?;

        if let Some(tx) = &self.refresh_tx {
            let _ = tx.send(RefreshRequest { device: record.id() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceKind, Endpoint};
    use crate::pool::tests::{MockBehavior, MockTransportFactory};
    use crate::pool::ConnectionPool;

    fn plant_record() -> DeviceRecord {
        DeviceRecord {
            kind: DeviceKind::Plant,
            logical_name: String::new(),
            endpoint: Endpoint::new("mock", 502),
            unit_id: 247,
            has_dc_charger: false,
        }
    }

    #[tokio::test]
    async fn successful_write_emits_a_refresh_request() {
        let factory = MockTransportFactory::new(MockBehavior::AllOk);
        let hub = ModbusHub::new(ConnectionPool::new(Arc::new(factory)), false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = ParameterWriter::new(hub).with_refresh_channel(tx);

        writer
            .write(&plant_record(), "plant_remote_ems_enable", 1.0)
            .await
            .unwrap();

        let request = rx.try_recv().expect("a refresh request should have been queued");
        assert_eq!(request.device, DeviceId::plant());
    }

    #[tokio::test]
    async fn failed_write_does_not_emit_a_refresh_request() {
        let factory = MockTransportFactory::new(MockBehavior::AllExceptions);
        let hub = ModbusHub::new(ConnectionPool::new(Arc::new(factory)), false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = ParameterWriter::new(hub).with_refresh_channel(tx);

        assert!(writer
            .write(&plant_record(), "plant_remote_ems_enable", 1.0)
            .await
            .is_err());
        assert!(rx.try_recv().is_err());
    }
}
