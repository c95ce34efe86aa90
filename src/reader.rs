//! Device Reader (§4.5): composes a single read pass per device kind.

use std::sync::Arc;

use crate::device::{DeviceId, DeviceKind, DeviceRecord};
use crate::hub::{DeviceTarget, ModbusHub};
use crate::snapshot::RegisterMap;

pub struct DeviceReader {
    hub: Arc<ModbusHub>,
}

impl DeviceReader {
    pub fn new(hub: Arc<ModbusHub>) -> Self {
        Self { hub }
    }

    fn target_for(record: &DeviceRecord) -> DeviceTarget {
        DeviceTarget {
            id: DeviceId::new(record.kind, record.logical_name.clone()),
            endpoint: record.endpoint.clone(),
            unit_id: record.unit_id,
        }
    }

    /// Reads a plant or AC-charger device's own catalog. Plain pass-through
    /// to the hub; kept as a named entry point so the coordinator never
    /// has to know about [`DeviceTarget`] directly.
    pub async fn read_simple(&self, record: &DeviceRecord) -> RegisterMap {
        self.hub.read_device(&Self::target_for(record)).await
    }

    /// Reads an inverter's catalog and, when `has_dc_charger` is set,
    /// folds the DC-charger registers (read on the same endpoint and
    /// unit id, since a DC charger is not a separately addressed device)
    /// into the same map.
    pub async fn read_inverter(&self, record: &DeviceRecord) -> RegisterMap {
        debug_assert_eq!(record.kind, DeviceKind::Inverter);
        let mut values = self.hub.read_device(&Self::target_for(record)).await;

        if record.has_dc_charger {
            let dc_target = DeviceTarget {
                id: DeviceId::new(DeviceKind::DcCharger, record.logical_name.clone()),
                endpoint: record.endpoint.clone(),
                unit_id: record.unit_id,
            };
            let dc_values = self.hub.read_device(&dc_target).await;
            values.extend(dc_values);
        }

        values
    }
}
