//! The Modbus Hub (§4.4): probe, read, write primitives plus the
//! per-device register-support map.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Mutex;

use crate::catalog;
use crate::codec::{self, Value};
use crate::device::{DeviceId, Endpoint};
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::registers::{RegisterBank, RegisterDescriptor, WriteClass};
use crate::support::{self, SupportMap, SupportState};

/// Ties a logical device to its wire address for the hub's purposes.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub id: DeviceId,
    pub endpoint: Endpoint,
    pub unit_id: u8,
}

/// Per-device register-support state plus the probed flag (§9: kept
/// separate from the immutable catalog, owned exclusively by the hub).
#[derive(Default)]
struct DeviceSupport {
    probed: bool,
    map: SupportMap,
}

pub struct ModbusHub {
    pool: ConnectionPool,
    support: Mutex<HashMap<DeviceId, DeviceSupport>>,
    read_only: bool,
}

impl ModbusHub {
    pub fn new(pool: ConnectionPool, read_only: bool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            support: Mutex::new(HashMap::new()),
            read_only,
        })
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn read_raw(
        &self,
        target: &DeviceTarget,
        descriptor: &RegisterDescriptor,
    ) -> Result<Vec<u16>> {
        match descriptor.bank {
            RegisterBank::Input => {
                self.pool
                    .read_input_registers(
                        &target.endpoint,
                        target.unit_id,
                        descriptor.address,
                        descriptor.count(),
                    )
                    .await
            }
            RegisterBank::Holding => {
                self.pool
                    .read_holding_registers(
                        &target.endpoint,
                        target.unit_id,
                        descriptor.address,
                        descriptor.count(),
                    )
                    .await
            }
        }
    }

    async fn classify(
        &self,
        target: &DeviceTarget,
        descriptor: &RegisterDescriptor,
    ) -> (SupportState, Option<Value>) {
        match self.read_raw(target, descriptor).await {
            Ok(words) => match codec::decode(descriptor, &words) {
                Ok(value) if support::is_plausible(descriptor.unit, &value) => {
                    (SupportState::Yes, Some(value))
                }
                Ok(value) => (SupportState::No, Some(value)),
                Err(_) => (SupportState::No, None),
            },
            Err(e) => {
                debug!(
                    "read of {} on {} failed: {e}",
                    descriptor.name, target.endpoint
                );
                (SupportState::No, None)
            }
        }
    }

    /// Probes every readable descriptor for `target`, classifying each
    /// via the Support Validator. Write-only registers are skipped.
    /// Idempotent: re-running it simply overwrites the prior
    /// classification.
    pub async fn probe(&self, target: &DeviceTarget) {
        let descriptors = catalog::capability_set(target.id.kind);
        let mut support = self.support.lock().await;
        let entry = support.entry(target.id.clone()).or_default();
        entry.probed = true;

        for descriptor in descriptors.iter().filter(|d| d.access.is_readable()) {
            let (state, _) = self.classify(target, descriptor).await;
            entry.map.set(&target.id, descriptor.name, state);
        }
    }

    /// Ensures `target` has been probed (lazily, on first use), then
    /// reads every descriptor whose support state is not `No`. Failed
    /// reads store `Value::Null`; a register that was `unknown` and
    /// fails transitions to `no`. The reader composes DC-charger
    /// registers on top of this; the hub reads exactly one device's
    /// own catalog per call.
    pub async fn read_device(&self, target: &DeviceTarget) -> HashMap<&'static str, Value> {
        if !self.support.lock().await.get(&target.id).is_some_and(|s| s.probed) {
            self.probe(target).await;
        }

        let mut out = HashMap::new();
        let descriptors = catalog::capability_set(target.id.kind);

        for descriptor in descriptors.iter().filter(|d| d.access.is_readable()) {
            let prior_state = {
                let support = self.support.lock().await;
                support
                    .get(&target.id)
                    .map(|s| s.map.get(&target.id, descriptor.name))
                    .unwrap_or(SupportState::Unknown)
            };
            if prior_state == SupportState::No {
                continue;
            }

            match self.read_raw(target, descriptor).await {
                Ok(words) => match codec::decode(descriptor, &words) {
                    Ok(value) => {
                        out.insert(descriptor.name, value);
                        if prior_state == SupportState::Unknown {
                            let mut support = self.support.lock().await;
                            support
                                .entry(target.id.clone())
                                .or_default()
                                .map
                                .set(&target.id, descriptor.name, SupportState::Yes);
                        }
                    }
                    Err(_) => {
                        out.insert(descriptor.name, Value::Null);
                    }
                },
                Err(e) => {
                    warn!(
                        "read of {} on {} failed: {e}",
                        descriptor.name, target.endpoint
                    );
                    out.insert(descriptor.name, Value::Null);
                    if prior_state == SupportState::Unknown {
                        let mut support = self.support.lock().await;
                        support
                            .entry(target.id.clone())
                            .or_default()
                            .map
                            .set(&target.id, descriptor.name, SupportState::No);
                    }
                }
            }
        }
        out
    }

    /// Resolves `register_name` against `target`'s catalog and writes
    /// `value` through it, applying the read-only guard and the
    /// Write Strategy fallback order (§4.4.2).
    pub async fn write_parameter(
        &self,
        target: &DeviceTarget,
        register_name: &str,
        value: f64,
    ) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyMode);
        }

        let descriptor = catalog::find(target.id.kind, register_name)
            .filter(|d| d.access.is_writable())
            .ok_or_else(|| Error::UnknownRegister(register_name.to_string(), target.id.kind))?;

        let words = codec::encode(descriptor, value)?;

        self.write_with_fallback(target, descriptor, &words)
            .await
            .map_err(|e| Error::WriteFailed {
                register: register_name.to_string(),
                endpoint: target.endpoint.clone(),
                source: Box::new(e),
            })
    }

    async fn write_with_fallback(
        &self,
        target: &DeviceTarget,
        descriptor: &RegisterDescriptor,
        words: &[u16],
    ) -> Result<()> {
        let mut candidate_addresses = vec![descriptor.address];
        if let Some(alt) = descriptor.address.checked_sub(40001) {
            candidate_addresses.push(alt);
        }
        if descriptor.write_class == WriteClass::PlantParameter32 {
            if let Some(alt) = descriptor.address.checked_sub(40000) {
                candidate_addresses.push(alt);
            }
            candidate_addresses.push(descriptor.address % 10000);
        }

        let mut last_err = None;
        for address in candidate_addresses {
            match self
                .pool
                .write_multiple_registers(&target.endpoint, target.unit_id, address, words.to_vec())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }

            if words.len() == 1 {
                match self
                    .pool
                    .write_single_register(&target.endpoint, target.unit_id, address, words[0])
                    .await
                {
                    Ok(()) => return Ok(()),
                    Err(e) => last_err = Some(e),
                }
            }
        }

        Err(last_err.unwrap_or(Error::UnsupportedRegister(descriptor.name)))
    }

    pub async fn support_state(&self, id: &DeviceId, register: &'static str) -> SupportState {
        let support = self.support.lock().await;
        support
            .get(id)
            .map(|s| s.map.get(id, register))
            .unwrap_or(SupportState::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use crate::pool::tests::{MockBehavior, MockTransportFactory};

    fn plant_target() -> DeviceTarget {
        DeviceTarget {
            id: DeviceId::new(DeviceKind::Plant, ""),
            endpoint: Endpoint::new("mock", 502),
            unit_id: 247,
        }
    }

    #[tokio::test]
    async fn a_register_classified_no_is_never_read_again() {
        let factory = MockTransportFactory::new(MockBehavior::AllExceptions);
        let hub = ModbusHub::new(ConnectionPool::new(Arc::new(factory.clone())), false);
        let target = plant_target();

        hub.read_device(&target).await;
        let reads_after_first_pass = factory.read_count();
        hub.read_device(&target).await;
        let reads_after_second_pass = factory.read_count();

        // second pass must skip every register already classified `no`
        assert_eq!(reads_after_first_pass, reads_after_second_pass);
    }

    #[tokio::test]
    async fn write_refused_in_read_only_mode() {
        let factory = MockTransportFactory::new(MockBehavior::AllOk);
        let hub = ModbusHub::new(ConnectionPool::new(Arc::new(factory)), true);
        let target = plant_target();
        let err = hub
            .write_parameter(&target, "plant_remote_ems_enable", 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnlyMode));
    }

    #[tokio::test]
    async fn write_falls_back_to_address_minus_40001() {
        let factory = MockTransportFactory::new(MockBehavior::RejectAddress(41001));
        let hub = ModbusHub::new(ConnectionPool::new(Arc::new(factory)), false);
        let target = plant_target();
        hub.write_parameter(&target, "plant_remote_ems_enable", 1.0)
            .await
            .unwrap();
    }
}
