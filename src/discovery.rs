//! Discovery / Identification (§4.10): classifies a candidate endpoint
//! by probing three fingerprint registers in a fixed order.

use std::time::Duration;

use log::debug;

use crate::catalog;
use crate::device::Endpoint;
use crate::pool::ConnectionPool;

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identification {
    InverterWithDc,
    Inverter,
    AcCharger,
    Unknown,
}

impl std::fmt::Display for Identification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Identification::InverterWithDc => "inverter_with_dc",
            Identification::Inverter => "inverter",
            Identification::AcCharger => "ac_charger",
            Identification::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Attempts reads of 31501 (inverter with DC charger), then 30578
/// (bare inverter), then 32000 (AC charger), in that exact order; the
/// first successful read wins. Probe failures are routine during
/// discovery (an unidentified endpoint is, by definition, not yet known
/// to support any of these registers) and log at `debug`, same as any
/// other unsupported-register read.
pub async fn identify(pool: &ConnectionPool, endpoint: &Endpoint, unit_id: u8) -> Identification {
    let fingerprints = [
        (catalog::DC_CHARGER_FINGERPRINT_ADDRESS, Identification::InverterWithDc),
        (catalog::INVERTER_FINGERPRINT_ADDRESS, Identification::Inverter),
        (catalog::AC_CHARGER_FINGERPRINT_ADDRESS, Identification::AcCharger),
    ];

    for (address, classification) in fingerprints {
        let attempt = tokio::time::timeout(
            PROBE_TIMEOUT,
            pool.read_input_registers(endpoint, unit_id, address, 1),
        )
        .await;
        match attempt {
            Ok(Ok(_)) => return classification,
            Ok(Err(e)) => debug!("identification probe of {address} on {endpoint} failed: {e}"),
            Err(_) => debug!("identification probe of {address} on {endpoint} timed out"),
        }
    }
    Identification::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::{MockBehavior, MockTransportFactory};
    use std::sync::Arc;

    #[tokio::test]
    async fn e1_all_failures_yield_unknown() {
        let pool = ConnectionPool::new(Arc::new(MockTransportFactory::new(MockBehavior::AllExceptions)));
        let endpoint = Endpoint::new("mock", 502);
        assert_eq!(identify(&pool, &endpoint, 1).await, Identification::Unknown);
    }

    #[tokio::test]
    async fn e1_success_on_first_fingerprint_yields_inverter_with_dc() {
        let pool = ConnectionPool::new(Arc::new(MockTransportFactory::new(MockBehavior::AllOk)));
        let endpoint = Endpoint::new("mock", 502);
        assert_eq!(
            identify(&pool, &endpoint, 1).await,
            Identification::InverterWithDc
        );
    }
}
