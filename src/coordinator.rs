//! Polling Coordinator (§4.6): the single loop that owns tick cadence,
//! snapshot assembly, and the integration pass. Per the design notes'
//! "no singletons" guidance, a [`PollingCoordinator`] is an explicit
//! value constructed by the caller (see [`crate::service::ServiceHandle`]),
//! not a global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};

use crate::codec::Value;
use crate::config::{save_integrator_states, PersistedIntegratorState, PersistedIntegratorStates, ScanIntervals};
use crate::derived::Transform;
use crate::device::{DeviceId, DeviceRecord};
use crate::error::{Error, Result};
use crate::hub::ModbusHub;
use crate::integration::{IntegrationEngine, IntegratorState, ResetPolicy};
use crate::reader::DeviceReader;
use crate::snapshot::{RegisterMap, Snapshot};
use crate::writer::RefreshRequest;

/// A tick must complete within this deadline or the coordinator logs an
/// `Error::SnapshotTimeout` and publishes the prior snapshot unchanged.
const TICK_DEADLINE: Duration = Duration::from_secs(60);

/// One counter step per high-tier tick; when it reaches a tier's
/// multiple, that tier's devices are polled too.
/// The alarm tier is not separately tracked: the catalog does not
/// partition registers by tier, so alarm-rate registers are read
/// together with the high tier on every tick (alarm is, by definition,
/// never slower than high).
#[derive(Debug, Default)]
struct TierCounter {
    ticks_since_medium: u32,
    ticks_since_low: u32,
}

/// Tracks, per device, the longest observed gap between two consecutive
/// ticks in which that device's read succeeded (§B.1 of the expanded
/// spec). Surfaced for diagnostics; never affects polling behavior.
#[derive(Default)]
struct UpdateIntervalTracker {
    last_success: HashMap<DeviceId, Instant>,
    largest: HashMap<DeviceId, Duration>,
}

impl UpdateIntervalTracker {
    fn record(&mut self, device: DeviceId, at: Instant) {
        if let Some(prev) = self.last_success.insert(device.clone(), at) {
            let gap = at.saturating_duration_since(prev);
            let entry = self.largest.entry(device).or_insert(Duration::ZERO);
            if gap > *entry {
                *entry = gap;
            }
        }
    }

    fn largest_for(&self, device: &DeviceId) -> Option<Duration> {
        self.largest.get(device).copied()
    }
}

/// A named energy counter fed by a derived transform, registered once
/// at startup (e.g. grid import/export, PV yield).
pub struct IntegratorDefinition {
    pub source_sensor_key: String,
    pub source: Transform,
    pub reset_policy: ResetPolicy,
    pub round_digits: u32,
    pub max_gap: Duration,
}

/// Parses a [`PersistedIntegratorState`] and applies it via
/// [`IntegratorState::restore`]. A `total_kwh` string that fails to
/// parse is passed through as `NAN`, letting `restore`'s own
/// malformed-value handling log the warning and reset to zero, rather
/// than duplicating that logging here.
fn restore_integrator(state: &mut IntegratorState, persisted: &PersistedIntegratorState, restored_at: DateTime<Utc>) {
    let total_kwh = persisted.total_kwh.parse::<f64>().unwrap_or(f64::NAN);
    let last_reset_local_day = persisted
        .last_reset_at
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
    state.restore(total_kwh, last_reset_local_day, restored_at);
}

pub struct PollingCoordinator {
    hub: Arc<ModbusHub>,
    reader: DeviceReader,
    plant: DeviceRecord,
    devices: Vec<DeviceRecord>,
    scan_intervals: ScanIntervals,
    integration: IntegrationEngine,
    integrator_sources: HashMap<String, Transform>,
    intervals: UpdateIntervalTracker,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    refresh_rx: mpsc::UnboundedReceiver<RefreshRequest>,
    last_local_day: Option<chrono::NaiveDate>,
    local_timezone: chrono_tz::Tz,
    /// The slowest tick's fetch duration seen so far (§B.1). Mirrors
    /// the original's `largest_update_interval`: seeded at 100ms on the
    /// first tick, clamped to the configured high-tier interval (with a
    /// warning) when a tick runs over it, otherwise only grows.
    slowest_tick: Duration,
    /// Where integrator state is persisted after every tick. `None`
    /// disables persistence (used by tests that construct a coordinator
    /// directly).
    state_path: Option<PathBuf>,
}

impl PollingCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub: Arc<ModbusHub>,
        plant: DeviceRecord,
        devices: Vec<DeviceRecord>,
        scan_intervals: ScanIntervals,
        integrators: Vec<IntegratorDefinition>,
        refresh_rx: mpsc::UnboundedReceiver<RefreshRequest>,
        local_timezone: chrono_tz::Tz,
        persisted_states: &PersistedIntegratorStates,
        state_path: Option<PathBuf>,
    ) -> Result<(Self, watch::Receiver<Arc<Snapshot>>)> {
        scan_intervals.validate()?;

        let restored_at = Utc::now();
        let mut integration = IntegrationEngine::new();
        let mut integrator_sources = HashMap::new();
        for def in integrators {
            let mut state = IntegratorState::new(
                def.source_sensor_key.clone(),
                def.reset_policy,
                def.round_digits,
                def.max_gap,
            );
            if let Some(persisted) = persisted_states.get(&def.source_sensor_key) {
                restore_integrator(&mut state, persisted, restored_at);
            }
            integration.register(state);
            integrator_sources.insert(def.source_sensor_key, def.source);
        }

        // Missed-reset recovery (§4.8) runs once at startup, before the
        // first tick; `last_local_day` is seeded to today so the very
        // first `integrate()` call doesn't immediately re-fire
        // `reset_daily` and wipe the state just restored above.
        let today = restored_at.with_timezone(&local_timezone).date_naive();
        integration.synthesize_missed_resets(today);

        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::empty(Instant::now())));
        let reader = DeviceReader::new(Arc::clone(&hub));

        let coordinator = Self {
            hub,
            reader,
            plant,
            devices,
            scan_intervals,
            integration,
            integrator_sources,
            intervals: UpdateIntervalTracker::default(),
            snapshot_tx,
            refresh_rx,
            last_local_day: Some(today),
            local_timezone,
            slowest_tick: Duration::ZERO,
            state_path,
        };
        Ok((coordinator, snapshot_rx))
    }

    pub fn largest_update_interval(&self, device: &DeviceId) -> Option<Duration> {
        self.intervals.largest_for(device)
    }

    /// The slowest tick's fetch duration observed so far (§B.1).
    pub fn slowest_tick(&self) -> Duration {
        self.slowest_tick
    }

    pub fn hub(&self) -> &Arc<ModbusHub> {
        &self.hub
    }

    /// Snapshots every integrator's current state in the on-disk format
    /// (§6), for persistence or inspection.
    pub fn persisted_states(&self) -> PersistedIntegratorStates {
        self.integration
            .integrators()
            .iter()
            .map(|integrator| {
                (
                    integrator.source_sensor_key.clone(),
                    PersistedIntegratorState {
                        total_kwh: format!("{:.6}", integrator.total_kwh()),
                        last_reset_at: integrator
                            .last_reset_local_day()
                            .map(|day| day.format("%Y-%m-%d").to_string()),
                    },
                )
            })
            .collect()
    }

    /// Applies the original's `largest_update_interval` clamping rule to
    /// one tick's fetch duration (`coordinator.py`): the first tick
    /// seeds the tracker at 100ms; a tick exceeding the configured
    /// high-tier interval clamps to that interval and warns; otherwise
    /// the tracker only grows when a tick is strictly slower.
    fn record_tick_duration(&mut self, elapsed: Duration) {
        let configured = Duration::from(self.scan_intervals.high);
        if self.slowest_tick.is_zero() {
            self.slowest_tick = Duration::from_millis(100);
            debug!("first tick took {elapsed:?}; seeding slowest_tick at 100ms");
        } else if elapsed > configured {
            self.slowest_tick = configured;
            warn!("tick took {elapsed:?}, exceeding the configured high-tier interval of {configured:?}");
        } else if elapsed > self.slowest_tick {
            self.slowest_tick = elapsed;
            debug!("new slowest tick: {elapsed:?}");
        }
    }

    /// Runs ticks on the high-tier period until `shutdown` fires. Each
    /// tick is wrapped in [`TICK_DEADLINE`]; a tick that overruns is
    /// logged and skipped rather than allowed to pile up on the next one.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from(self.scan_intervals.high));
        let mut tiers = TierCounter::default();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("polling coordinator received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_tick(&mut tiers).await;
                }
                Some(request) = self.refresh_rx.recv() => {
                    info!("out-of-cycle refresh requested for {}", request.device);
                    self.run_tick(&mut tiers).await;
                }
            }
        }
    }

    async fn run_tick(&mut self, tiers: &mut TierCounter) {
        match tokio::time::timeout(TICK_DEADLINE, self.assemble_snapshot(tiers, false)).await {
            Ok(Ok(snapshot)) => {
                self.integrate(&snapshot);
                let _ = self.snapshot_tx.send(Arc::new(snapshot));
            }
            Ok(Err(e)) => error!("tick failed: {e}"),
            Err(_) => error!("{}", Error::SnapshotTimeout),
        }
    }

    /// Performs a single full poll of every device regardless of tier
    /// cadence, publishes it, and returns it. Used for on-demand reads
    /// (the operational CLI's `get-snapshot`) where waiting for the
    /// next scheduled medium/low tier tick would be surprising.
    pub async fn poll_once(&mut self) -> Result<Snapshot> {
        let mut tiers = TierCounter::default();
        let snapshot = tokio::time::timeout(TICK_DEADLINE, self.assemble_snapshot(&mut tiers, true))
            .await
            .map_err(|_| Error::SnapshotTimeout)??;
        self.integrate(&snapshot);
        let _ = self.snapshot_tx.send(Arc::new(snapshot.clone()));
        Ok(snapshot)
    }

    fn tier_is_due(&self, period: Duration, counter: u32) -> bool {
        let high = Duration::from(self.scan_intervals.high);
        period.is_zero() || counter as u64 % (period.as_millis() / high.as_millis()).max(1) as u64 == 0
    }

    async fn assemble_snapshot(&mut self, tiers: &mut TierCounter, force_all_tiers: bool) -> Result<Snapshot> {
        tiers.ticks_since_medium = tiers.ticks_since_medium.wrapping_add(1);
        tiers.ticks_since_low = tiers.ticks_since_low.wrapping_add(1);

        let tick_start = Instant::now();
        let mut snapshot = Snapshot::empty(tick_start);
        snapshot.partial = false;

        let mut plant_map = self.reader.read_simple(&self.plant).await;
        if self.track_update(self.plant.id(), &mut plant_map) {
            snapshot.partial = true;
        }
        snapshot.plant = plant_map;

        let medium_due = force_all_tiers
            || self.tier_is_due(Duration::from(self.scan_intervals.medium), tiers.ticks_since_medium);
        let low_due = force_all_tiers
            || self.tier_is_due(Duration::from(self.scan_intervals.low), tiers.ticks_since_low);

        for device_index in 0..self.devices.len() {
            let device = self.devices[device_index].clone();
            let due = match device.kind {
                crate::device::DeviceKind::Inverter => medium_due,
                crate::device::DeviceKind::AcCharger => low_due,
                _ => true,
            };
            if !due {
                continue;
            }

            let mut map = match device.kind {
                crate::device::DeviceKind::Inverter => self.reader.read_inverter(&device).await,
                _ => self.reader.read_simple(&device).await,
            };
            if self.track_update(device.id(), &mut map) {
                snapshot.partial = true;
            }

            match device.kind {
                crate::device::DeviceKind::Inverter => {
                    snapshot.inverters.insert(device.logical_name.clone(), map);
                }
                crate::device::DeviceKind::AcCharger => {
                    snapshot.ac_chargers.insert(device.logical_name.clone(), map);
                }
                _ => {}
            }
        }

        let elapsed = tick_start.elapsed();
        snapshot.tick_duration = elapsed;
        self.record_tick_duration(elapsed);

        Ok(snapshot)
    }

    /// Treats a register map where every value failed to decode as an
    /// unreachable device (§4.6, scenario E6): the map is cleared to the
    /// empty map before it reaches the snapshot, rather than published
    /// full of `Value::Null` entries, and `true` is returned so the
    /// caller can raise `Snapshot::partial`. This applies equally to a
    /// device that was probed and working in a prior tick: `read_device`
    /// still returns one `Value::Null` per previously-supported register
    /// when the device stops responding, not an empty map.
    fn track_update(&mut self, device: DeviceId, map: &mut RegisterMap) -> bool {
        let unreachable = !map.is_empty() && map.values().all(|v| matches!(v, Value::Null));
        if unreachable {
            map.clear();
            warn!("{device} appears unreachable this tick; publishing an empty sub-map");
        } else if !map.is_empty() {
            self.intervals.record(device, Instant::now());
        }
        unreachable
    }

    fn integrate(&mut self, snapshot: &Snapshot) {
        let sources = &self.integrator_sources;
        let emitted = self.integration.update_all(
            |key| sources.get(key).and_then(|transform| transform.evaluate(snapshot)),
            Utc::now(),
        );
        for (key, value) in emitted {
            if let Some(kwh) = value {
                info!("integrator '{key}' total = {kwh:.4} kWh");
            }
        }

        let today = Utc::now().with_timezone(&self.local_timezone).date_naive();
        if self.last_local_day != Some(today) {
            self.integration.reset_daily(today);
            self.last_local_day = Some(today);
        }

        if let Some(path) = &self.state_path {
            let states = self.persisted_states();
            if let Err(e) = save_integrator_states(path, &states) {
                error!("failed to persist integrator state to {}: {e}", path.display());
            }
        }
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

    fn coordinator_with(scan_intervals: ScanIntervals) -> PollingCoordinator {
        let hub = ModbusHub::new(
            ConnectionPool::new(Arc::new(MockTransportFactory::new(MockBehavior::AllOk))),
            false,
        );
        let (_tx, rx) = mpsc::unbounded_channel();
        PollingCoordinator::new(
            hub,
            plant_record(),
            Vec::new(),
            scan_intervals,
            Vec::new(),
            rx,
            chrono_tz::Tz::UTC,
            &PersistedIntegratorStates::new(),
            None,
        )
        .unwrap()
        .0
    }

    #[test]
    fn medium_tier_fires_every_nth_tick() {
        let coordinator = coordinator_with(ScanIntervals::from_secs(5, 5, 15, 60));
        // medium is 3x the high period: due on ticks 3, 6, 9, ...
        let period = Duration::from(coordinator.scan_intervals.medium);
        assert!(coordinator.tier_is_due(period, 3));
        assert!(!coordinator.tier_is_due(period, 1));
        assert!(!coordinator.tier_is_due(period, 2));
        assert!(coordinator.tier_is_due(period, 6));
    }

    #[test]
    fn low_tier_fires_less_often_than_medium() {
        let coordinator = coordinator_with(ScanIntervals::from_secs(5, 5, 15, 60));
        let period = Duration::from(coordinator.scan_intervals.low);
        assert!(coordinator.tier_is_due(period, 12));
        assert!(!coordinator.tier_is_due(period, 6));
    }

    #[tokio::test]
    async fn unreachable_device_publishes_an_empty_sub_map_and_marks_partial() {
        let hub = ModbusHub::new(
            ConnectionPool::new(Arc::new(MockTransportFactory::new(MockBehavior::AllExceptions))),
            false,
        );
        let (_tx, rx) = mpsc::unbounded_channel();
        let (mut coordinator, _snap_rx) = PollingCoordinator::new(
            hub,
            plant_record(),
            Vec::new(),
            ScanIntervals::default(),
            Vec::new(),
            rx,
            chrono_tz::Tz::UTC,
            &PersistedIntegratorStates::new(),
            None,
        )
        .unwrap();

        let mut tiers = TierCounter::default();
        let snapshot = coordinator.assemble_snapshot(&mut tiers, false).await.unwrap();
        assert!(snapshot.partial);
        assert!(snapshot.plant.is_empty());
    }

    /// E6: a device that was probed and working in a prior tick, then
    /// goes unreachable, must still publish an empty sub-map rather than
    /// one full of `Value::Null` (the realistic case `read_device`
    /// produces, as opposed to a device that was never probed at all).
    #[tokio::test]
    async fn previously_working_device_that_goes_unreachable_publishes_an_empty_sub_map() {
        let factory = Arc::new(MockTransportFactory::new(MockBehavior::AllOk));
        let hub = ModbusHub::new(ConnectionPool::new(factory.clone()), false);
        let (_tx, rx) = mpsc::unbounded_channel();
        let (mut coordinator, _snap_rx) = PollingCoordinator::new(
            hub,
            plant_record(),
            Vec::new(),
            ScanIntervals::default(),
            Vec::new(),
            rx,
            chrono_tz::Tz::UTC,
            &PersistedIntegratorStates::new(),
            None,
        )
        .unwrap();

        let mut tiers = TierCounter::default();
        let first = coordinator.assemble_snapshot(&mut tiers, false).await.unwrap();
        assert!(!first.partial);
        assert!(!first.plant.is_empty());

        factory.set_behavior(MockBehavior::AllExceptions);
        let second = coordinator.assemble_snapshot(&mut tiers, false).await.unwrap();
        assert!(second.partial);
        assert!(second.plant.is_empty());
    }

    #[tokio::test]
    async fn restores_integrator_total_from_persisted_state() {
        let hub = ModbusHub::new(
            ConnectionPool::new(Arc::new(MockTransportFactory::new(MockBehavior::AllOk))),
            false,
        );
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut persisted = PersistedIntegratorStates::new();
        persisted.insert(
            "grid_import_kwh".to_string(),
            PersistedIntegratorState {
                total_kwh: "12.5".to_string(),
                last_reset_at: None,
            },
        );
        let integrators = vec![IntegratorDefinition {
            source_sensor_key: "grid_import_kwh".to_string(),
            source: Transform::Formula(crate::derived::Formula::GridImportKw),
            reset_policy: ResetPolicy::Never,
            round_digits: 4,
            max_gap: crate::integration::DEFAULT_MAX_GAP,
        }];
        let (coordinator, _snap_rx) = PollingCoordinator::new(
            hub,
            plant_record(),
            Vec::new(),
            ScanIntervals::default(),
            integrators,
            rx,
            chrono_tz::Tz::UTC,
            &persisted,
            None,
        )
        .unwrap();

        assert_eq!(coordinator.integration.integrators()[0].total_kwh(), 12.5);
    }

    #[test]
    fn record_tick_duration_seeds_at_100ms_then_only_grows() {
        let mut coordinator = coordinator_with(ScanIntervals::from_secs(5, 5, 15, 60));
        coordinator.record_tick_duration(Duration::from_millis(3));
        assert_eq!(coordinator.slowest_tick(), Duration::from_millis(100));

        coordinator.record_tick_duration(Duration::from_millis(50));
        assert_eq!(coordinator.slowest_tick(), Duration::from_millis(100));

        coordinator.record_tick_duration(Duration::from_millis(250));
        assert_eq!(coordinator.slowest_tick(), Duration::from_millis(250));
    }

    #[test]
    fn record_tick_duration_clamps_to_configured_interval_when_exceeded() {
        let mut coordinator = coordinator_with(ScanIntervals::from_secs(5, 5, 15, 60));
        coordinator.record_tick_duration(Duration::from_millis(1));
        coordinator.record_tick_duration(Duration::from_secs(9));
        assert_eq!(coordinator.slowest_tick(), Duration::from_secs(5));
    }
}
