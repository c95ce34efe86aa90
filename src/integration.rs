//! Integration Engine (§4.8): trapezoidal time-integration of power
//! samples into monotonic, daily-resetting energy counters.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, warn};

/// Default cap on the gap between two samples that may still be
/// integrated as a straight line; a longer gap is treated like a fresh
/// bootstrap instead of trapezoiding across an outage of unknown shape.
pub const DEFAULT_MAX_GAP: Duration = Duration::from_secs(600);

/// When a counter resets to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    Never,
    DailyLocalMidnight,
}

/// State machine of an [`IntegratorState`]:
/// `new -> bootstrapped -> accumulating <-> reset_pending -> accumulating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    Bootstrapped,
    Accumulating,
}

/// One per derived-energy sensor (§3 Integrator State).
#[derive(Debug, Clone)]
pub struct IntegratorState {
    pub source_sensor_key: String,
    pub total_kwh: f64,
    last_sample_value: Option<f64>,
    last_sample_time: Option<DateTime<Utc>>,
    pub reset_policy: ResetPolicy,
    pub round_digits: u32,
    /// Samples more than this far apart are not integrated across;
    /// the later sample re-bootstraps instead (§3 Integrator State).
    pub max_gap: Duration,
    last_reset_local_day: Option<NaiveDate>,
    phase: Phase,
}

impl IntegratorState {
    pub fn new(
        source_sensor_key: impl Into<String>,
        reset_policy: ResetPolicy,
        round_digits: u32,
        max_gap: Duration,
    ) -> Self {
        Self {
            source_sensor_key: source_sensor_key.into(),
            total_kwh: 0.0,
            last_sample_value: None,
            last_sample_time: None,
            reset_policy,
            round_digits,
            max_gap,
            last_reset_local_day: None,
            phase: Phase::New,
        }
    }

    /// Restores persisted state at startup. A malformed (negative or
    /// non-finite) persisted value resets `total_kwh` to zero instead.
    /// `last_sample_value` is cleared and `last_sample_time` is set to
    /// the restoration instant, so the next tick bootstraps afresh.
    /// `last_reset_local_day`, when known, is carried over so missed
    /// midnight resets across a restart can still be synthesized.
    pub fn restore(
        &mut self,
        persisted_total_kwh: f64,
        last_reset_local_day: Option<NaiveDate>,
        restored_at: DateTime<Utc>,
    ) {
        self.total_kwh = if persisted_total_kwh.is_finite() && persisted_total_kwh >= 0.0 {
            persisted_total_kwh
        } else {
            warn!(
                "discarding malformed persisted total_kwh={persisted_total_kwh} for '{}'",
                self.source_sensor_key
            );
            0.0
        };
        self.last_sample_value = None;
        self.last_sample_time = Some(restored_at);
        self.last_reset_local_day = last_reset_local_day;
        self.phase = Phase::Bootstrapped;
    }

    /// One step of the trapezoidal integration (§4.8). `v_new_kw` is in
    /// kW and is converted to watts internally. Returns `round(total_kwh,
    /// round_digits)` on every successful step, including the bootstrap
    /// step, or `None` if the sample was skipped.
    pub fn update(&mut self, v_new_kw: Option<f64>, t_new: DateTime<Utc>) -> Option<f64> {
        let v_new_kw = v_new_kw?;
        if !v_new_kw.is_finite() {
            return None;
        }
        let v_new_w = v_new_kw * 1000.0;

        let Some(last_time) = self.last_sample_time else {
            self.last_sample_value = Some(v_new_w);
            self.last_sample_time = Some(t_new);
            self.phase = Phase::Bootstrapped;
            return Some(self.rounded());
        };

        let delta_t = (t_new - last_time).num_milliseconds() as f64 / 1000.0;
        if delta_t <= 0.0 {
            self.last_sample_value = Some(v_new_w);
            self.last_sample_time = Some(t_new);
            return Some(self.rounded());
        }

        if delta_t > self.max_gap.as_secs_f64() {
            warn!(
                "'{}' gap of {delta_t:.1}s exceeds max_gap of {:.1}s; re-bootstrapping instead of integrating across it",
                self.source_sensor_key,
                self.max_gap.as_secs_f64()
            );
            self.last_sample_value = Some(v_new_w);
            self.last_sample_time = Some(t_new);
            self.phase = Phase::Bootstrapped;
            return Some(self.rounded());
        }

        let last_value = self.last_sample_value.unwrap_or(v_new_w);
        let area_watt_seconds = delta_t * (last_value + v_new_w) / 2.0;
        self.total_kwh += area_watt_seconds / 3_600_000.0;
        self.last_sample_value = Some(v_new_w);
        self.last_sample_time = Some(t_new);
        self.phase = Phase::Accumulating;

        debug!(
            "'{}' integrated {area_watt_seconds:.1} Ws over {delta_t:.1}s -> total {:.4} kWh",
            self.source_sensor_key, self.total_kwh
        );
        Some(self.rounded())
    }

    fn rounded(&self) -> f64 {
        let factor = 10f64.powi(self.round_digits as i32);
        (self.total_kwh * factor).round() / factor
    }

    /// Resets `total_kwh` to zero without touching the last-sample
    /// fields, so the next integration step picks up continuously
    /// across the reset boundary.
    pub fn reset(&mut self, local_day: chrono::NaiveDate) {
        self.total_kwh = 0.0;
        self.last_reset_local_day = Some(local_day);
    }

    /// Missed-reset recovery: on startup, if the last persisted reset
    /// timestamp is from a previous local day, a reset is synthesized
    /// before the first sample.
    pub fn synthesize_missed_reset_if_needed(&mut self, today_local: chrono::NaiveDate) {
        if self.reset_policy != ResetPolicy::DailyLocalMidnight {
            return;
        }
        match self.last_reset_local_day {
            Some(day) if day == today_local => {}
            _ => self.reset(today_local),
        }
    }

    pub fn total_kwh(&self) -> f64 {
        self.total_kwh
    }

    pub fn last_reset_local_day(&self) -> Option<NaiveDate> {
        self.last_reset_local_day
    }
}

/// Owns every registered integrator; the coordinator calls
/// [`IntegrationEngine::update_all`] once per tick, after snapshot
/// assembly, passing the freshly-computed power samples per sensor key.
#[derive(Default)]
pub struct IntegrationEngine {
    integrators: Vec<IntegratorState>,
}

impl IntegrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, integrator: IntegratorState) {
        self.integrators.push(integrator);
    }

    pub fn integrators(&self) -> &[IntegratorState] {
        &self.integrators
    }

    /// At local midnight, a timer fires and resets every
    /// `DailyLocalMidnight` integrator.
    pub fn reset_daily(&mut self, local_day: chrono::NaiveDate) {
        for integrator in &mut self.integrators {
            if integrator.reset_policy == ResetPolicy::DailyLocalMidnight {
                integrator.reset(local_day);
            }
        }
    }

    /// Runs missed-reset recovery (§4.8) on every integrator at startup:
    /// if the restored `last_reset_local_day` is not today, a reset is
    /// synthesized before the first sample.
    pub fn synthesize_missed_resets(&mut self, today_local: chrono::NaiveDate) {
        for integrator in &mut self.integrators {
            integrator.synthesize_missed_reset_if_needed(today_local);
        }
    }

    /// Updates every integrator from `samples` (sensor key -> kW, or
    /// `None` if unavailable this tick). The Integration Engine never
    /// surfaces errors outward; on bad input it skips the step silently
    /// (logging happens inside `update`/`restore`, not here).
    pub fn update_all(
        &mut self,
        samples: impl Fn(&str) -> Option<f64>,
        t_new: DateTime<Utc>,
    ) -> Vec<(String, Option<f64>)> {
        self.integrators
            .iter_mut()
            .map(|integrator| {
                let v = samples(&integrator.source_sensor_key);
                let emitted = integrator.update(v, t_new);
                (integrator.source_sensor_key.clone(), emitted)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn integrator(reset_policy: ResetPolicy) -> IntegratorState {
        IntegratorState::new("pv", reset_policy, 6, DEFAULT_MAX_GAP)
    }

    #[test]
    fn e3_integration_across_two_ticks() {
        let mut i = integrator(ResetPolicy::Never);
        assert_eq!(i.update(Some(2.0), at(0)), Some(0.0)); // bootstrap
        let total = i.update(Some(4.0), at(30)).unwrap();
        assert!((total - 0.025).abs() < 1e-9);
    }

    #[test]
    fn e4_midnight_reset_then_constant_source() {
        let mut i = integrator(ResetPolicy::DailyLocalMidnight);
        i.total_kwh = 12.5;
        i.last_sample_value = Some(6000.0);
        i.last_sample_time = Some(at(86399));
        i.reset(chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(i.total_kwh, 0.0);
        let total = i.update(Some(6.0), at(86400 + 30)).unwrap();
        assert!((total - 0.05).abs() < 1e-9);
    }

    #[test]
    fn total_kwh_is_monotonic_between_resets() {
        let mut i = integrator(ResetPolicy::Never);
        i.update(Some(1.0), at(0));
        let mut prev = i.total_kwh();
        for t in (10..100).step_by(10) {
            i.update(Some(1.0 + t as f64 / 100.0), at(t));
            assert!(i.total_kwh() >= prev);
            prev = i.total_kwh();
        }
    }

    #[test]
    fn restore_clears_last_sample_and_bootstraps_next_tick() {
        let mut i = integrator(ResetPolicy::Never);
        i.restore(5.0, None, at(1000));
        assert_eq!(i.total_kwh(), 5.0);
        assert!(i.last_sample_value.is_none());
        // next update bootstraps again rather than integrating a huge gap
        let emitted = i.update(Some(2.0), at(1001)).unwrap();
        assert_eq!(emitted, 5.0);
    }

    #[test]
    fn restore_carries_over_last_reset_local_day() {
        let mut i = integrator(ResetPolicy::DailyLocalMidnight);
        let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        i.restore(1.0, Some(day), at(1000));
        assert_eq!(i.last_reset_local_day(), Some(day));
    }

    #[test]
    fn malformed_persisted_value_resets_to_zero() {
        let mut i = integrator(ResetPolicy::Never);
        i.restore(-3.0, None, at(0));
        assert_eq!(i.total_kwh(), 0.0);
        i.restore(f64::NAN, None, at(0));
        assert_eq!(i.total_kwh(), 0.0);
    }

    #[test]
    fn non_positive_delta_t_only_updates_sample() {
        let mut i = integrator(ResetPolicy::Never);
        i.update(Some(1.0), at(10));
        let before = i.total_kwh();
        i.update(Some(5.0), at(10));
        assert_eq!(i.total_kwh(), before);
    }

    #[test]
    fn gap_beyond_max_gap_rebootstraps_instead_of_integrating() {
        let mut i = IntegratorState::new("pv", ResetPolicy::Never, 6, Duration::from_secs(60));
        i.update(Some(1.0), at(0));
        let emitted = i.update(Some(1.0), at(61)).unwrap();
        // re-bootstrap: total_kwh unchanged, no area added across the gap
        assert_eq!(emitted, 0.0);
    }

    #[test]
    fn missed_reset_is_synthesized_for_a_stale_last_reset_day() {
        let mut engine = IntegrationEngine::new();
        let mut i = integrator(ResetPolicy::DailyLocalMidnight);
        i.total_kwh = 3.0;
        i.restore(3.0, Some(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()), at(0));
        engine.register(i);

        engine.synthesize_missed_resets(chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(engine.integrators()[0].total_kwh(), 0.0);
    }
}
