//! Bridges from `pump_config` file schemas to runtime types.

use chrono::TimeDelta;

use crate::config::{FreshnessCfg, PodLimits};
use crate::error::PumpResult;
use crate::fixed_point::units_to_pulses_floor;
use crate::schedule::BasalSchedule;

impl From<&pump_config::PodCfg> for PodLimits {
    fn from(c: &pump_config::PodCfg) -> Self {
        Self {
            bolus_delivery_rate_u_per_s: c.bolus_delivery_rate_u_per_s,
            max_bolus_pulses: units_to_pulses_floor(c.max_bolus_u),
            max_basal_pulses_per_hour: units_to_pulses_floor(c.max_basal_rate_u_per_hr),
            max_temp_basal: TimeDelta::hours(i64::from(c.max_temp_basal_hours)),
            reservoir_capacity_u: c.reservoir_capacity_u,
            pod_lifetime: TimeDelta::hours(i64::from(c.lifetime_hours)),
        }
    }
}

impl From<&pump_config::FreshnessCfg> for FreshnessCfg {
    fn from(c: &pump_config::FreshnessCfg) -> Self {
        Self {
            status_age_tolerance: TimeDelta::seconds(
                i64::try_from(c.status_age_tolerance_s).unwrap_or(i64::MAX / 1000),
            ),
        }
    }
}

/// Schedule rows as `(start_minutes, units_per_hour)` pairs.
pub fn schedule_pairs(rows: &[pump_config::BasalRow]) -> Vec<(u32, f64)> {
    rows.iter()
        .map(|r| (r.start_minutes, r.units_per_hour))
        .collect()
}

pub fn basal_schedule_from_rows(
    rows: &[pump_config::BasalRow],
    limits: &PodLimits,
) -> PumpResult<BasalSchedule> {
    BasalSchedule::new(&schedule_pairs(rows), limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_maps_to_default_limits() {
        let cfg = pump_config::Config::default();
        assert_eq!(PodLimits::from(&cfg.pod), PodLimits::default());
        assert_eq!(FreshnessCfg::from(&cfg.freshness), FreshnessCfg::default());
    }

    #[test]
    fn rows_become_schedule() {
        let rows = [
            pump_config::BasalRow {
                start_minutes: 0,
                units_per_hour: 0.8,
            },
            pump_config::BasalRow {
                start_minutes: 360,
                units_per_hour: 1.25,
            },
        ];
        let s = basal_schedule_from_rows(&rows, &PodLimits::default()).unwrap();
        assert_eq!(s.rate_at(400), 25);
    }
}
