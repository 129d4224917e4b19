//! Delivery progress estimation for running doses.

use chrono::{DateTime, TimeDelta, Utc};

use crate::dose::{DoseKind, DoseRecord};
use crate::fixed_point::{proportional_pulses, pulses_for_elapsed, pulses_to_units};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoseProgress {
    /// Units delivered so far, rounded down to whole pulses.
    pub delivered_units: f64,
    /// Share of the programmed duration elapsed, in `[0, 1]`.
    pub percent_complete: f64,
}

impl DoseProgress {
    pub fn is_complete(&self) -> bool {
        self.percent_complete >= 1.0
    }
}

/// When the next pulse is expected and how often pulses follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTimer {
    pub delay: TimeDelta,
    pub interval: TimeDelta,
}

/// Progress of a bolus or rate dose at `now`. Suspend and resume have no progress.
pub fn estimate(dose: &DoseRecord, now: DateTime<Utc>) -> Option<DoseProgress> {
    let duration = dose.duration()?;
    if matches!(dose.kind, DoseKind::Suspend | DoseKind::Resume) {
        return None;
    }
    if let Some(delivered) = dose.delivered_pulses {
        return Some(DoseProgress {
            delivered_units: pulses_to_units(delivered),
            percent_complete: 1.0,
        });
    }
    let elapsed = (now - dose.start_time).clamp(TimeDelta::zero(), duration);
    let dur_ms = duration.num_milliseconds();
    let percent_complete = if dur_ms <= 0 {
        1.0
    } else {
        (elapsed.num_milliseconds() as f64 / dur_ms as f64).min(1.0)
    };
    let pulses = match dose.kind {
        DoseKind::Bolus => proportional_pulses(dose.programmed_pulses, elapsed, duration, false),
        _ => pulses_for_elapsed(dose.programmed_pulses, elapsed),
    };
    Some(DoseProgress {
        delivered_units: pulses_to_units(pulses),
        percent_complete,
    })
}

pub fn pulse_timer(dose: &DoseRecord, now: DateTime<Utc>) -> Option<PulseTimer> {
    if dose.programmed_pulses == 0 {
        return None;
    }
    let interval_ms = match dose.kind {
        DoseKind::Bolus => dose.duration()?.num_milliseconds() / i64::from(dose.programmed_pulses),
        DoseKind::TempBasal | DoseKind::Basal => 3_600_000 / i64::from(dose.programmed_pulses),
        DoseKind::Suspend | DoseKind::Resume => return None,
    };
    if interval_ms <= 0 {
        return None;
    }
    let elapsed_ms = (now - dose.start_time).num_milliseconds().max(0);
    Some(PulseTimer {
        delay: TimeDelta::milliseconds(interval_ms - elapsed_ms % interval_ms),
        interval: TimeDelta::milliseconds(interval_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dose::Certainty;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000)
    }

    #[test]
    fn bolus_progress_rounds_down_to_pulses() {
        let b = DoseRecord::bolus(t0(), 40, TimeDelta::seconds(80), Certainty::Certain);
        let p = estimate(&b, t0() + TimeDelta::seconds(41)).unwrap();
        assert!((p.delivered_units - 1.0).abs() < 1e-12);
        assert!((p.percent_complete - 41.0 / 80.0).abs() < 1e-12);
        let done = estimate(&b, t0() + TimeDelta::seconds(500)).unwrap();
        assert!(done.is_complete());
        assert!((done.delivered_units - 2.0).abs() < 1e-12);
    }

    #[test]
    fn canceled_dose_reports_delivered() {
        let mut b = DoseRecord::bolus(t0(), 40, TimeDelta::seconds(80), Certainty::Certain);
        b.cancel(t0() + TimeDelta::seconds(10), Some(35));
        let p = estimate(&b, t0() + TimeDelta::seconds(20)).unwrap();
        assert!((p.delivered_units - 0.25).abs() < 1e-12);
        assert!(p.is_complete());
    }

    #[test]
    fn markers_have_no_progress() {
        let s = DoseRecord::suspend(t0(), Certainty::Certain);
        assert!(estimate(&s, t0()).is_none());
        assert!(pulse_timer(&s, t0()).is_none());
    }

    #[test]
    fn bolus_pulses_every_two_seconds() {
        let b = DoseRecord::bolus(t0(), 40, TimeDelta::seconds(80), Certainty::Certain);
        let timer = pulse_timer(&b, t0() + TimeDelta::milliseconds(4_500)).unwrap();
        assert_eq!(timer.interval, TimeDelta::seconds(2));
        assert_eq!(timer.delay, TimeDelta::milliseconds(1_500));
    }

    #[test]
    fn temp_basal_interval_follows_rate() {
        // 1 U/hr: one pulse every 3 minutes
        let t = DoseRecord::temp_basal(t0(), 20, TimeDelta::minutes(30), Certainty::Certain);
        let timer = pulse_timer(&t, t0()).unwrap();
        assert_eq!(timer.interval, TimeDelta::minutes(3));
        let p = estimate(&t, t0() + TimeDelta::minutes(10)).unwrap();
        assert!((p.delivered_units - 0.15).abs() < 1e-12);
    }
}
