use chrono::{DateTime, TimeDelta, Utc};
use pump_core::fixed_point::pulses_to_units;
use pump_core::ledger::{acknowledge, finalize};
use pump_core::{BasalSchedule, Certainty, DoseRecord, PodLimits, PumpState};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000)
}

prop_compose! {
    // A bolus or temp basal started up to two hours before t0.
    fn dose_strategy()(
        is_bolus in any::<bool>(),
        pulses in 1u32..600,
        started_secs_ago in 0i64..7_200,
        duration_secs in 1i64..7_200,
        canceled_after in proptest::option::of(0i64..7_200),
    ) -> DoseRecord {
        let start = t0() - TimeDelta::seconds(started_secs_ago);
        let mut d = if is_bolus {
            DoseRecord::bolus(start, pulses, TimeDelta::seconds(duration_secs), Certainty::Certain)
        } else {
            DoseRecord::temp_basal(start, pulses, TimeDelta::seconds(duration_secs), Certainty::Certain)
        };
        if let Some(after) = canceled_after {
            d.cancel(start + TimeDelta::seconds(after), None);
        }
        d
    }
}

prop_compose! {
    fn state_strategy()(
        bolus in proptest::option::of(dose_strategy()),
        temp in proptest::option::of(dose_strategy()),
        backlog in proptest::collection::vec(dose_strategy(), 0..5),
        suspended in any::<bool>(),
    ) -> PumpState {
        let schedule = BasalSchedule::new(&[(0, 1.0)], &PodLimits::default()).unwrap();
        let mut s = PumpState::new(schedule, 0, t0() - TimeDelta::hours(3));
        s.pod_activated_at = Some(t0() - TimeDelta::hours(4));
        s.unfinalized_bolus = bolus;
        s.unfinalized_temp_basal = temp;
        s.finalized_doses = backlog;
        if suspended {
            s.unfinalized_suspend = Some(DoseRecord::suspend(t0() - TimeDelta::minutes(5), Certainty::Certain));
        }
        s
    }
}

proptest! {
    #[test]
    fn bolus_rounding_never_rounds_up(units in 0.05f64..30.0) {
        let pulses = PodLimits::default().round_bolus(units).unwrap();
        let rounded = pulses_to_units(pulses);
        prop_assert!(rounded <= units, "{} U rounded up to {} U", units, rounded);
        prop_assert!(units - rounded < 0.05 + 1e-9);
    }

    #[test]
    fn basal_rate_rounding_never_rounds_up(rate in 0.0f64..30.0) {
        let pph = PodLimits::default().round_basal_rate(rate).unwrap();
        prop_assert!(pulses_to_units(pph) <= rate);
    }

    #[test]
    fn canceled_delivery_never_exceeds_programmed(
        dose in dose_strategy(),
        cancel_after in 0i64..10_000,
        remaining in proptest::option::of(0u32..1_000),
    ) {
        let mut d = dose.clone();
        d.cancel(d.start_time + TimeDelta::seconds(cancel_after), remaining);
        prop_assert!(d.end_time.is_some());
        if dose.kind == pump_core::DoseKind::Bolus {
            prop_assert!(d.delivered_pulses.unwrap_or(d.programmed_pulses) <= d.programmed_pulses);
        }
        prop_assert!(d.end_time >= Some(d.start_time));
    }

    #[test]
    fn finalize_is_idempotent(state in state_strategy(), later_secs in 0i64..7_200) {
        let now = t0() + TimeDelta::seconds(later_secs);
        let mut once = state.clone();
        let first = finalize(&mut once, now);
        let mut twice = once.clone();
        let second = finalize(&mut twice, now);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn acknowledge_removes_only_snapshot_members(state in state_strategy(), extra in dose_strategy()) {
        let mut s = state;
        let snapshot = finalize(&mut s, t0());
        s.finalized_doses.push(extra.clone());
        acknowledge(&mut s, &snapshot);
        let kept = !snapshot.contains(&extra);
        prop_assert_eq!(s.finalized_doses.contains(&extra), kept);
        prop_assert!(s.finalized_doses.iter().all(|d| !snapshot.contains(d)));
    }
}
