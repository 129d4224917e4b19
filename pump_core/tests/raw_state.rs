mod common;

use chrono::TimeDelta;
use common::{harness, harness_with, initial_state, t0};
use pump_core::mocks::{ManualPod, RecordingStore, active_pod_status};
use pump_core::{
    Certainty, DoseRecord, PumpManager, PumpState, RawState, ReservoirLevel, StateCodecError,
    SuspendState, Transition,
};
use pump_traits::{ConnectionState, ManualClock};
use serde_json::Value;

fn busy_state() -> PumpState {
    let mut s = initial_state();
    s.suspend_state = SuspendState::Resumed(t0() - TimeDelta::hours(2));
    s.active_transition = Some(Transition::CancelingBolus);
    s.unfinalized_bolus = Some(DoseRecord::bolus(
        t0(),
        40,
        TimeDelta::seconds(80),
        Certainty::Certain,
    ));
    s.unfinalized_temp_basal = Some(DoseRecord::temp_basal(
        t0() - TimeDelta::minutes(10),
        27,
        TimeDelta::minutes(30),
        Certainty::Uncertain,
    ));
    s.unfinalized_resume = Some(DoseRecord::resume(
        t0() - TimeDelta::hours(2),
        Certainty::Certain,
    ));
    let mut old = DoseRecord::bolus(
        t0() - TimeDelta::hours(3),
        13,
        TimeDelta::seconds(26),
        Certainty::Certain,
    );
    old.cancel(t0() - TimeDelta::hours(3) + TimeDelta::seconds(10), None);
    s.finalized_doses = vec![old];
    s.reservoir_level = Some(ReservoirLevel::AboveThreshold);
    s.connection_state = ConnectionState::Connected;
    s.utc_offset_secs = -5 * 3600;
    s
}

#[test]
fn raw_state_round_trips_through_json_text() {
    let state = busy_state();
    let raw = state.to_raw_state().unwrap();
    assert_eq!(raw.get("version"), Some(&Value::from(1)));

    let text = serde_json::to_string(&raw).unwrap();
    let back: RawState = serde_json::from_str(&text).unwrap();
    assert_eq!(PumpState::from_raw_state(&back).unwrap(), state);
}

#[test]
fn missing_version_is_rejected() {
    let mut raw = busy_state().to_raw_state().unwrap();
    raw.remove("version");
    assert_eq!(
        PumpState::from_raw_state(&raw),
        Err(StateCodecError::MissingVersion)
    );
}

#[test]
fn future_version_is_rejected() {
    let mut raw = busy_state().to_raw_state().unwrap();
    raw.insert("version".into(), Value::from(2));
    assert_eq!(
        PumpState::from_raw_state(&raw),
        Err(StateCodecError::UnsupportedVersion(2))
    );
}

#[test]
fn malformed_fields_are_rejected() {
    let mut raw = busy_state().to_raw_state().unwrap();
    raw.insert("version".into(), Value::from("1"));
    assert!(matches!(
        PumpState::from_raw_state(&raw),
        Err(StateCodecError::Malformed(_))
    ));

    let mut raw = busy_state().to_raw_state().unwrap();
    raw.insert("suspend_state".into(), Value::from(17));
    assert!(matches!(
        PumpState::from_raw_state(&raw),
        Err(StateCodecError::Malformed(_))
    ));
}

#[test]
fn restored_manager_drops_stale_transition() {
    let raw = busy_state().to_raw_state().unwrap();
    let manager = PumpManager::builder()
        .with_comm(ManualPod::new(active_pod_status(t0())))
        .with_store(RecordingStore::default())
        .with_raw_state(&raw)
        .unwrap()
        .with_clock(ManualClock::new(t0()))
        .build()
        .unwrap();
    let state = manager.state();
    assert!(state.active_transition.is_none());
    assert_eq!(state.unfinalized_bolus, busy_state().unfinalized_bolus);
    assert_eq!(state.finalized_doses.len(), 1);
}

#[test]
fn manager_raw_state_reflects_committed_operations() {
    let h = harness();
    let p = h.manager.enact_bolus(1.0, h.manager.now());
    h.pod.respond_ok();
    p.wait().unwrap();

    let raw = h.manager.raw_state().unwrap();
    let restored = harness_with(PumpState::from_raw_state(&raw).unwrap());
    assert_eq!(restored.manager.state(), h.manager.state());
}
