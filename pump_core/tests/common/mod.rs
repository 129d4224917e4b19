#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use pump_core::mocks::{ManualPod, RecordingStore, StoreMode, active_pod_status};
use pump_core::{
    BasalSchedule, InlineDispatcher, PodLimits, PodStatusObserver, PumpManager,
    PumpManagerDelegate, PumpManagerError, PumpManagerStatus, PumpState, PumpStatusObserver,
};
use pump_traits::ManualClock;

pub fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000)
}

pub fn activated_at() -> DateTime<Utc> {
    t0() - TimeDelta::hours(1)
}

#[derive(Debug, Clone, PartialEq)]
pub enum DelegateEvent {
    State,
    Status(PumpManagerStatus, PumpManagerStatus),
    RecommendsLoop,
    Error(PumpManagerError),
}

#[derive(Default)]
pub struct RecordingDelegate {
    pub events: Mutex<Vec<DelegateEvent>>,
    pub states: Mutex<Vec<PumpState>>,
}

impl RecordingDelegate {
    pub fn events(&self) -> Vec<DelegateEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.states.lock().unwrap().clear();
    }

    pub fn errors(&self) -> Vec<PumpManagerError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DelegateEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &DelegateEvent) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }
}

impl PumpManagerDelegate for RecordingDelegate {
    fn did_update_state(&self, state: &PumpState) {
        self.events.lock().unwrap().push(DelegateEvent::State);
        self.states.lock().unwrap().push(state.clone());
    }

    fn did_update_status(&self, new: &PumpManagerStatus, old: &PumpManagerStatus) {
        self.events
            .lock()
            .unwrap()
            .push(DelegateEvent::Status(new.clone(), old.clone()));
    }

    fn recommends_loop(&self) {
        self.events.lock().unwrap().push(DelegateEvent::RecommendsLoop);
    }

    fn did_error(&self, error: &PumpManagerError) {
        self.events
            .lock()
            .unwrap()
            .push(DelegateEvent::Error(error.clone()));
    }
}

#[derive(Default)]
pub struct StatusLog(pub Mutex<Vec<PumpManagerStatus>>);

impl PumpStatusObserver for StatusLog {
    fn did_update_status(&self, new: &PumpManagerStatus, _old: &PumpManagerStatus) {
        self.0.lock().unwrap().push(new.clone());
    }
}

#[derive(Default)]
pub struct PodLog(pub Mutex<Vec<PumpState>>);

impl PodStatusObserver for PodLog {
    fn did_update_pod_status(&self, state: &PumpState) {
        self.0.lock().unwrap().push(state.clone());
    }
}

pub struct Harness {
    pub pod: Arc<ManualPod>,
    pub store: Arc<RecordingStore>,
    pub clock: ManualClock,
    pub delegate: Arc<RecordingDelegate>,
    pub manager: PumpManager,
}

pub fn initial_state() -> PumpState {
    let schedule = BasalSchedule::new(&[(0, 1.0)], &PodLimits::default()).unwrap();
    let mut state = PumpState::new(schedule, 0, activated_at());
    state.pod_activated_at = Some(activated_at());
    state.last_status_date = Some(t0());
    state
}

pub fn harness() -> Harness {
    harness_with(initial_state())
}

pub fn harness_with(state: PumpState) -> Harness {
    let pod = Arc::new(ManualPod::new(active_pod_status(activated_at())));
    let store = Arc::new(RecordingStore::new(StoreMode::Ack));
    let clock = ManualClock::new(t0());
    let delegate = Arc::new(RecordingDelegate::default());
    let manager = PumpManager::builder()
        .with_comm(pod.clone())
        .with_store(store.clone())
        .with_state(state)
        .with_clock(clock.clone())
        .with_delegate(delegate.clone(), Arc::new(InlineDispatcher))
        .build()
        .expect("build manager");
    Harness {
        pod,
        store,
        clock,
        delegate,
        manager,
    }
}
