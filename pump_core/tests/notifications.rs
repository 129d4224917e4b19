mod common;

use std::sync::Arc;

use common::{DelegateEvent, PodLog, StatusLog, harness};
use pump_core::{BolusState, InlineDispatcher, QueueDispatcher};
use pump_traits::ConnectionState;

#[test]
fn delegate_sees_status_before_state_for_each_commit() {
    let h = harness();
    let p = h.manager.enact_bolus(1.0, h.manager.now());
    h.pod.respond_ok();
    p.wait().unwrap();

    let events = h.delegate.events();
    assert_eq!(events.len(), 4, "{events:?}");
    match (&events[0], &events[2]) {
        (DelegateEvent::Status(a, a_old), DelegateEvent::Status(b, b_old)) => {
            assert_eq!(a_old.bolus_state, BolusState::None);
            assert_eq!(a.bolus_state, BolusState::Initiating);
            assert_eq!(b_old.bolus_state, BolusState::Initiating);
            assert!(matches!(b.bolus_state, BolusState::InProgress(_)));
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert_eq!(events[1], DelegateEvent::State);
    assert_eq!(events[3], DelegateEvent::State);

    let states = h.delegate.states.lock().unwrap().clone();
    assert_eq!(states.last().unwrap(), &h.manager.state());
}

#[test]
fn unchanged_state_notifies_nobody() {
    let h = harness();
    h.manager
        .on_connection_state_changed(ConnectionState::Disconnected);
    assert!(h.delegate.events().is_empty());

    h.manager.on_connection_state_changed(ConnectionState::Connected);
    assert_eq!(h.delegate.events(), vec![DelegateEvent::State]);
}

#[test]
fn removed_observers_stop_receiving() {
    let h = harness();
    let statuses = Arc::new(StatusLog::default());
    let pods = Arc::new(PodLog::default());
    let sh = h
        .manager
        .add_status_observer(statuses.clone(), Arc::new(InlineDispatcher));
    let ph = h
        .manager
        .add_pod_status_observer(pods.clone(), Arc::new(InlineDispatcher));

    h.manager.on_connection_state_changed(ConnectionState::Connected);
    assert_eq!(pods.0.lock().unwrap().len(), 1);
    assert!(statuses.0.lock().unwrap().is_empty(), "status did not change");

    assert!(h.manager.remove_status_observer(sh));
    assert!(h.manager.remove_pod_status_observer(ph));
    assert!(!h.manager.remove_pod_status_observer(ph));

    let p = h.manager.enact_bolus(1.0, h.manager.now());
    h.pod.respond_ok();
    p.wait().unwrap();
    assert_eq!(pods.0.lock().unwrap().len(), 1);
    assert!(statuses.0.lock().unwrap().is_empty());
}

#[test]
fn queued_observer_sees_statuses_in_commit_order() {
    let h = harness();
    let queue = Arc::new(QueueDispatcher::spawn("status-observer").unwrap());
    let statuses = Arc::new(StatusLog::default());
    h.manager.add_status_observer(statuses.clone(), queue.clone());

    let p = h.manager.enact_bolus(1.0, h.manager.now());
    h.pod.respond_ok();
    p.wait().unwrap();
    let c = h.manager.cancel_bolus();
    h.pod.respond_ok();
    c.wait().unwrap();
    queue.flush();

    let seen: Vec<_> = statuses
        .0
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.bolus_state.clone())
        .collect();
    assert_eq!(seen.len(), 4, "{seen:?}");
    assert_eq!(seen[0], BolusState::Initiating);
    assert!(matches!(seen[1], BolusState::InProgress(_)));
    assert_eq!(seen[2], BolusState::Canceling);
    assert_eq!(seen[3], BolusState::None);
}

#[test]
fn cleared_delegate_is_not_called() {
    let h = harness();
    h.manager.clear_delegate();
    h.manager.on_connection_state_changed(ConnectionState::Connected);
    assert!(h.delegate.events().is_empty());
}
