mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{harness, t0};
use pump_core::mocks::StoreMode;
use pump_core::{DoseKind, PumpManagerError, StoreError};
use pump_traits::PodStatus;

#[test]
fn failed_store_keeps_backlog_until_next_success() {
    let h = harness();
    h.store.set_mode(StoreMode::Fail);
    let p = h.manager.enact_bolus(1.0, h.manager.now());
    h.pod.respond_ok();
    let bolus = p.wait().unwrap();

    h.clock.advance_secs(60);
    h.manager.finalize_and_store();
    let state = h.manager.state();
    assert!(state.unfinalized_bolus.is_none());
    assert_eq!(state.finalized_doses, vec![bolus.clone()]);
    assert!(
        h.delegate
            .errors()
            .iter()
            .all(|e| matches!(e, PumpManagerError::PersistenceFailure(_)))
    );
    assert!(!h.delegate.errors().is_empty());

    h.store.set_mode(StoreMode::Ack);
    h.manager.finalize_and_store();
    assert!(h.manager.state().finalized_doses.is_empty());
    assert_eq!(h.store.last_call().unwrap().doses, vec![bolus]);
}

#[test]
fn acknowledgement_trims_only_its_snapshot() {
    let h = harness();
    h.store.set_mode(StoreMode::Hold);
    let p = h.manager.enact_bolus(2.0, h.manager.now());
    h.pod.respond_ok();
    p.wait().unwrap();
    assert_eq!(h.store.held_count(), 1);

    h.clock.advance_secs(40);
    let c = h.manager.cancel_bolus();
    h.pod.respond_next(Ok(PodStatus {
        bolus_units_remaining: Some(1.0),
        ..h.pod.status()
    }));
    let canceled = c.wait().unwrap().unwrap();
    assert_eq!(h.store.held_count(), 2);
    assert_eq!(h.manager.state().finalized_doses, vec![canceled.clone()]);

    // The first snapshot carried the in-flight copy, not the canceled one.
    assert!(h.store.complete_next(Ok(())));
    assert_eq!(h.manager.state().finalized_doses, vec![canceled]);

    assert!(h.store.complete_next(Ok(())));
    assert!(h.manager.state().finalized_doses.is_empty());
    assert!(!h.store.complete_next(Ok(())));
}

#[test]
fn held_failure_reports_persistence_error() {
    let h = harness();
    h.store.set_mode(StoreMode::Hold);
    let p = h.manager.enact_bolus(1.0, h.manager.now());
    h.pod.respond_ok();
    p.wait().unwrap();
    h.clock.advance_secs(60);
    h.manager.finalize_and_store();

    h.store
        .complete_next(Err(StoreError::Unavailable("disk full".into())));
    h.store
        .complete_next(Err(StoreError::Unavailable("disk full".into())));
    assert_eq!(h.manager.state().finalized_doses.len(), 1);
    assert_eq!(h.delegate.errors().len(), 2);
}

#[test]
fn last_reconciliation_is_last_status_date() {
    let h = harness();
    h.clock.advance_secs(30);
    h.manager.finalize_and_store();
    assert_eq!(h.store.last_call().unwrap().last_reconciliation, t0());
}

#[test]
fn every_dose_reaches_the_store_and_backlog_drains() {
    let h = harness();
    let b = h.manager.enact_bolus(0.5, h.manager.now());
    h.pod.respond_ok();
    b.wait().unwrap();
    h.clock.advance_secs(30);

    let t = h.manager.enact_temp_basal(0.8, Duration::from_secs(1800));
    h.pod.respond_ok();
    h.pod.respond_ok();
    t.wait().unwrap();
    h.clock.advance_secs(600);

    let s = h.manager.suspend_delivery();
    h.pod.respond_ok();
    s.wait().unwrap();
    h.clock.advance_secs(600);

    let r = h.manager.resume_delivery();
    h.pod.respond_ok();
    r.wait().unwrap();
    h.clock.advance_secs(3600);
    h.manager.finalize_and_store();

    let stored = h.store.upserted();
    let ids: HashSet<_> = stored.iter().map(|d| d.sync_identifier()).collect();
    assert_eq!(ids.len(), stored.len());
    let kinds: Vec<_> = stored.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DoseKind::Bolus,
            DoseKind::TempBasal,
            DoseKind::Suspend,
            DoseKind::Resume
        ]
    );
    assert!(stored[..3].iter().all(|d| d.end_time.is_some()));
    // 16 pulses/hr for 10 minutes before the suspend
    assert_eq!(stored[1].delivered_pulses, Some(2));

    let state = h.manager.state();
    assert!(state.finalized_doses.is_empty());
    assert!(state.unfinalized_resume.is_some());
}
