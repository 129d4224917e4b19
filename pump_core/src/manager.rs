//! The pump manager: owns the state and sequences every pod operation.
//!
//! All state changes pass through [`PumpManager::mutate_state`], which
//! applies one read-modify-write under the state lock and then fans out
//! notifications in commit order. Operations admit themselves through a
//! transition tag, issue one command to the pod façade and commit when the
//! façade calls back; the caller gets a [`Pending`] that resolves with the
//! committed outcome.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use pump_traits::{
    Clock, CommError, CommResult, ConnectionState, PodComm, PodStatus, ProgramType,
    StopProgramType,
};

use crate::builder::{Missing, PumpManagerBuilder};
use crate::config::{FreshnessCfg, PodLimits};
use crate::dose::{Certainty, DoseRecord};
use crate::error::{PumpManagerError, PumpResult, StateCodecError};
use crate::ledger;
use crate::observer::{
    DelegateSlot, Dispatcher, ObserverHandle, ObserverRegistry, PodStatusObserver,
    PumpManagerDelegate, PumpStatusObserver,
};
use crate::pending::{Pending, Resolver, guarded, pending};
use crate::progress::{self, DoseProgress, PulseTimer};
use crate::schedule::BasalSchedule;
use crate::state::{PumpState, RawState, Transition};
use crate::status::{BolusState, PumpManagerStatus, status_for};
use crate::store::DoseStore;
use crate::transition;

pub(crate) struct Shared {
    state: Mutex<PumpState>,
    /// Serializes mutations together with their notification fan-out.
    gate: Mutex<()>,
    comm: Arc<dyn PodComm>,
    store: Arc<dyn DoseStore>,
    clock: Arc<dyn Clock>,
    limits: PodLimits,
    freshness: FreshnessCfg,
    delegate: DelegateSlot,
    status_observers: ObserverRegistry<dyn PumpStatusObserver>,
    pod_observers: ObserverRegistry<dyn PodStatusObserver>,
}

/// Handle to the engine. Clones share the same state.
#[derive(Clone)]
pub struct PumpManager {
    shared: Arc<Shared>,
}

impl PumpManager {
    pub fn builder() -> PumpManagerBuilder<Missing, Missing, Missing> {
        PumpManagerBuilder::default()
    }

    pub(crate) fn from_parts(
        state: PumpState,
        comm: Arc<dyn PodComm>,
        store: Arc<dyn DoseStore>,
        clock: Arc<dyn Clock>,
        limits: PodLimits,
        freshness: FreshnessCfg,
        delegate: DelegateSlot,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                gate: Mutex::new(()),
                comm,
                store,
                clock,
                limits,
                freshness,
                delegate,
                status_observers: ObserverRegistry::new(),
                pod_observers: ObserverRegistry::new(),
            }),
        }
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    fn lock_state(&self) -> MutexGuard<'_, PumpState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state.
    pub fn state(&self) -> PumpState {
        self.lock_state().clone()
    }

    pub fn status(&self) -> PumpManagerStatus {
        status_for(&self.lock_state(), self.now())
    }

    pub fn raw_state(&self) -> Result<RawState, StateCodecError> {
        self.lock_state().to_raw_state()
    }

    pub fn limits(&self) -> &PodLimits {
        &self.shared.limits
    }

    pub fn pod_expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state()
            .pod_expires_at(self.shared.limits.pod_lifetime)
    }

    pub fn is_pump_data_stale(&self) -> bool {
        self.is_stale(&self.lock_state(), self.now())
    }

    fn is_stale(&self, state: &PumpState, now: DateTime<Utc>) -> bool {
        state
            .status_age(now)
            .is_none_or(|age| age > self.shared.freshness.status_age_tolerance)
    }

    /// Progress of the running bolus, if any.
    pub fn bolus_progress(&self) -> Option<(DoseProgress, Option<PulseTimer>)> {
        let now = self.now();
        match status_for(&self.lock_state(), now).bolus_state {
            BolusState::InProgress(dose) => {
                progress::estimate(&dose, now).map(|p| (p, progress::pulse_timer(&dose, now)))
            }
            BolusState::None | BolusState::Initiating | BolusState::Canceling => None,
        }
    }

    // ── Observers ────────────────────────────────────────────────────────────

    pub fn add_status_observer(
        &self,
        observer: Arc<dyn PumpStatusObserver>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> ObserverHandle {
        self.shared.status_observers.insert(observer, dispatcher)
    }

    pub fn remove_status_observer(&self, handle: ObserverHandle) -> bool {
        self.shared.status_observers.remove(handle)
    }

    pub fn add_pod_status_observer(
        &self,
        observer: Arc<dyn PodStatusObserver>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> ObserverHandle {
        self.shared.pod_observers.insert(observer, dispatcher)
    }

    pub fn remove_pod_status_observer(&self, handle: ObserverHandle) -> bool {
        self.shared.pod_observers.remove(handle)
    }

    pub fn set_delegate(
        &self,
        delegate: Arc<dyn PumpManagerDelegate>,
        dispatcher: Arc<dyn Dispatcher>,
    ) {
        self.shared.delegate.set(delegate, dispatcher);
    }

    pub fn clear_delegate(&self) {
        self.shared.delegate.clear();
    }

    // ── Mutation gateway ─────────────────────────────────────────────────────

    /// Apply `f` to the state atomically, then notify in commit order.
    ///
    /// Observers dispatched inline run before this returns and must not start
    /// another operation.
    pub(crate) fn mutate_state<R>(&self, f: impl FnOnce(&mut PumpState, DateTime<Utc>) -> R) -> R {
        let _gate = self
            .shared
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = self.now();
        let (old, new, out) = {
            let mut state = self.lock_state();
            let old = state.clone();
            let out = f(&mut state, now);
            (old, state.clone(), out)
        };
        if old != new {
            self.notify_changed(&old, new, now);
        }
        out
    }

    fn notify_changed(&self, old: &PumpState, new: PumpState, now: DateTime<Utc>) {
        tracing::debug!(transition = ?new.active_transition, "pump state updated");
        let old_status = status_for(old, now);
        let new_status = status_for(&new, now);
        let new = Arc::new(new);

        self.shared.pod_observers.notify(|o| {
            let s = Arc::clone(&new);
            Box::new(move || o.did_update_pod_status(&s))
        });

        if old_status != new_status {
            tracing::debug!(
                basal = ?new_status.basal_delivery_state,
                bolus = ?new_status.bolus_state,
                "pump status changed"
            );
            let pair = Arc::new((new_status, old_status));
            let p = Arc::clone(&pair);
            self.shared
                .delegate
                .notify(move |d| d.did_update_status(&p.0, &p.1));
            self.shared.status_observers.notify(|o| {
                let p = Arc::clone(&pair);
                Box::new(move || o.did_update_status(&p.0, &p.1))
            });
        }

        self.shared
            .delegate
            .notify(move |d| d.did_update_state(&new));
    }

    fn admit(&self, transition: Transition) -> PumpResult<()> {
        self.mutate_state(|s, now| transition::preflight(s, transition, now))
    }

    /// Record a failed command and return the error to surface.
    fn fail(
        &self,
        transition: Transition,
        error: CommError,
        provisional: Option<DoseRecord>,
    ) -> PumpManagerError {
        tracing::warn!(%transition, error = %error, uncertain = error.may_have_executed(), "pod command failed");
        self.mutate_state(|s, now| {
            transition::command_failed(s, transition, &error, provisional, now);
        });
        self.finalize_and_store();
        PumpManagerError::CommunicationFailure(error)
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    /// Finalize finished doses and hand the backlog plus in-flight records to the store.
    pub fn finalize_and_store(&self) {
        let (snapshot, last_status) =
            self.mutate_state(|s, now| (ledger::finalize(s, now), s.last_status_date));
        let last_reconciliation = last_status.unwrap_or_else(|| self.now());
        let stored = snapshot.clone();
        let this = self.clone();
        self.shared.store.store_doses(
            snapshot,
            last_reconciliation,
            Box::new(move |result| match result {
                Ok(()) => {
                    tracing::debug!(count = stored.len(), "dose records stored");
                    this.mutate_state(|s, _| ledger::acknowledge(s, &stored));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "storing dose records failed; keeping backlog");
                    let err = PumpManagerError::PersistenceFailure(e.to_string());
                    this.shared.delegate.notify(move |d| d.did_error(&err));
                }
            }),
        );
    }

    // ── Bolus ────────────────────────────────────────────────────────────────

    /// Deliver a bolus, rounded down to whole pulses.
    pub fn enact_bolus(&self, units: f64, start: DateTime<Utc>) -> Pending<DoseRecord> {
        let pulses = match self.shared.limits.round_bolus(units) {
            Ok(p) => p,
            Err(e) => return Pending::ready(Err(e)),
        };
        if let Err(e) = self.admit(Transition::StartingBolus) {
            return Pending::ready(Err(e));
        }
        let duration = self.shared.limits.bolus_duration(pulses);
        let dose = DoseRecord::bolus(start, pulses, duration, Certainty::Certain);
        tracing::info!(requested = units, units = dose.programmed_units(), "enacting bolus");

        let (resolver, pending) = pending();
        let this = self.clone();
        self.shared.comm.send_program(
            ProgramType::Bolus { pulses },
            guarded(move |result: CommResult<PodStatus>| match result {
                Ok(status) => {
                    let committed = dose.clone();
                    this.mutate_state(|s, now| transition::bolus_started(s, committed, &status, now));
                    this.finalize_and_store();
                    tracing::info!(dose = %dose, "bolus started");
                    resolver.resolve(Ok(dose));
                }
                Err(e) => resolver.resolve(Err(this.fail(Transition::StartingBolus, e, Some(dose)))),
            }),
        );
        pending
    }

    /// Stop the running bolus. Resolves with the canceled record, or `None` if nothing was running.
    pub fn cancel_bolus(&self) -> Pending<Option<DoseRecord>> {
        if let Err(e) = self.admit(Transition::CancelingBolus) {
            return Pending::ready(Err(e));
        }
        tracing::info!("canceling bolus");

        let (resolver, pending) = pending();
        let this = self.clone();
        self.shared.comm.stop_program(
            StopProgramType::Bolus,
            guarded(move |result: CommResult<PodStatus>| match result {
                Ok(status) => {
                    let canceled =
                        this.mutate_state(|s, now| transition::bolus_canceled(s, &status, now));
                    this.finalize_and_store();
                    if let Some(dose) = &canceled {
                        tracing::info!(dose = %dose, "bolus canceled");
                    }
                    resolver.resolve(Ok(canceled));
                }
                Err(e) => resolver.resolve(Err(this.fail(Transition::CancelingBolus, e, None))),
            }),
        );
        pending
    }

    // ── Temp basal ───────────────────────────────────────────────────────────

    /// Replace any running temp basal.
    ///
    /// The running temp basal is always canceled first. A zero `duration` only
    /// cancels and resolves with a zero-length record.
    pub fn enact_temp_basal(
        &self,
        units_per_hour: f64,
        duration: std::time::Duration,
    ) -> Pending<DoseRecord> {
        let limits = self.shared.limits;
        let pulses_per_hour = match limits.round_basal_rate(units_per_hour) {
            Ok(p) => p,
            Err(e) => return Pending::ready(Err(e)),
        };
        let minutes = match limits.round_temp_basal_duration(duration) {
            Ok(m) => m,
            Err(e) => return Pending::ready(Err(e)),
        };

        let (resolver, pending) = pending();
        let this = self.clone();
        self.cancel_temp_basal_then(move |canceled| {
            if let Err(e) = canceled {
                resolver.resolve(Err(e));
                return;
            }
            match minutes {
                None => {
                    let dose = DoseRecord::temp_basal(
                        this.now(),
                        0,
                        TimeDelta::zero(),
                        Certainty::Certain,
                    );
                    resolver.resolve(Ok(dose));
                }
                Some(m) => this.start_temp_basal(pulses_per_hour, m, resolver),
            }
        });
        pending
    }

    fn start_temp_basal(&self, pulses_per_hour: u32, minutes: u32, resolver: Resolver<DoseRecord>) {
        if let Err(e) = self.admit(Transition::StartingTempBasal) {
            resolver.resolve(Err(e));
            return;
        }
        let dose = DoseRecord::temp_basal(
            self.now(),
            pulses_per_hour,
            TimeDelta::minutes(i64::from(minutes)),
            Certainty::Certain,
        );
        tracing::info!(rate = dose.programmed_units(), minutes, "enacting temp basal");

        let this = self.clone();
        self.shared.comm.send_program(
            ProgramType::TempBasal {
                pulses_per_hour,
                duration_minutes: minutes,
            },
            guarded(move |result: CommResult<PodStatus>| match result {
                Ok(status) => {
                    let committed = dose.clone();
                    this.mutate_state(|s, now| {
                        transition::temp_basal_started(s, committed, &status, now);
                    });
                    this.finalize_and_store();
                    resolver.resolve(Ok(dose));
                }
                Err(e) => {
                    resolver.resolve(Err(this.fail(Transition::StartingTempBasal, e, Some(dose))));
                }
            }),
        );
    }

    /// Stop the running temp basal. Resolves with the canceled record, if one was running.
    pub fn cancel_temp_basal(&self) -> Pending<Option<DoseRecord>> {
        let (resolver, pending) = pending();
        self.cancel_temp_basal_then(move |r| resolver.resolve(r));
        pending
    }

    fn cancel_temp_basal_then(
        &self,
        done: impl FnOnce(PumpResult<Option<DoseRecord>>) + Send + 'static,
    ) {
        if let Err(e) = self.admit(Transition::CancelingTempBasal) {
            done(Err(e));
            return;
        }
        tracing::info!("canceling temp basal");
        let this = self.clone();
        self.shared.comm.stop_program(
            StopProgramType::TempBasal,
            guarded(move |result: CommResult<PodStatus>| match result {
                Ok(status) => {
                    let canceled =
                        this.mutate_state(|s, now| transition::temp_basal_canceled(s, &status, now));
                    this.finalize_and_store();
                    done(Ok(canceled));
                }
                Err(e) => done(Err(this.fail(Transition::CancelingTempBasal, e, None))),
            }),
        );
    }

    // ── Suspend / resume ─────────────────────────────────────────────────────

    /// Stop all delivery, interrupting any running bolus or temp basal.
    pub fn suspend_delivery(&self) -> Pending<()> {
        let (resolver, pending) = pending();
        self.suspend_then(move |r| resolver.resolve(r));
        pending
    }

    fn suspend_then(&self, done: impl FnOnce(PumpResult<()>) + Send + 'static) {
        if let Err(e) = self.admit(Transition::SuspendingPump) {
            done(Err(e));
            return;
        }
        tracing::info!("suspending delivery");
        let this = self.clone();
        self.shared.comm.stop_program(
            StopProgramType::StopAll,
            guarded(move |result: CommResult<PodStatus>| match result {
                Ok(status) => {
                    this.mutate_state(|s, now| transition::delivery_suspended(s, &status, now));
                    this.finalize_and_store();
                    done(Ok(()));
                }
                Err(e) => done(Err(this.fail(Transition::SuspendingPump, e, None))),
            }),
        );
    }

    /// Restart scheduled basal delivery.
    pub fn resume_delivery(&self) -> Pending<()> {
        let (resolver, pending) = pending();
        self.resume_then(None, move |r| resolver.resolve(r));
        pending
    }

    fn resume_then(
        &self,
        new_schedule: Option<BasalSchedule>,
        done: impl FnOnce(PumpResult<()>) + Send + 'static,
    ) {
        // The program is read in the same gateway pass that tags the transition.
        let admitted = self.mutate_state(|s, now| {
            transition::preflight(s, Transition::ResumingPump, now)?;
            Ok(new_schedule
                .as_ref()
                .unwrap_or(&s.basal_schedule)
                .to_program(s.utc_offset_secs))
        });
        let program = match admitted {
            Ok(program) => program,
            Err(e) => {
                done(Err(e));
                return;
            }
        };
        tracing::info!(new_schedule = new_schedule.is_some(), "resuming delivery");
        let this = self.clone();
        self.shared.comm.send_program(
            program,
            guarded(move |result: CommResult<PodStatus>| match result {
                Ok(status) => {
                    this.mutate_state(|s, now| {
                        transition::delivery_resumed(s, &status, now, new_schedule);
                    });
                    this.finalize_and_store();
                    done(Ok(()));
                }
                Err(e) => done(Err(this.fail(Transition::ResumingPump, e, None))),
            }),
        );
    }

    /// Program a new daily basal schedule: suspend, send the schedule, resume.
    pub fn set_basal_schedule(&self, rows: &[(u32, f64)]) -> Pending<()> {
        let schedule = match BasalSchedule::new(rows, &self.shared.limits) {
            Ok(s) => s,
            Err(e) => return Pending::ready(Err(e)),
        };
        let (resolver, pending) = pending();
        let this = self.clone();
        self.suspend_then(move |suspended| match suspended {
            Err(e) => resolver.resolve(Err(e)),
            Ok(()) => this.resume_then(Some(schedule), move |r| resolver.resolve(r)),
        });
        pending
    }

    // ── Pod status ───────────────────────────────────────────────────────────

    pub fn get_pod_status(&self) -> Pending<PodStatus> {
        let (resolver, pending) = pending();
        self.fetch_status_then(move |r| resolver.resolve(r.map_err(PumpManagerError::from)));
        pending
    }

    fn fetch_status_then(&self, done: impl FnOnce(CommResult<PodStatus>) + Send + 'static) {
        let this = self.clone();
        self.shared.comm.get_status(guarded(move |result: CommResult<PodStatus>| {
            match &result {
                Ok(status) => {
                    tracing::debug!(?status, "pod status");
                    this.mutate_state(|s, now| s.update_from_pod_status(status, now));
                }
                Err(e) => tracing::warn!(error = %e, "fetching pod status failed"),
            }
            done(result);
        }));
    }

    /// Make sure pump data is fresh before the dosing loop runs.
    ///
    /// Fresh data recommends the loop right away. Stale data is refreshed
    /// first; if that fails the delegate gets the communication error and the
    /// result is `StaleData`.
    pub fn assert_current_pump_data(&self) -> Pending<()> {
        self.finalize_and_store();
        let now = self.now();
        let (has_pod, stale, last_status_date) = {
            let state = self.lock_state();
            (
                state.has_active_pod(),
                self.is_stale(&state, now),
                state.last_status_date,
            )
        };
        if !has_pod {
            return Pending::ready(Err(PumpManagerError::NoActivePod));
        }
        if !stale {
            tracing::debug!("pump data is fresh; recommending loop");
            self.shared.delegate.notify(|d| d.recommends_loop());
            return Pending::ready(Ok(()));
        }

        tracing::info!("fetching status because pump data is too old");
        let (resolver, pending) = pending();
        let this = self.clone();
        self.fetch_status_then(move |result| match result {
            Ok(_) => {
                this.finalize_and_store();
                tracing::debug!("recommending loop");
                this.shared.delegate.notify(|d| d.recommends_loop());
                resolver.resolve(Ok(()));
            }
            Err(cause) => {
                tracing::warn!(error = %cause, "not recommending loop: pump data is stale");
                let err = PumpManagerError::CommunicationFailure(cause.clone());
                this.shared.delegate.notify(move |d| d.did_error(&err));
                resolver.resolve(Err(PumpManagerError::StaleData {
                    last_status_date,
                    cause,
                }));
            }
        });
        pending
    }

    // ── Local updates ────────────────────────────────────────────────────────

    /// Forget the paired pod. No command is sent.
    pub fn discard_pod(&self) {
        tracing::info!("discarding pod");
        self.mutate_state(|s, _| {
            s.pod_activated_at = None;
            s.last_status_date = None;
            s.reservoir_level = None;
        });
    }

    pub fn on_connection_state_changed(&self, connection_state: ConnectionState) {
        tracing::debug!(?connection_state, "connection state changed");
        self.mutate_state(|s, _| s.connection_state = connection_state);
    }
}

impl fmt::Debug for PumpManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpManager")
            .field("limits", &self.shared.limits)
            .field("freshness", &self.shared.freshness)
            .field("status_observers", &self.shared.status_observers.len())
            .field("pod_observers", &self.shared.pod_observers.len())
            .field("delegate", &self.shared.delegate.is_set())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PumpManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = self.now();
        let state = self.state();
        let status = status_for(&state, now);
        writeln!(f, "PumpManager")?;
        writeln!(f, "  basal delivery: {:?}", status.basal_delivery_state)?;
        writeln!(f, "  bolus: {:?}", status.bolus_state)?;
        writeln!(f, "  pump data stale: {}", self.is_stale(&state, now))?;
        match state.pod_expires_at(self.shared.limits.pod_lifetime) {
            Some(t) => writeln!(f, "  pod expires: {}", t.to_rfc3339_opts(SecondsFormat::Secs, true))?,
            None => writeln!(f, "  pod expires: n/a")?,
        }
        write!(f, "{state}")
    }
}
