//! Admission and commit rules for device operations.
//!
//! Every operation runs in two phases against the state: `preflight` tags the
//! state with the operation's [`Transition`] (or refuses with `Busy`), and
//! exactly one commit function later clears the tag, either applying the
//! device response or recording the failure.

use chrono::{DateTime, Utc};
use pump_traits::{CommError, PodStatus};

use crate::dose::{Certainty, DoseRecord};
use crate::error::{PumpManagerError, PumpResult};
use crate::fixed_point::units_to_pulses_nearest;
use crate::ledger::retire;
use crate::schedule::BasalSchedule;
use crate::state::{PumpState, SuspendState, Transition};

pub(crate) fn preflight(state: &mut PumpState, transition: Transition, now: DateTime<Utc>) -> PumpResult<()> {
    if state.active_transition.is_some() {
        return Err(PumpManagerError::Busy);
    }
    let busy = match transition {
        Transition::StartingBolus => state.has_unfinished_bolus(now),
        Transition::StartingTempBasal => state.has_unfinished_temp_basal(now),
        Transition::SuspendingPump
        | Transition::ResumingPump
        | Transition::CancelingBolus
        | Transition::CancelingTempBasal => false,
    };
    if busy {
        return Err(PumpManagerError::Busy);
    }
    state.active_transition = Some(transition);
    Ok(())
}

fn remaining_bolus_pulses(status: &PodStatus) -> Option<u32> {
    status.bolus_units_remaining.map(units_to_pulses_nearest)
}

fn commit(state: &mut PumpState, status: &PodStatus, now: DateTime<Utc>) {
    state.update_from_pod_status(status, now);
    state.active_transition = None;
}

pub(crate) fn bolus_started(state: &mut PumpState, dose: DoseRecord, status: &PodStatus, now: DateTime<Utc>) {
    retire(&mut state.unfinalized_bolus, &mut state.finalized_doses, now);
    state.unfinalized_bolus = Some(dose);
    commit(state, status, now);
}

/// Returns the canceled record, if a bolus was still running.
pub(crate) fn bolus_canceled(state: &mut PumpState, status: &PodStatus, now: DateTime<Utc>) -> Option<DoseRecord> {
    let remaining = remaining_bolus_pulses(status);
    let canceled = state
        .unfinalized_bolus
        .as_mut()
        .filter(|b| !b.is_finished(now))
        .map(|b| {
            b.cancel(now, remaining);
            b.clone()
        });
    commit(state, status, now);
    canceled
}

pub(crate) fn temp_basal_started(state: &mut PumpState, dose: DoseRecord, status: &PodStatus, now: DateTime<Utc>) {
    retire(&mut state.unfinalized_temp_basal, &mut state.finalized_doses, now);
    state.unfinalized_temp_basal = Some(dose);
    commit(state, status, now);
}

/// Cancels any running temp basal and moves it straight to the backlog.
/// Returns the canceled record, if one was still running.
pub(crate) fn temp_basal_canceled(state: &mut PumpState, status: &PodStatus, now: DateTime<Utc>) -> Option<DoseRecord> {
    let canceled = state.unfinalized_temp_basal.take().and_then(|mut temp| {
        let was_running = !temp.is_finished(now);
        temp.cancel(now, None);
        state.finalized_doses.push(temp.clone());
        was_running.then_some(temp)
    });
    commit(state, status, now);
    canceled
}

pub(crate) fn delivery_suspended(state: &mut PumpState, status: &PodStatus, now: DateTime<Utc>) {
    if let Some(temp) = state.unfinalized_temp_basal.as_mut().filter(|t| !t.is_finished(now)) {
        temp.cancel(now, None);
    }
    if let Some(bolus) = state.unfinalized_bolus.as_mut().filter(|b| !b.is_finished(now)) {
        bolus.cancel(now, remaining_bolus_pulses(status));
        tracing::info!(dose = %bolus, "bolus interrupted by suspend");
    }
    retire(&mut state.unfinalized_resume, &mut state.finalized_doses, now);
    retire(&mut state.unfinalized_suspend, &mut state.finalized_doses, now);
    state.unfinalized_suspend = Some(DoseRecord::suspend(now, Certainty::Certain));
    state.suspend_state = SuspendState::Suspended(now);
    commit(state, status, now);
}

pub(crate) fn delivery_resumed(
    state: &mut PumpState,
    status: &PodStatus,
    now: DateTime<Utc>,
    new_schedule: Option<BasalSchedule>,
) {
    if let Some(schedule) = new_schedule {
        state.basal_schedule = schedule;
    }
    retire(&mut state.unfinalized_suspend, &mut state.finalized_doses, now);
    retire(&mut state.unfinalized_resume, &mut state.finalized_doses, now);
    state.unfinalized_resume = Some(DoseRecord::resume(now, Certainty::Certain));
    state.suspend_state = SuspendState::Resumed(now);
    commit(state, status, now);
}

/// A dose that already ran to its end is unaffected by a lost stop command.
fn mark_running_uncertain(slot: &mut Option<DoseRecord>, now: DateTime<Utc>) {
    if let Some(dose) = slot.as_mut().filter(|d| !d.is_finished(now)) {
        dose.certainty = Certainty::Uncertain;
    }
}

/// Clear the transition after a failed command.
///
/// When the command may have reached the pod, the affected record is kept
/// as `Uncertain` so it is still accounted for. `provisional` is the record
/// an enact command would have created.
pub(crate) fn command_failed(
    state: &mut PumpState,
    transition: Transition,
    error: &CommError,
    provisional: Option<DoseRecord>,
    now: DateTime<Utc>,
) {
    state.active_transition = None;
    if !error.may_have_executed() {
        return;
    }
    let uncertain = |mut d: DoseRecord| {
        d.certainty = Certainty::Uncertain;
        d
    };
    match transition {
        Transition::StartingBolus => {
            if let Some(dose) = provisional {
                retire(&mut state.unfinalized_bolus, &mut state.finalized_doses, now);
                state.unfinalized_bolus = Some(uncertain(dose));
            }
        }
        Transition::StartingTempBasal => {
            if let Some(dose) = provisional {
                retire(&mut state.unfinalized_temp_basal, &mut state.finalized_doses, now);
                state.unfinalized_temp_basal = Some(uncertain(dose));
            }
        }
        Transition::CancelingBolus => mark_running_uncertain(&mut state.unfinalized_bolus, now),
        Transition::CancelingTempBasal => mark_running_uncertain(&mut state.unfinalized_temp_basal, now),
        Transition::SuspendingPump => {
            mark_running_uncertain(&mut state.unfinalized_temp_basal, now);
            mark_running_uncertain(&mut state.unfinalized_bolus, now);
            retire(&mut state.unfinalized_suspend, &mut state.finalized_doses, now);
            state.unfinalized_suspend = Some(DoseRecord::suspend(now, Certainty::Uncertain));
        }
        Transition::ResumingPump => {
            retire(&mut state.unfinalized_resume, &mut state.finalized_doses, now);
            state.unfinalized_resume = Some(DoseRecord::resume(now, Certainty::Uncertain));
        }
    }
}
