//! Dose finalization: unfinalized records move to the backlog once finished,
//! and the backlog is trimmed only by what the store acknowledged.

use chrono::{DateTime, Utc};

use crate::dose::DoseRecord;
use crate::state::PumpState;

/// Move finished in-flight doses into the backlog and return the records to hand to the store.
///
/// The snapshot is the backlog followed by every remaining in-flight record
/// (bolus, temp basal, suspend, resume). Running this twice without other
/// changes yields the same state and snapshot.
pub fn finalize(state: &mut PumpState, now: DateTime<Utc>) -> Vec<DoseRecord> {
    if let Some(bolus) = state.unfinalized_bolus.take_if(|b| b.is_finished(now)) {
        state.finalized_doses.push(bolus);
    }
    if let Some(temp) = state.unfinalized_temp_basal.take_if(|t| t.is_finished(now)) {
        state.finalized_doses.push(temp);
    }
    let mut snapshot = state.finalized_doses.clone();
    snapshot.extend(
        [
            &state.unfinalized_bolus,
            &state.unfinalized_temp_basal,
            &state.unfinalized_suspend,
            &state.unfinalized_resume,
        ]
        .into_iter()
        .flatten()
        .cloned(),
    );
    snapshot
}

/// Drop from the backlog exactly the records included in an acknowledged snapshot.
pub fn acknowledge(state: &mut PumpState, stored: &[DoseRecord]) {
    state.finalized_doses.retain(|d| !stored.contains(d));
}

/// Move the record in `slot` to the backlog, closing it at `now` if still running.
pub(crate) fn retire(slot: &mut Option<DoseRecord>, backlog: &mut Vec<DoseRecord>, now: DateTime<Utc>) {
    if let Some(mut dose) = slot.take() {
        dose.cancel(now, None);
        backlog.push(dose);
    }
}
