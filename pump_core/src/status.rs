//! Externally visible pump status, derived purely from [`PumpState`].

use chrono::{DateTime, Utc};

use crate::dose::DoseRecord;
use crate::state::{PumpState, SuspendState, Transition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BasalDeliveryState {
    Active(DateTime<Utc>),
    Suspending,
    Suspended(DateTime<Utc>),
    Resuming,
    InitiatingTempBasal,
    TempBasal(DoseRecord),
    CancelingTempBasal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BolusState {
    None,
    Initiating,
    InProgress(DoseRecord),
    Canceling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpManagerStatus {
    pub utc_offset_secs: i32,
    pub basal_delivery_state: BasalDeliveryState,
    pub bolus_state: BolusState,
}

pub fn basal_delivery_state(state: &PumpState, now: DateTime<Utc>) -> BasalDeliveryState {
    if !state.has_active_pod() {
        return BasalDeliveryState::Suspended(state.last_status_date.unwrap_or(DateTime::<Utc>::MIN_UTC));
    }
    match state.active_transition {
        Some(Transition::SuspendingPump) => return BasalDeliveryState::Suspending,
        Some(Transition::ResumingPump) => return BasalDeliveryState::Resuming,
        Some(Transition::StartingTempBasal) => return BasalDeliveryState::InitiatingTempBasal,
        Some(Transition::CancelingTempBasal) => return BasalDeliveryState::CancelingTempBasal,
        Some(Transition::StartingBolus | Transition::CancelingBolus) | None => {}
    }
    if let Some(temp) = state.unfinalized_temp_basal.as_ref().filter(|t| !t.is_finished(now)) {
        return BasalDeliveryState::TempBasal(temp.clone());
    }
    match state.suspend_state {
        SuspendState::Resumed(since) => BasalDeliveryState::Active(since),
        SuspendState::Suspended(since) => BasalDeliveryState::Suspended(since),
    }
}

pub fn bolus_state(state: &PumpState, now: DateTime<Utc>) -> BolusState {
    if !state.has_active_pod() {
        return BolusState::None;
    }
    match state.active_transition {
        Some(Transition::StartingBolus) => return BolusState::Initiating,
        Some(Transition::CancelingBolus) => return BolusState::Canceling,
        Some(
            Transition::SuspendingPump
            | Transition::ResumingPump
            | Transition::StartingTempBasal
            | Transition::CancelingTempBasal,
        )
        | None => {}
    }
    match state.unfinalized_bolus.as_ref().filter(|b| !b.is_finished(now)) {
        Some(bolus) => BolusState::InProgress(bolus.clone()),
        None => BolusState::None,
    }
}

pub fn status_for(state: &PumpState, now: DateTime<Utc>) -> PumpManagerStatus {
    PumpManagerStatus {
        utc_offset_secs: state.utc_offset_secs,
        basal_delivery_state: basal_delivery_state(state, now),
        bolus_state: bolus_state(state, now),
    }
}
