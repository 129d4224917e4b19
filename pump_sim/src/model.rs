//! Deterministic model of a pod's delivery state.
//!
//! The model integrates delivery between exchanges: every call to
//! [`PodModel::advance`] drains the reservoir by the pulses the running bolus,
//! temp basal or scheduled basal would have delivered since the last update.
//! Basal pulses accumulate in a sub-pulse carry so that slow rates still
//! deliver whole pulses over time.

use chrono::{DateTime, TimeDelta, Utc};
use pump_traits::pod::{PULSE_SIZE_U, PULSES_PER_UNIT};
use pump_traits::{
    BasalSegment, CommError, CommResult, ConnectionState, DeliveryStatus, PodStatus, ProgramType,
    StopProgramType,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 86_400_000;

/// The pod reports exact reservoir contents only below this level.
pub const RESERVOIR_REPORT_THRESHOLD_U: f64 = 50.0;

/// One exchange with the pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(ProgramType),
    Stop(StopProgramType),
    GetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RunningBolus {
    started_at: DateTime<Utc>,
    pulses: u32,
    delivered: u32,
    duration_ms: i64,
}

impl RunningBolus {
    fn remaining(&self) -> u32 {
        self.pulses.saturating_sub(self.delivered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RunningTempBasal {
    pulses_per_hour: u32,
    ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodModel {
    activated_at: Option<DateTime<Utc>>,
    reservoir_pulses: u32,
    schedule: Vec<BasalSegment>,
    utc_offset_secs: i32,
    suspended: bool,
    bolus: Option<RunningBolus>,
    temp_basal: Option<RunningTempBasal>,
    connection_state: ConnectionState,
    /// Milliseconds the pod takes per bolus pulse.
    ms_per_bolus_pulse: i64,
    updated_at: DateTime<Utc>,
    /// Basal progress toward the next pulse, in pulse-milliseconds per hour.
    basal_carry: i64,
}

fn units_to_pulses(units: f64) -> u32 {
    (units * f64::from(PULSES_PER_UNIT)).round() as u32
}

fn pulses_to_units(pulses: u32) -> f64 {
    f64::from(pulses) * PULSE_SIZE_U
}

impl PodModel {
    /// A freshly activated pod, suspended until a basal program arrives.
    pub fn activated(
        at: DateTime<Utc>,
        reservoir_u: f64,
        bolus_rate_u_per_s: f64,
    ) -> Result<Self> {
        if !(reservoir_u.is_finite() && reservoir_u >= 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "reservoir of {reservoir_u} U"
            )));
        }
        if !(bolus_rate_u_per_s.is_finite() && bolus_rate_u_per_s > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "bolus rate of {bolus_rate_u_per_s} U/s"
            )));
        }
        Ok(Self {
            activated_at: Some(at),
            reservoir_pulses: units_to_pulses(reservoir_u),
            schedule: Vec::new(),
            utc_offset_secs: 0,
            suspended: true,
            bolus: None,
            temp_basal: None,
            connection_state: ConnectionState::Connected,
            ms_per_bolus_pulse: (PULSE_SIZE_U / bolus_rate_u_per_s * 1000.0).round() as i64,
            updated_at: at,
            basal_carry: 0,
        })
    }

    /// No pod paired: every exchange fails with `NoPod`.
    pub fn unpaired(now: DateTime<Utc>) -> Self {
        Self {
            activated_at: None,
            reservoir_pulses: 0,
            schedule: Vec::new(),
            utc_offset_secs: 0,
            suspended: true,
            bolus: None,
            temp_basal: None,
            connection_state: ConnectionState::Disconnected,
            ms_per_bolus_pulse: 2_000,
            updated_at: now,
            basal_carry: 0,
        }
    }

    /// Seed a running basal program.
    #[must_use]
    pub fn with_basal(mut self, segments: Vec<BasalSegment>, utc_offset_secs: i32) -> Self {
        self.suspended = segments.is_empty();
        self.schedule = segments;
        self.utc_offset_secs = utc_offset_secs;
        self
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn reservoir_units(&self) -> f64 {
        pulses_to_units(self.reservoir_pulses)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection_state = state;
    }

    fn consume(&mut self, pulses: u32) {
        self.reservoir_pulses = self.reservoir_pulses.saturating_sub(pulses);
    }

    /// Scheduled rate at `t` and the instant it next changes.
    fn scheduled_rate(&self, t: DateTime<Utc>) -> (u32, DateTime<Utc>) {
        let into_day = (t.timestamp_millis() + i64::from(self.utc_offset_secs) * 1000)
            .rem_euclid(MS_PER_DAY);
        let minute = u32::try_from(into_day / 60_000).unwrap_or(0);
        let pph = self
            .schedule
            .iter()
            .rev()
            .find(|s| s.start_minutes <= minute)
            .map_or(0, |s| s.pulses_per_hour);
        let next_start_ms = self
            .schedule
            .iter()
            .find(|s| s.start_minutes > minute)
            .map_or(MS_PER_DAY, |s| i64::from(s.start_minutes) * 60_000);
        (pph, t + TimeDelta::milliseconds(next_start_ms - into_day))
    }

    /// Deliver everything due between the last update and `now`.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        if now <= self.updated_at {
            return;
        }
        if let Some(mut bolus) = self.bolus {
            let elapsed = (now - bolus.started_at).num_milliseconds().max(0);
            let due = if bolus.duration_ms <= 0 || elapsed >= bolus.duration_ms {
                bolus.pulses
            } else {
                let d = i64::from(bolus.pulses) * elapsed / bolus.duration_ms;
                u32::try_from(d).unwrap_or(bolus.pulses)
            };
            self.consume(due.saturating_sub(bolus.delivered));
            bolus.delivered = due;
            self.bolus = (bolus.remaining() > 0).then_some(bolus);
        }

        let mut t = self.updated_at;
        while t < now && !self.suspended {
            let (pph, until) = match self.temp_basal {
                Some(temp) if t < temp.ends_at => (temp.pulses_per_hour, temp.ends_at),
                Some(_) => {
                    self.temp_basal = None;
                    continue;
                }
                None => self.scheduled_rate(t),
            };
            let end = until.min(now);
            self.basal_carry += i64::from(pph) * (end - t).num_milliseconds();
            let pulses = self.basal_carry / MS_PER_HOUR;
            self.basal_carry %= MS_PER_HOUR;
            self.consume(u32::try_from(pulses).unwrap_or(u32::MAX));
            t = end;
        }
        if self.temp_basal.is_some_and(|temp| now >= temp.ends_at) {
            self.temp_basal = None;
        }
        self.updated_at = now;
    }

    /// Status as the pod would report it at `now`.
    pub fn status(&mut self, now: DateTime<Utc>) -> PodStatus {
        self.advance(now);
        let delivery_status = match (self.suspended, self.bolus.is_some(), self.temp_basal.is_some()) {
            (true, _, _) => DeliveryStatus::Suspended,
            (false, true, true) => DeliveryStatus::TempBasalAndBolus,
            (false, true, false) => DeliveryStatus::Bolus,
            (false, false, true) => DeliveryStatus::TempBasal,
            (false, false, false) => DeliveryStatus::ScheduledBasal,
        };
        let reservoir = self.reservoir_units();
        PodStatus {
            delivery_status,
            reservoir_units_remaining: (reservoir <= RESERVOIR_REPORT_THRESHOLD_U).then_some(reservoir),
            bolus_units_remaining: self.bolus.map(|b| pulses_to_units(b.remaining())),
            activated_at: self.activated_at,
            connection_state: self.connection_state,
        }
    }

    /// Run one exchange against the model.
    pub fn apply(&mut self, command: &Command, now: DateTime<Utc>) -> CommResult<PodStatus> {
        self.advance(now);
        if self.activated_at.is_none() {
            return Err(CommError::NoPod);
        }
        if self.connection_state != ConnectionState::Connected {
            return Err(CommError::NotConnected);
        }
        match command {
            Command::Send(ProgramType::Bolus { pulses }) => {
                if self.suspended {
                    return Err(CommError::Rejected("delivery is suspended".into()));
                }
                if self.bolus.is_some() {
                    return Err(CommError::Rejected("bolus already in progress".into()));
                }
                if *pulses > self.reservoir_pulses {
                    return Err(CommError::Rejected("not enough insulin".into()));
                }
                self.bolus = Some(RunningBolus {
                    started_at: now,
                    pulses: *pulses,
                    delivered: 0,
                    duration_ms: i64::from(*pulses) * self.ms_per_bolus_pulse,
                });
            }
            Command::Send(ProgramType::TempBasal {
                pulses_per_hour,
                duration_minutes,
            }) => {
                if self.suspended {
                    return Err(CommError::Rejected("delivery is suspended".into()));
                }
                if self.temp_basal.is_some() {
                    return Err(CommError::Rejected("temp basal already running".into()));
                }
                self.temp_basal = Some(RunningTempBasal {
                    pulses_per_hour: *pulses_per_hour,
                    ends_at: now + TimeDelta::minutes(i64::from(*duration_minutes)),
                });
            }
            Command::Send(ProgramType::Basal {
                segments,
                utc_offset_secs,
            }) => {
                if segments.is_empty() {
                    return Err(CommError::Rejected("empty basal program".into()));
                }
                self.schedule.clone_from(segments);
                self.utc_offset_secs = *utc_offset_secs;
                self.suspended = false;
                self.basal_carry = 0;
            }
            Command::Stop(StopProgramType::Bolus) => {
                let remaining = self.bolus.take().map(|b| b.remaining());
                return Ok(self.status_with_remaining(now, remaining));
            }
            Command::Stop(StopProgramType::TempBasal) => {
                self.temp_basal = None;
            }
            Command::Stop(StopProgramType::StopAll) => {
                let remaining = self.bolus.take().map(|b| b.remaining());
                self.temp_basal = None;
                self.suspended = true;
                return Ok(self.status_with_remaining(now, remaining));
            }
            Command::GetStatus => {}
        }
        Ok(self.status(now))
    }

    fn status_with_remaining(&mut self, now: DateTime<Utc>, remaining: Option<u32>) -> PodStatus {
        PodStatus {
            bolus_units_remaining: remaining.map(pulses_to_units),
            ..self.status(now)
        }
    }
}
