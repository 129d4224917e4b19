//! Pump state container and its raw key/value encoding.

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use pump_traits::{ConnectionState, PodStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dose::DoseRecord;
use crate::error::StateCodecError;
use crate::schedule::BasalSchedule;

/// Current raw state layout version.
pub const RAW_STATE_VERSION: u64 = 1;
const VERSION_KEY: &str = "version";

/// Key/value form of [`PumpState`] handed to the host for persistence.
pub type RawState = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "since", rename_all = "snake_case")]
pub enum SuspendState {
    Resumed(DateTime<Utc>),
    Suspended(DateTime<Utc>),
}

/// Device operation currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    SuspendingPump,
    ResumingPump,
    StartingBolus,
    CancelingBolus,
    StartingTempBasal,
    CancelingTempBasal,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::SuspendingPump => "suspending",
            Transition::ResumingPump => "resuming",
            Transition::StartingBolus => "starting bolus",
            Transition::CancelingBolus => "canceling bolus",
            Transition::StartingTempBasal => "starting temp basal",
            Transition::CancelingTempBasal => "canceling temp basal",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", content = "units", rename_all = "snake_case")]
pub enum ReservoirLevel {
    Valid(f64),
    /// Above the level the pod reports exactly.
    AboveThreshold,
}

/// Everything the engine knows about the pod and insulin delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpState {
    pub basal_schedule: BasalSchedule,
    /// Pod time zone, seconds east of UTC.
    pub utc_offset_secs: i32,
    pub suspend_state: SuspendState,
    #[serde(default)]
    pub active_transition: Option<Transition>,
    #[serde(default)]
    pub unfinalized_bolus: Option<DoseRecord>,
    #[serde(default)]
    pub unfinalized_temp_basal: Option<DoseRecord>,
    #[serde(default)]
    pub unfinalized_suspend: Option<DoseRecord>,
    #[serde(default)]
    pub unfinalized_resume: Option<DoseRecord>,
    /// Finished records not yet acknowledged by the dose store.
    #[serde(default)]
    pub finalized_doses: Vec<DoseRecord>,
    #[serde(default)]
    pub last_status_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pod_activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reservoir_level: Option<ReservoirLevel>,
    #[serde(default)]
    pub connection_state: ConnectionState,
}

impl PumpState {
    pub fn new(basal_schedule: BasalSchedule, utc_offset_secs: i32, now: DateTime<Utc>) -> Self {
        Self {
            basal_schedule,
            utc_offset_secs,
            suspend_state: SuspendState::Resumed(now),
            active_transition: None,
            unfinalized_bolus: None,
            unfinalized_temp_basal: None,
            unfinalized_suspend: None,
            unfinalized_resume: None,
            finalized_doses: Vec::new(),
            last_status_date: None,
            pod_activated_at: None,
            reservoir_level: None,
            connection_state: ConnectionState::Disconnected,
        }
    }

    /// Fold a status report from the pod into the state.
    pub fn update_from_pod_status(&mut self, status: &PodStatus, now: DateTime<Utc>) {
        self.last_status_date = Some(now);
        self.reservoir_level = Some(match status.reservoir_units_remaining {
            Some(u) => ReservoirLevel::Valid(u),
            None => ReservoirLevel::AboveThreshold,
        });
        if status.activated_at.is_some() {
            self.pod_activated_at = status.activated_at;
        }
        self.connection_state = status.connection_state;
    }

    pub fn has_active_pod(&self) -> bool {
        self.pod_activated_at.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.suspend_state, SuspendState::Suspended(_))
    }

    pub fn has_unfinished_bolus(&self, now: DateTime<Utc>) -> bool {
        self.unfinalized_bolus
            .as_ref()
            .is_some_and(|b| !b.is_finished(now))
    }

    pub fn has_unfinished_temp_basal(&self, now: DateTime<Utc>) -> bool {
        self.unfinalized_temp_basal
            .as_ref()
            .is_some_and(|t| !t.is_finished(now))
    }

    pub fn pod_expires_at(&self, lifetime: TimeDelta) -> Option<DateTime<Utc>> {
        self.pod_activated_at.map(|t| t + lifetime)
    }

    /// Age of the last status report; `None` when no report was ever received.
    pub fn status_age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.last_status_date.map(|t| now - t)
    }

    pub fn to_raw_state(&self) -> Result<RawState, StateCodecError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.insert(VERSION_KEY.to_string(), Value::from(RAW_STATE_VERSION));
                Ok(map)
            }
            Ok(other) => Err(StateCodecError::Encode(format!(
                "expected an object, got {other}"
            ))),
            Err(e) => Err(StateCodecError::Encode(e.to_string())),
        }
    }

    pub fn from_raw_state(raw: &RawState) -> Result<Self, StateCodecError> {
        let version = match raw.get(VERSION_KEY) {
            None => return Err(StateCodecError::MissingVersion),
            Some(v) => v.as_u64().ok_or_else(|| {
                StateCodecError::Malformed(format!("version must be an unsigned integer, got {v}"))
            })?,
        };
        if version != RAW_STATE_VERSION {
            return Err(StateCodecError::UnsupportedVersion(version));
        }
        let mut map = raw.clone();
        map.remove(VERSION_KEY);
        serde_json::from_value(Value::Object(map))
            .map_err(|e| StateCodecError::Malformed(e.to_string()))
    }
}

fn fmt_date(d: Option<DateTime<Utc>>) -> String {
    d.map_or_else(
        || "never".to_string(),
        |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

fn fmt_dose(d: Option<&DoseRecord>) -> String {
    d.map_or_else(|| "none".to_string(), ToString::to_string)
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PumpState")?;
        match self.suspend_state {
            SuspendState::Resumed(t) => writeln!(f, "  delivery: resumed since {}", fmt_date(Some(t)))?,
            SuspendState::Suspended(t) => {
                writeln!(f, "  delivery: suspended since {}", fmt_date(Some(t)))?;
            }
        }
        match self.active_transition {
            Some(t) => writeln!(f, "  transition: {t}")?,
            None => writeln!(f, "  transition: none")?,
        }
        writeln!(
            f,
            "  basal schedule: {} segment(s), {:.2} U/day, utc offset {}s",
            self.basal_schedule.entries().len(),
            self.basal_schedule.daily_total_units(),
            self.utc_offset_secs
        )?;
        writeln!(f, "  bolus: {}", fmt_dose(self.unfinalized_bolus.as_ref()))?;
        writeln!(f, "  temp basal: {}", fmt_dose(self.unfinalized_temp_basal.as_ref()))?;
        writeln!(f, "  suspend: {}", fmt_dose(self.unfinalized_suspend.as_ref()))?;
        writeln!(f, "  resume: {}", fmt_dose(self.unfinalized_resume.as_ref()))?;
        writeln!(f, "  finalized, unacknowledged: {}", self.finalized_doses.len())?;
        writeln!(f, "  last status: {}", fmt_date(self.last_status_date))?;
        writeln!(f, "  pod activated: {}", fmt_date(self.pod_activated_at))?;
        match self.reservoir_level {
            Some(ReservoirLevel::Valid(u)) => writeln!(f, "  reservoir: {u:.2} U")?,
            Some(ReservoirLevel::AboveThreshold) => writeln!(f, "  reservoir: above threshold")?,
            None => writeln!(f, "  reservoir: unknown")?,
        }
        write!(f, "  connection: {:?}", self.connection_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PodLimits;
    use crate::mocks::active_pod_status;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000)
    }

    fn state() -> PumpState {
        let schedule = BasalSchedule::new(&[(0, 1.0)], &PodLimits::default()).unwrap();
        PumpState::new(schedule, 3600, t0())
    }

    #[test]
    fn new_state_has_no_pod_and_no_status() {
        let s = state();
        assert!(!s.has_active_pod());
        assert!(!s.is_suspended());
        assert_eq!(s.status_age(t0()), None);
        assert_eq!(s.pod_expires_at(TimeDelta::hours(72)), None);
        assert_eq!(s.connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn pod_status_updates_reservoir_activation_and_date() {
        let mut s = state();
        let activated = t0() - TimeDelta::hours(2);
        let mut status = active_pod_status(activated);
        s.update_from_pod_status(&status, t0());
        assert_eq!(s.reservoir_level, Some(ReservoirLevel::Valid(100.0)));
        assert_eq!(s.pod_expires_at(TimeDelta::hours(72)), Some(activated + TimeDelta::hours(72)));
        assert_eq!(s.status_age(t0() + TimeDelta::minutes(3)), Some(TimeDelta::minutes(3)));

        status.reservoir_units_remaining = None;
        status.activated_at = None;
        s.update_from_pod_status(&status, t0() + TimeDelta::minutes(1));
        assert_eq!(s.reservoir_level, Some(ReservoirLevel::AboveThreshold));
        // A report without activation time keeps the known one.
        assert_eq!(s.pod_activated_at, Some(activated));
    }

    #[test]
    fn raw_state_carries_version_key() {
        let raw = state().to_raw_state().unwrap();
        assert_eq!(raw.get("version"), Some(&Value::from(RAW_STATE_VERSION)));
        assert_eq!(PumpState::from_raw_state(&raw).unwrap(), state());
    }

    #[test]
    fn display_lists_pending_work() {
        let text = state().to_string();
        assert!(text.contains("transition: none"));
        assert!(text.contains("1 segment(s), 24.00 U/day"));
        assert!(text.contains("reservoir: unknown"));
    }
}
