//! Dose records: the unit of insulin accounting.

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::fixed_point::{proportional_pulses, pulses_for_elapsed, pulses_to_units};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseKind {
    Bolus,
    TempBasal,
    Basal,
    Suspend,
    Resume,
}

impl DoseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DoseKind::Bolus => "bolus",
            DoseKind::TempBasal => "temp_basal",
            DoseKind::Basal => "basal",
            DoseKind::Suspend => "suspend",
            DoseKind::Resume => "resume",
        }
    }

    /// Kinds whose programmed value is a rate (pulses per hour).
    pub fn is_rate(self) -> bool {
        matches!(self, DoseKind::TempBasal | DoseKind::Basal)
    }
}

/// Whether the pod is known to have executed the command behind a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Certainty {
    Certain,
    Uncertain,
}

/// A single dose, suspend or resume event.
///
/// `programmed_pulses` is the rounded volume for a bolus and pulses/hour for
/// rate kinds; it is zero for suspend and resume. `delivered_pulses` is only
/// set when delivery stopped early, and is then the total delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseRecord {
    pub kind: DoseKind,
    pub start_time: DateTime<Utc>,
    /// `None` while a suspend or resume is open-ended.
    pub end_time: Option<DateTime<Utc>>,
    pub programmed_pulses: u32,
    pub delivered_pulses: Option<u32>,
    pub certainty: Certainty,
}

impl DoseRecord {
    pub fn bolus(start: DateTime<Utc>, pulses: u32, duration: TimeDelta, certainty: Certainty) -> Self {
        Self {
            kind: DoseKind::Bolus,
            start_time: start,
            end_time: Some(start + duration),
            programmed_pulses: pulses,
            delivered_pulses: None,
            certainty,
        }
    }

    pub fn temp_basal(
        start: DateTime<Utc>,
        pulses_per_hour: u32,
        duration: TimeDelta,
        certainty: Certainty,
    ) -> Self {
        Self {
            kind: DoseKind::TempBasal,
            start_time: start,
            end_time: Some(start + duration),
            programmed_pulses: pulses_per_hour,
            delivered_pulses: None,
            certainty,
        }
    }

    pub fn suspend(at: DateTime<Utc>, certainty: Certainty) -> Self {
        Self::marker(DoseKind::Suspend, at, certainty)
    }

    pub fn resume(at: DateTime<Utc>, certainty: Certainty) -> Self {
        Self::marker(DoseKind::Resume, at, certainty)
    }

    fn marker(kind: DoseKind, at: DateTime<Utc>, certainty: Certainty) -> Self {
        Self {
            kind,
            start_time: at,
            end_time: None,
            programmed_pulses: 0,
            delivered_pulses: None,
            certainty,
        }
    }

    pub fn duration(&self) -> Option<TimeDelta> {
        self.end_time.map(|e| e - self.start_time)
    }

    /// Finished once delivery stopped early or the end time has passed.
    /// Open-ended records never finish by time alone.
    pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
        self.delivered_pulses.is_some() || self.end_time.is_some_and(|end| now >= end)
    }

    /// Stop the dose at `at`.
    ///
    /// `remaining_pulses` is the undelivered bolus volume reported by the pod.
    /// Without it a bolus is estimated from elapsed time, rounded up to the
    /// next pulse. Rate kinds are computed from elapsed time. Finished records
    /// are left untouched.
    pub fn cancel(&mut self, at: DateTime<Utc>, remaining_pulses: Option<u32>) {
        if self.is_finished(at) {
            return;
        }
        let at = at.max(self.start_time);
        let elapsed = at - self.start_time;
        match self.kind {
            DoseKind::Bolus => {
                let delivered = match remaining_pulses {
                    Some(r) => self.programmed_pulses.saturating_sub(r),
                    None => {
                        let total = self.duration().unwrap_or_else(TimeDelta::zero);
                        proportional_pulses(self.programmed_pulses, elapsed, total, true)
                    }
                };
                self.delivered_pulses = Some(delivered);
            }
            DoseKind::TempBasal | DoseKind::Basal => {
                self.delivered_pulses = Some(pulses_for_elapsed(self.programmed_pulses, elapsed));
            }
            DoseKind::Suspend | DoseKind::Resume => {}
        }
        self.end_time = Some(at);
    }

    /// Stable identity used by stores to de-duplicate re-sent records.
    pub fn sync_identifier(&self) -> String {
        format!(
            "{}:{}",
            self.kind.as_str(),
            self.start_time.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }

    /// Programmed volume (U) or rate (U/hr).
    pub fn programmed_units(&self) -> f64 {
        pulses_to_units(self.programmed_pulses)
    }

    pub fn delivered_units(&self) -> Option<f64> {
        self.delivered_pulses.map(pulses_to_units)
    }

    /// Best estimate of the total volume of this record, in units.
    pub fn total_units(&self) -> f64 {
        if let Some(d) = self.delivered_pulses {
            return pulses_to_units(d);
        }
        match (self.kind, self.duration()) {
            (DoseKind::Bolus, _) => self.programmed_units(),
            (DoseKind::TempBasal | DoseKind::Basal, Some(d)) => {
                pulses_to_units(pulses_for_elapsed(self.programmed_pulses, d))
            }
            _ => 0.0,
        }
    }
}

impl fmt::Display for DoseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.kind.as_str(), self.start_time.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        match self.kind {
            DoseKind::Bolus => write!(f, " {:.2} U", self.programmed_units())?,
            DoseKind::TempBasal | DoseKind::Basal => write!(f, " {:.2} U/hr", self.programmed_units())?,
            DoseKind::Suspend | DoseKind::Resume => {}
        }
        if let Some(end) = self.end_time {
            write!(f, " until {}", end.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        }
        if let Some(d) = self.delivered_units() {
            write!(f, " (delivered {d:.2} U)")?;
        }
        if self.certainty == Certainty::Uncertain {
            f.write_str(" [uncertain]")?;
        }
        Ok(())
    }
}
