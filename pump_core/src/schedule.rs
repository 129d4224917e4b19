//! Daily basal schedule.

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use pump_traits::{BasalSegment, ProgramType};
use serde::{Deserialize, Serialize};

use crate::config::PodLimits;
use crate::error::{PumpManagerError, PumpResult};
use crate::fixed_point::{is_exact_pulses, pulses_to_units, units_to_pulses_floor};

pub const MINUTES_PER_DAY: u32 = 24 * 60;
/// Segment start times are aligned to this step.
pub const SEGMENT_STEP_MINUTES: u32 = 30;
pub const MAX_SEGMENTS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasalScheduleEntry {
    /// Minutes past local midnight.
    pub start_minutes: u32,
    pub pulses_per_hour: u32,
}

/// Validated daily schedule: non-empty, starts at midnight, strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BasalScheduleEntry>", into = "Vec<BasalScheduleEntry>")]
pub struct BasalSchedule {
    entries: Vec<BasalScheduleEntry>,
}

impl BasalSchedule {
    /// Build from `(start_minutes, units_per_hour)` pairs.
    ///
    /// Rates must be exact multiples of the pulse size and within the pod maximum.
    pub fn new(rows: &[(u32, f64)], limits: &PodLimits) -> PumpResult<Self> {
        let mut entries = Vec::with_capacity(rows.len());
        for &(start_minutes, rate) in rows {
            if !rate.is_finite() || rate < 0.0 {
                return Err(PumpManagerError::InvalidProgram(format!(
                    "basal rate {rate} U/hr at minute {start_minutes} is not a valid rate"
                )));
            }
            if !is_exact_pulses(rate) {
                return Err(PumpManagerError::InvalidProgram(format!(
                    "basal rate {rate} U/hr is not a multiple of 0.05 U/hr"
                )));
            }
            let pulses_per_hour = units_to_pulses_floor(rate);
            if pulses_per_hour > limits.max_basal_pulses_per_hour {
                return Err(PumpManagerError::InvalidProgram(format!(
                    "basal rate {rate} U/hr exceeds the maximum of {} U/hr",
                    pulses_to_units(limits.max_basal_pulses_per_hour)
                )));
            }
            entries.push(BasalScheduleEntry {
                start_minutes,
                pulses_per_hour,
            });
        }
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<BasalScheduleEntry>) -> PumpResult<Self> {
        let invalid = |msg: String| Err(PumpManagerError::InvalidProgram(msg));
        let Some(first) = entries.first() else {
            return invalid("basal schedule is empty".to_string());
        };
        if entries.len() > MAX_SEGMENTS {
            return invalid(format!(
                "basal schedule has {} segments, the pod accepts at most {MAX_SEGMENTS}",
                entries.len()
            ));
        }
        if first.start_minutes != 0 {
            return invalid("basal schedule must start at midnight".to_string());
        }
        for e in &entries {
            if e.start_minutes >= MINUTES_PER_DAY || e.start_minutes % SEGMENT_STEP_MINUTES != 0 {
                return invalid(format!(
                    "basal segment start {} is not a half-hour boundary within the day",
                    e.start_minutes
                ));
            }
        }
        if entries
            .windows(2)
            .any(|w| w[1].start_minutes <= w[0].start_minutes)
        {
            return invalid("basal schedule start times must be strictly increasing".to_string());
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[BasalScheduleEntry] {
        &self.entries
    }

    /// Pulses per hour in effect at `minute_of_day`.
    pub fn rate_at(&self, minute_of_day: u32) -> u32 {
        let minute = minute_of_day % MINUTES_PER_DAY;
        self.entries
            .iter()
            .take_while(|e| e.start_minutes <= minute)
            .last()
            .map_or(0, |e| e.pulses_per_hour)
    }

    /// Scheduled rate (U/hr) at instant `at` in a zone `utc_offset_secs` east of UTC.
    pub fn rate_at_time(&self, at: DateTime<Utc>, utc_offset_secs: i32) -> f64 {
        let local = at + TimeDelta::seconds(i64::from(utc_offset_secs));
        let minute = local.hour() * 60 + local.minute();
        pulses_to_units(self.rate_at(minute))
    }

    /// Total scheduled units over one day.
    pub fn daily_total_units(&self) -> f64 {
        let mut pulses_x60 = 0u64;
        for (i, e) in self.entries.iter().enumerate() {
            let end = self
                .entries
                .get(i + 1)
                .map_or(MINUTES_PER_DAY, |n| n.start_minutes);
            pulses_x60 += u64::from(e.pulses_per_hour) * u64::from(end - e.start_minutes);
        }
        pulses_x60 as f64 / 60.0 / 20.0
    }

    pub fn to_program(&self, utc_offset_secs: i32) -> ProgramType {
        ProgramType::Basal {
            segments: self
                .entries
                .iter()
                .map(|e| BasalSegment {
                    start_minutes: e.start_minutes,
                    pulses_per_hour: e.pulses_per_hour,
                })
                .collect(),
            utc_offset_secs,
        }
    }
}

impl TryFrom<Vec<BasalScheduleEntry>> for BasalSchedule {
    type Error = PumpManagerError;

    fn try_from(entries: Vec<BasalScheduleEntry>) -> Result<Self, Self::Error> {
        Self::from_entries(entries)
    }
}

impl From<BasalSchedule> for Vec<BasalScheduleEntry> {
    fn from(s: BasalSchedule) -> Self {
        s.entries
    }
}
