//! Runtime limits and tolerances for the engine.

use chrono::TimeDelta;

use crate::error::{BuildError, PumpManagerError, PumpResult};
use crate::fixed_point::{pulses_to_units, units_to_pulses_floor};

/// Smallest temp basal duration step.
pub const TEMP_BASAL_STEP_MINUTES: u32 = 30;

/// Device limits used to round and validate programs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PodLimits {
    /// Bolus delivery speed in units per second.
    pub bolus_delivery_rate_u_per_s: f64,
    pub max_bolus_pulses: u32,
    pub max_basal_pulses_per_hour: u32,
    pub max_temp_basal: TimeDelta,
    pub reservoir_capacity_u: f64,
    /// Nominal lifetime of a pod after activation.
    pub pod_lifetime: TimeDelta,
}

impl Default for PodLimits {
    fn default() -> Self {
        Self {
            bolus_delivery_rate_u_per_s: 0.025,
            max_bolus_pulses: 600,
            max_basal_pulses_per_hour: 600,
            max_temp_basal: TimeDelta::hours(12),
            reservoir_capacity_u: 200.0,
            pod_lifetime: TimeDelta::hours(72),
        }
    }
}

impl PodLimits {
    pub fn validate(&self) -> Result<(), BuildError> {
        if !(self.bolus_delivery_rate_u_per_s.is_finite() && self.bolus_delivery_rate_u_per_s > 0.0)
        {
            return Err(BuildError::InvalidConfig(
                "bolus delivery rate must be > 0",
            ));
        }
        if self.max_bolus_pulses == 0 {
            return Err(BuildError::InvalidConfig("max bolus must be >= 1 pulse"));
        }
        if self.max_basal_pulses_per_hour == 0 {
            return Err(BuildError::InvalidConfig(
                "max basal rate must be >= 1 pulse/hr",
            ));
        }
        if self.max_temp_basal < TimeDelta::minutes(i64::from(TEMP_BASAL_STEP_MINUTES)) {
            return Err(BuildError::InvalidConfig(
                "max temp basal duration must be >= 30 minutes",
            ));
        }
        if self.pod_lifetime <= TimeDelta::zero() {
            return Err(BuildError::InvalidConfig("pod lifetime must be > 0"));
        }
        Ok(())
    }

    /// Round a requested bolus down to whole pulses.
    pub fn round_bolus(&self, units: f64) -> PumpResult<u32> {
        if !units.is_finite() || units < 0.0 {
            return Err(PumpManagerError::InvalidProgram(format!(
                "bolus of {units} U is not a valid volume"
            )));
        }
        let pulses = units_to_pulses_floor(units);
        if pulses == 0 {
            return Err(PumpManagerError::InvalidProgram(format!(
                "bolus of {units} U is below the smallest deliverable volume"
            )));
        }
        if pulses > self.max_bolus_pulses {
            return Err(PumpManagerError::InvalidProgram(format!(
                "bolus of {units} U exceeds the maximum of {} U",
                pulses_to_units(self.max_bolus_pulses)
            )));
        }
        Ok(pulses)
    }

    /// Round a requested basal or temp basal rate (U/hr) down to whole pulses per hour.
    pub fn round_basal_rate(&self, units_per_hour: f64) -> PumpResult<u32> {
        if !units_per_hour.is_finite() || units_per_hour < 0.0 {
            return Err(PumpManagerError::InvalidProgram(format!(
                "rate of {units_per_hour} U/hr is not a valid rate"
            )));
        }
        let pph = units_to_pulses_floor(units_per_hour);
        if pph > self.max_basal_pulses_per_hour {
            return Err(PumpManagerError::InvalidProgram(format!(
                "rate of {units_per_hour} U/hr exceeds the maximum of {} U/hr",
                pulses_to_units(self.max_basal_pulses_per_hour)
            )));
        }
        Ok(pph)
    }

    /// Round a temp basal duration down to 30-minute steps.
    ///
    /// A zero duration returns `None`, meaning "cancel only".
    pub fn round_temp_basal_duration(&self, duration: std::time::Duration) -> PumpResult<Option<u32>> {
        if duration.is_zero() {
            return Ok(None);
        }
        let minutes = u32::try_from(duration.as_secs() / 60).unwrap_or(u32::MAX);
        let rounded = minutes / TEMP_BASAL_STEP_MINUTES * TEMP_BASAL_STEP_MINUTES;
        if rounded == 0 {
            return Err(PumpManagerError::InvalidProgram(format!(
                "temp basal duration of {minutes} min is shorter than {TEMP_BASAL_STEP_MINUTES} min"
            )));
        }
        if i64::from(rounded) > self.max_temp_basal.num_minutes() {
            return Err(PumpManagerError::InvalidProgram(format!(
                "temp basal duration of {minutes} min exceeds the maximum of {} min",
                self.max_temp_basal.num_minutes()
            )));
        }
        Ok(Some(rounded))
    }

    /// Time the pod takes to deliver a bolus of `pulses`.
    pub fn bolus_duration(&self, pulses: u32) -> TimeDelta {
        let secs = pulses_to_units(pulses) / self.bolus_delivery_rate_u_per_s;
        TimeDelta::milliseconds((secs * 1000.0).round() as i64)
    }
}

/// Freshness policy for pump data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessCfg {
    /// Status older than this is refreshed before recommending a loop.
    pub status_age_tolerance: TimeDelta,
}

impl Default for FreshnessCfg {
    fn default() -> Self {
        Self {
            status_age_tolerance: TimeDelta::minutes(6),
        }
    }
}
