//! Fixed-point pulse arithmetic helpers.
//!
//! Dose volumes are held as whole pulses (`u32`, 1 pulse = 0.05 U) so that
//! rounding to device increments happens once, at admission, and accounting
//! afterwards is exact.

use chrono::TimeDelta;
use pump_traits::pod::PULSES_PER_UNIT;

/// Absorbs binary representation error (e.g. 0.15 U * 20 = 2.9999999999999996).
const SNAP_EPSILON: f64 = 1e-9;

const MS_PER_HOUR: u64 = 3_600_000;

#[inline]
fn saturate_u32(x: f64) -> u32 {
    if x >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        x as u32
    }
}

/// Convert units to whole pulses, rounding down. Non-finite or non-positive input maps to 0.
///
/// The result never converts back to more than `units`.
#[inline]
pub fn units_to_pulses_floor(units: f64) -> u32 {
    if !units.is_finite() || units <= 0.0 {
        return 0;
    }
    let pulses = saturate_u32((units * f64::from(PULSES_PER_UNIT) + SNAP_EPSILON).floor());
    if pulses > 0 && pulses_to_units(pulses) > units {
        pulses - 1
    } else {
        pulses
    }
}

/// Convert units to whole pulses, rounding to nearest. Used for values reported by the pod.
#[inline]
pub fn units_to_pulses_nearest(units: f64) -> u32 {
    if !units.is_finite() || units <= 0.0 {
        return 0;
    }
    saturate_u32((units * f64::from(PULSES_PER_UNIT)).round())
}

#[inline]
pub fn pulses_to_units(pulses: u32) -> f64 {
    f64::from(pulses) / f64::from(PULSES_PER_UNIT)
}

/// True when `units` is an exact multiple of the pulse size.
#[inline]
pub fn is_exact_pulses(units: f64) -> bool {
    if !units.is_finite() || units < 0.0 {
        return false;
    }
    let scaled = units * f64::from(PULSES_PER_UNIT);
    (scaled - scaled.round()).abs() < 1e-6
}

/// Pulses delivered by a rate program of `pulses_per_hour` over `elapsed`, rounded down.
#[inline]
pub fn pulses_for_elapsed(pulses_per_hour: u32, elapsed: TimeDelta) -> u32 {
    let ms = u64::try_from(elapsed.num_milliseconds()).unwrap_or(0);
    let p = u64::from(pulses_per_hour).saturating_mul(ms) / MS_PER_HOUR;
    u32::try_from(p).unwrap_or(u32::MAX)
}

/// Share of `total` pulses spread evenly over `duration`, delivered by `elapsed`.
///
/// Rounded down, or up when `round_up` is set; clamped to `total`.
pub fn proportional_pulses(total: u32, elapsed: TimeDelta, duration: TimeDelta, round_up: bool) -> u32 {
    let dur_ms = u64::try_from(duration.num_milliseconds()).unwrap_or(0);
    if dur_ms == 0 {
        return total;
    }
    let el_ms = u64::try_from(elapsed.num_milliseconds())
        .unwrap_or(0)
        .min(dur_ms);
    let num = u64::from(total) * el_ms;
    let p = if round_up {
        num.div_ceil(dur_ms)
    } else {
        num / dur_ms
    };
    u32::try_from(p).unwrap_or(u32::MAX).min(total)
}
