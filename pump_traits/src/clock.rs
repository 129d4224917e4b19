use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};

/// Wall-clock abstraction shared by the engine and the pod simulator.
///
/// - now(): current UTC time
/// - since(): elapsed time from an earlier instant, saturating at zero
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Time elapsed since `earlier`, saturating at zero when `earlier` is in the future.
    fn since(&self, earlier: DateTime<Utc>) -> TimeDelta {
        let d = self.now().signed_duration_since(earlier);
        if d < TimeDelta::zero() {
            TimeDelta::zero()
        } else {
            d
        }
    }
}

/// Default clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// now() = origin + offset
///
/// Clones share the same offset, so a test can hand one clone to the engine
/// and keep another to advance time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: DateTime<Utc>,
    offset: Arc<Mutex<TimeDelta>>,
}

impl ManualClock {
    pub fn new(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            offset: Arc::new(Mutex::new(TimeDelta::zero())),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: TimeDelta) {
        if let Ok(mut off) = self.offset.lock() {
            *off += d;
        }
    }

    /// Advance by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.advance(TimeDelta::seconds(secs));
    }

    /// Jump to an absolute time.
    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut off) = self.offset.lock() {
            *off = at.signed_duration_since(self.origin);
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let off = self.offset.lock().map(|g| *g).unwrap_or_else(|_| TimeDelta::zero());
        self.origin + off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let a = ManualClock::default();
        let b = a.clone();
        let t0 = a.now();
        b.advance_secs(90);
        assert_eq!(a.now() - t0, TimeDelta::seconds(90));
    }

    #[test]
    fn since_saturates_for_future_instants() {
        let c = ManualClock::default();
        let future = c.now() + TimeDelta::minutes(5);
        assert_eq!(c.since(future), TimeDelta::zero());
    }
}
