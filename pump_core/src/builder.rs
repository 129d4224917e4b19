//! Type-state builder for `PumpManager`.
//!
//! The builder enforces at compile time that the pod façade, the dose store
//! and the initial state are provided before `build()` is available.
//! `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use eyre::WrapErr;
use pump_traits::{Clock, PodComm, SystemClock};

use crate::config::{FreshnessCfg, PodLimits};
use crate::error::{BuildError, Result};
use crate::manager::PumpManager;
use crate::observer::{DelegateSlot, Dispatcher, PumpManagerDelegate};
use crate::state::{PumpState, RawState};
use crate::store::DoseStore;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `PumpManager`. Limits and state are validated on `build()`.
pub struct PumpManagerBuilder<C, S, St> {
    comm: Option<Arc<dyn PodComm>>,
    store: Option<Arc<dyn DoseStore>>,
    state: Option<PumpState>,
    clock: Option<Arc<dyn Clock>>,
    limits: Option<PodLimits>,
    freshness: Option<FreshnessCfg>,
    delegate: Option<(Arc<dyn PumpManagerDelegate>, Arc<dyn Dispatcher>)>,
    _c: PhantomData<C>,
    _s: PhantomData<S>,
    _st: PhantomData<St>,
}

impl Default for PumpManagerBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            comm: None,
            store: None,
            state: None,
            clock: None,
            limits: None,
            freshness: None,
            delegate: None,
            _c: PhantomData,
            _s: PhantomData,
            _st: PhantomData,
        }
    }
}

impl<C, S, St> PumpManagerBuilder<C, S, St> {
    fn retype<C2, S2, St2>(self) -> PumpManagerBuilder<C2, S2, St2> {
        PumpManagerBuilder {
            comm: self.comm,
            store: self.store,
            state: self.state,
            clock: self.clock,
            limits: self.limits,
            freshness: self.freshness,
            delegate: self.delegate,
            _c: PhantomData,
            _s: PhantomData,
            _st: PhantomData,
        }
    }

    /// Provide the pod communication façade.
    pub fn with_comm(mut self, comm: impl PodComm + 'static) -> PumpManagerBuilder<Set, S, St> {
        self.comm = Some(Arc::new(comm));
        self.retype()
    }

    /// Provide the dose store.
    pub fn with_store(mut self, store: impl DoseStore + 'static) -> PumpManagerBuilder<C, Set, St> {
        self.store = Some(Arc::new(store));
        self.retype()
    }

    /// Start from an explicit state.
    pub fn with_state(mut self, state: PumpState) -> PumpManagerBuilder<C, S, Set> {
        self.state = Some(state);
        self.retype()
    }

    /// Restore state previously produced by `PumpManager::raw_state`.
    pub fn with_raw_state(mut self, raw: &RawState) -> Result<PumpManagerBuilder<C, S, Set>> {
        let state = PumpState::from_raw_state(raw).wrap_err("restore pump state")?;
        self.state = Some(state);
        Ok(self.retype())
    }

    /// Use a custom clock (tests use `ManualClock`).
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_limits(mut self, limits: PodLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessCfg) -> Self {
        self.freshness = Some(freshness);
        self
    }

    pub fn with_delegate(
        mut self,
        delegate: Arc<dyn PumpManagerDelegate>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        self.delegate = Some((delegate, dispatcher));
        self
    }

    /// Validate and build, reporting missing parts at runtime.
    pub fn try_build(self) -> Result<PumpManager> {
        let comm = self
            .comm
            .ok_or_else(|| eyre::Report::new(BuildError::MissingComm))?;
        let store = self
            .store
            .ok_or_else(|| eyre::Report::new(BuildError::MissingStore))?;
        let mut state = self
            .state
            .ok_or_else(|| eyre::Report::new(BuildError::MissingState))?;
        let limits = self.limits.unwrap_or_default();
        let freshness = self.freshness.unwrap_or_default();

        limits.validate().map_err(eyre::Report::new)?;
        if freshness.status_age_tolerance <= chrono::TimeDelta::zero() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "status age tolerance must be > 0",
            )));
        }
        if state
            .basal_schedule
            .entries()
            .iter()
            .any(|e| e.pulses_per_hour > limits.max_basal_pulses_per_hour)
        {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "basal schedule exceeds the maximum basal rate",
            )));
        }
        // A restored transition belongs to a command whose response is lost.
        if let Some(t) = state.active_transition.take() {
            tracing::warn!(transition = %t, "clearing transition left over from a previous run");
        }

        let delegate = DelegateSlot::default();
        if let Some((d, dispatcher)) = self.delegate {
            delegate.set(d, dispatcher);
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        Ok(PumpManager::from_parts(
            state, comm, store, clock, limits, freshness, delegate,
        ))
    }
}

impl PumpManagerBuilder<Set, Set, Set> {
    pub fn build(self) -> Result<PumpManager> {
        self.try_build()
    }
}
