#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Pod pump state and dose-reconciliation engine (transport-agnostic).
//!
//! This crate keeps the authoritative local model of insulin delivery for a
//! single pod. All device interaction goes through `pump_traits::PodComm`;
//! persistence of dose records goes through [`store::DoseStore`].
//!
//! ## Architecture
//!
//! - **Doses**: `DoseRecord` lifecycle, unfinalized to finalized (`dose`, `ledger`)
//! - **State**: `PumpState` and its raw key/value encoding (`state`)
//! - **Gateway**: serialized read-modify-write with notification fan-out (`manager`)
//! - **Guard**: admission and commit rules per operation (`transition`)
//! - **Status**: pure derivation of the externally visible status (`status`)
//! - **Observers**: handle-based registries and dispatchers (`observer`)
//!
//! ## Fixed-Point Arithmetic
//!
//! Volumes are held in **pulses** (`u32`, 1 pulse = 0.05 U). Requests are
//! rounded down to whole pulses once, at admission. See `fixed_point`.

pub mod builder;
pub mod config;
pub mod conversions;
pub mod dose;
pub mod error;
pub mod fixed_point;
pub mod ledger;
pub mod manager;
pub mod mocks;
pub mod observer;
pub mod pending;
pub mod progress;
pub mod schedule;
pub mod state;
pub mod status;
pub mod store;
mod transition;

pub use builder::{Missing, PumpManagerBuilder, Set};
pub use config::{FreshnessCfg, PodLimits};
pub use dose::{Certainty, DoseKind, DoseRecord};
pub use error::{BuildError, PumpManagerError, PumpResult, StateCodecError, StoreError};
pub use manager::PumpManager;
pub use observer::{
    Dispatcher, InlineDispatcher, ObserverHandle, PodStatusObserver, PumpManagerDelegate,
    PumpStatusObserver, QueueDispatcher,
};
pub use pending::Pending;
pub use progress::{DoseProgress, PulseTimer};
pub use schedule::{BasalSchedule, BasalScheduleEntry};
pub use state::{PumpState, RawState, ReservoirLevel, SuspendState, Transition};
pub use status::{BasalDeliveryState, BolusState, PumpManagerStatus};
pub use store::{DoseStore, StoreCompletion};
