//! Value types exchanged with the pod communication stack.
//!
//! Insulin quantities on the wire are expressed in **pulses** (1 pulse = 0.05 U),
//! the smallest volume the pod can deliver. Status reports coming back from the
//! pod use units, as the vendor stack reports them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Units of insulin per pulse.
pub const PULSE_SIZE_U: f64 = 0.05;
/// Pulses per unit of insulin.
pub const PULSES_PER_UNIT: u32 = 20;

/// Link state between the controller and the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Connecting,
    #[default]
    Disconnected,
}

/// What the pod reports it is currently delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    ScheduledBasal,
    TempBasal,
    Bolus,
    TempBasalAndBolus,
    Suspended,
}

/// Snapshot returned by every pod exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    pub delivery_status: DeliveryStatus,
    /// Reservoir contents in units; `None` when above the pod's reporting threshold.
    pub reservoir_units_remaining: Option<f64>,
    /// Units of the running bolus not yet delivered; `None` when the pod did not report it.
    pub bolus_units_remaining: Option<f64>,
    pub activated_at: Option<DateTime<Utc>>,
    pub connection_state: ConnectionState,
}

/// One segment of a basal program, starting at `start_minutes` past local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasalSegment {
    pub start_minutes: u32,
    pub pulses_per_hour: u32,
}

/// Program sent to the pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramType {
    Bolus {
        pulses: u32,
    },
    TempBasal {
        pulses_per_hour: u32,
        duration_minutes: u32,
    },
    Basal {
        segments: Vec<BasalSegment>,
        utc_offset_secs: i32,
    },
}

/// Program class to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopProgramType {
    Bolus,
    TempBasal,
    /// Stop everything, including scheduled basal.
    StopAll,
}

/// Failure of a single pod exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    #[error("pod is not connected")]
    NotConnected,
    #[error("no pod is paired")]
    NoPod,
    #[error("pod rejected the command: {0}")]
    Rejected(String),
    #[error("no response from pod")]
    NoResponse,
    #[error("transport error: {0}")]
    Transport(String),
}

impl CommError {
    /// True when the command may have reached the pod even though no
    /// acknowledgement came back.
    pub fn may_have_executed(&self) -> bool {
        matches!(self, CommError::NoResponse | CommError::Transport(_))
    }
}
