//! Scriptable collaborators for tests and demos.
//!
//! `ManualPod` captures every command with its completion so the caller
//! decides when and how the pod answers. `RecordingStore` records what the
//! engine hands to the dose store and can acknowledge, fail or hold it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use pump_traits::{
    CommResult, Completion, ConnectionState, DeliveryStatus, PodComm, PodStatus, ProgramType,
    StopProgramType,
};

use crate::dose::DoseRecord;
use crate::error::StoreError;
use crate::store::{DoseStore, StoreCompletion};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodCommand {
    Send(ProgramType),
    Stop(StopProgramType),
    GetStatus,
}

/// Status of a connected, active pod with a known reservoir level.
pub fn active_pod_status(activated_at: DateTime<Utc>) -> PodStatus {
    PodStatus {
        delivery_status: DeliveryStatus::ScheduledBasal,
        reservoir_units_remaining: Some(100.0),
        bolus_units_remaining: None,
        activated_at: Some(activated_at),
        connection_state: ConnectionState::Connected,
    }
}

struct ManualPodInner {
    history: Vec<PodCommand>,
    queue: VecDeque<(PodCommand, Completion<PodStatus>)>,
    status: PodStatus,
    auto_respond: bool,
}

/// Pod façade whose responses are driven by the test.
pub struct ManualPod {
    inner: Mutex<ManualPodInner>,
}

impl ManualPod {
    pub fn new(status: PodStatus) -> Self {
        Self {
            inner: Mutex::new(ManualPodInner {
                history: Vec::new(),
                queue: VecDeque::new(),
                status,
                auto_respond: false,
            }),
        }
    }

    /// Answer every command immediately with the current status.
    pub fn auto_respond(&self, on: bool) {
        lock(&self.inner).auto_respond = on;
    }

    pub fn set_status(&self, status: PodStatus) {
        lock(&self.inner).status = status;
    }

    pub fn status(&self) -> PodStatus {
        lock(&self.inner).status.clone()
    }

    pub fn history(&self) -> Vec<PodCommand> {
        lock(&self.inner).history.clone()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Resolve the oldest outstanding command. Returns the command answered.
    pub fn respond_next(&self, result: CommResult<PodStatus>) -> Option<PodCommand> {
        let (cmd, completion) = lock(&self.inner).queue.pop_front()?;
        completion(result);
        Some(cmd)
    }

    /// Resolve the oldest outstanding command with the current status.
    pub fn respond_ok(&self) -> Option<PodCommand> {
        let status = self.status();
        self.respond_next(Ok(status))
    }

    /// Drop the oldest completion without calling it.
    pub fn drop_next(&self) -> Option<PodCommand> {
        let (cmd, completion) = lock(&self.inner).queue.pop_front()?;
        drop(completion);
        Some(cmd)
    }

    fn enqueue(&self, cmd: PodCommand, completion: Completion<PodStatus>) {
        let status = {
            let mut inner = lock(&self.inner);
            inner.history.push(cmd.clone());
            if !inner.auto_respond {
                inner.queue.push_back((cmd, completion));
                return;
            }
            inner.status.clone()
        };
        completion(Ok(status));
    }
}

impl Default for ManualPod {
    fn default() -> Self {
        Self::new(active_pod_status(DateTime::<Utc>::UNIX_EPOCH))
    }
}

impl PodComm for ManualPod {
    fn send_program(&self, program: ProgramType, completion: Completion<PodStatus>) {
        self.enqueue(PodCommand::Send(program), completion);
    }

    fn stop_program(&self, program: StopProgramType, completion: Completion<PodStatus>) {
        self.enqueue(PodCommand::Stop(program), completion);
    }

    fn get_status(&self, completion: Completion<PodStatus>) {
        self.enqueue(PodCommand::GetStatus, completion);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Ack,
    Fail,
    /// Keep completions until `complete_next`.
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub doses: Vec<DoseRecord>,
    pub last_reconciliation: DateTime<Utc>,
}

struct StoreInner {
    mode: StoreMode,
    calls: Vec<StoreCall>,
    held: VecDeque<StoreCompletion>,
}

pub struct RecordingStore {
    inner: Mutex<StoreInner>,
}

impl RecordingStore {
    pub fn new(mode: StoreMode) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                mode,
                calls: Vec::new(),
                held: VecDeque::new(),
            }),
        }
    }

    pub fn set_mode(&self, mode: StoreMode) {
        lock(&self.inner).mode = mode;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn last_call(&self) -> Option<StoreCall> {
        lock(&self.inner).calls.last().cloned()
    }

    pub fn held_count(&self) -> usize {
        lock(&self.inner).held.len()
    }

    /// Complete the oldest held call. Returns false if none was held.
    pub fn complete_next(&self, result: Result<(), StoreError>) -> bool {
        let Some(completion) = lock(&self.inner).held.pop_front() else {
            return false;
        };
        completion(result);
        true
    }

    /// Every record ever received, upserted by sync identifier in first-seen order.
    pub fn upserted(&self) -> Vec<DoseRecord> {
        let mut out: Vec<DoseRecord> = Vec::new();
        for call in &lock(&self.inner).calls {
            for dose in &call.doses {
                let id = dose.sync_identifier();
                match out.iter_mut().find(|d| d.sync_identifier() == id) {
                    Some(existing) => *existing = dose.clone(),
                    None => out.push(dose.clone()),
                }
            }
        }
        out
    }
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self::new(StoreMode::Ack)
    }
}

impl DoseStore for RecordingStore {
    fn store_doses(
        &self,
        doses: Vec<DoseRecord>,
        last_reconciliation: DateTime<Utc>,
        completion: StoreCompletion,
    ) {
        let mode = {
            let mut inner = lock(&self.inner);
            inner.calls.push(StoreCall {
                doses,
                last_reconciliation,
            });
            if inner.mode == StoreMode::Hold {
                inner.held.push_back(completion);
                return;
            }
            inner.mode
        };
        match mode {
            StoreMode::Fail => completion(Err(StoreError::Unavailable("injected failure".into()))),
            StoreMode::Ack | StoreMode::Hold => completion(Ok(())),
        }
    }
}
