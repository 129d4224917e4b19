#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Simulated pod behind the `PodComm` façade.
//!
//! Spawns one worker thread that owns the exchange queue. Each request waits
//! out the configured radio latency, runs against the [`PodModel`] and then
//! invokes its completion on the worker thread, the way a real communication
//! stack delivers responses.
//!
//! Faults queued with [`SimulatedPod::fail_next`] replace the next response.
//! A fault that [may have executed](CommError::may_have_executed) still
//! applies the command to the model, so the pod and the engine can disagree
//! the same way they would over a lossy link.
//!
//! The worker is shut down and joined when the `SimulatedPod` is dropped.

pub mod error;
pub mod model;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel as xch;
use pump_traits::{
    Clock, CommError, CommResult, Completion, ConnectionState, PodComm, PodStatus, ProgramType,
    StopProgramType,
};

pub use error::{Result, SimError};
pub use model::{Command, PodModel};

struct Request {
    command: Command,
    completion: Completion<PodStatus>,
}

struct SimShared {
    model: Mutex<PodModel>,
    faults: Mutex<VecDeque<CommError>>,
    clock: Arc<dyn Clock>,
    exchanges: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimShared {
    fn exchange(&self, command: &Command) -> CommResult<PodStatus> {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        let fault = lock(&self.faults).pop_front();
        let now = self.clock.now();
        let mut model = lock(&self.model);
        match fault {
            None => model.apply(command, now),
            Some(e) if e.may_have_executed() => {
                let applied = model.apply(command, now);
                tracing::debug!(?command, applied = applied.is_ok(), error = %e, "injected fault after execution");
                Err(e)
            }
            Some(e) => {
                model.advance(now);
                tracing::debug!(?command, error = %e, "injected fault before execution");
                Err(e)
            }
        }
    }
}

pub struct SimulatedPod {
    tx: Option<xch::Sender<Request>>,
    shared: Arc<SimShared>,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl SimulatedPod {
    pub fn spawn(model: PodModel, clock: impl Clock + 'static, latency: Duration) -> Result<Self> {
        let (tx, rx) = xch::unbounded::<Request>();
        let shared = Arc::new(SimShared {
            model: Mutex::new(model),
            faults: Mutex::new(VecDeque::new()),
            clock: Arc::new(clock),
            exchanges: AtomicU64::new(0),
        });
        let worker = Arc::clone(&shared);
        let join_handle = std::thread::Builder::new()
            .name("pod-sim".to_string())
            .spawn(move || {
                for Request { command, completion } in rx {
                    if !latency.is_zero() {
                        std::thread::sleep(latency);
                    }
                    let result = worker.exchange(&command);
                    if let Err(e) = &result {
                        tracing::debug!(?command, error = %e, "pod exchange failed");
                    }
                    completion(result);
                }
                tracing::trace!("pod simulator thread exiting cleanly");
            })?;
        Ok(Self {
            tx: Some(tx),
            shared,
            join_handle: Some(join_handle),
        })
    }

    fn submit(&self, command: Command, completion: Completion<PodStatus>) {
        let Some(tx) = &self.tx else {
            completion(Err(CommError::NotConnected));
            return;
        };
        if let Err(xch::SendError(req)) = tx.send(Request { command, completion }) {
            tracing::warn!(command = ?req.command, "pod simulator worker is gone");
            (req.completion)(Err(CommError::NotConnected));
        }
    }

    /// Fail the next exchange with `error`. Faults queue up in order.
    pub fn fail_next(&self, error: CommError) {
        lock(&self.shared.faults).push_back(error);
    }

    /// Copy of the model, advanced to the current time.
    pub fn model(&self) -> PodModel {
        let mut model = lock(&self.shared.model);
        model.advance(self.shared.clock.now());
        model.clone()
    }

    pub fn replace_model(&self, model: PodModel) {
        *lock(&self.shared.model) = model;
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        lock(&self.shared.model).set_connection_state(state);
    }

    /// Number of exchanges the worker has processed.
    pub fn exchanges(&self) -> u64 {
        self.shared.exchanges.load(Ordering::Relaxed)
    }
}

impl PodComm for SimulatedPod {
    fn send_program(&self, program: ProgramType, completion: Completion<PodStatus>) {
        self.submit(Command::Send(program), completion);
    }

    fn stop_program(&self, program: StopProgramType, completion: Completion<PodStatus>) {
        self.submit(Command::Stop(program), completion);
    }

    fn get_status(&self, completion: Completion<PodStatus>) {
        self.submit(Command::GetStatus, completion);
    }
}

impl Drop for SimulatedPod {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left and exit.
        drop(self.tx.take());
        if let Some(handle) = self.join_handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                // Dropped from inside a completion; the worker exits on its own.
                return;
            }
            match handle.join() {
                Ok(()) => tracing::trace!("pod simulator thread joined successfully"),
                Err(e) => tracing::warn!(?e, "pod simulator thread panicked during shutdown"),
            }
        }
    }
}
