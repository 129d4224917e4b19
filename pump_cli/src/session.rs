//! One CLI run: restore the engine and the simulated pod, run a command,
//! persist both again.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use eyre::WrapErr;
use pump_config::Config;
use pump_core::conversions::basal_schedule_from_rows;
use pump_core::{
    FreshnessCfg, Pending, PodLimits, PumpManager, PumpManagerDelegate, PumpManagerError,
    PumpManagerStatus, PumpResult, PumpState, QueueDispatcher, RawState,
};
use pump_sim::{PodModel, SimulatedPod};
use pump_traits::{Clock, CommError, ProgramType, SystemClock};
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::ledger::JsonLedgerStore;

/// Contents of the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub engine: RawState,
    pub pod: PodModel,
}

impl StateFile {
    pub fn load(path: &Path) -> eyre::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path).wrap_err_with(|| format!("read state file {path:?}"))?;
        let file = serde_json::from_slice(&bytes)
            .wrap_err_with(|| format!("parse state file {path:?}"))?;
        Ok(Some(file))
    }
}

/// Persists raw state on every change and remembers reported errors.
struct FileDelegate {
    path: PathBuf,
    pod: Weak<SimulatedPod>,
    write_lock: Mutex<()>,
    errors: Mutex<Vec<PumpManagerError>>,
}

impl FileDelegate {
    fn save(&self, engine: RawState, pod: PodModel) -> eyre::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes = serde_json::to_vec_pretty(&StateFile { engine, pod })?;
        write_atomic(&self.path, &bytes)
            .wrap_err_with(|| format!("write state file {:?}", self.path))
    }

    fn persistence_error(&self) -> Option<PumpManagerError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| matches!(e, PumpManagerError::PersistenceFailure(_)))
            .cloned()
    }
}

impl PumpManagerDelegate for FileDelegate {
    fn did_update_state(&self, state: &PumpState) {
        let Some(pod) = self.pod.upgrade() else {
            return;
        };
        let saved = state
            .to_raw_state()
            .map_err(eyre::Report::new)
            .and_then(|raw| self.save(raw, pod.model()));
        if let Err(e) = saved {
            tracing::warn!(error = %e, "persisting pump state failed");
        }
    }

    fn did_update_status(&self, new: &PumpManagerStatus, _old: &PumpManagerStatus) {
        tracing::info!(
            basal = ?new.basal_delivery_state,
            bolus = ?new.bolus_state,
            "pump status"
        );
    }

    fn recommends_loop(&self) {
        tracing::info!("pump data is current; loop may run");
    }

    fn did_error(&self, error: &PumpManagerError) {
        tracing::warn!(error = %error, "pump manager reported an error");
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.clone());
    }
}

pub struct Session {
    pub manager: PumpManager,
    pub pod: Arc<SimulatedPod>,
    delegate: Arc<FileDelegate>,
    dispatcher: Arc<QueueDispatcher>,
    response_timeout: Duration,
}

enum Initial {
    Fresh(PumpState),
    Restored(RawState),
}

/// A freshly activated pod running the configured schedule.
fn fresh(cfg: &Config, limits: &PodLimits) -> eyre::Result<(PumpState, PodModel)> {
    let now = SystemClock::new().now();
    let rows = cfg.basal_rows()?;
    let schedule = basal_schedule_from_rows(&rows, limits)?;
    let offset = cfg.basal.utc_offset_min * 60;
    let segments = match schedule.to_program(offset) {
        ProgramType::Basal { segments, .. } => segments,
        ProgramType::Bolus { .. } | ProgramType::TempBasal { .. } => Vec::new(),
    };
    let model = PodModel::activated(now, cfg.sim.reservoir_u, cfg.pod.bolus_delivery_rate_u_per_s)?
        .with_basal(segments, offset);
    let mut state = PumpState::new(schedule, offset, now);
    state.pod_activated_at = Some(now);
    Ok((state, model))
}

impl Session {
    /// Restore from the state file, or start a fresh pod when there is none
    /// or `activate` is set.
    pub fn open(cfg: &Config, activate: bool, fault: Option<CommError>) -> eyre::Result<Self> {
        let limits = PodLimits::from(&cfg.pod);
        let freshness = FreshnessCfg::from(&cfg.freshness);
        let state_path = PathBuf::from(&cfg.storage.state_file);

        let restored = if activate {
            None
        } else {
            StateFile::load(&state_path)?
        };
        let (initial, model) = match restored {
            Some(file) => {
                tracing::debug!(path = ?state_path, "restoring pump state");
                (Initial::Restored(file.engine), file.pod)
            }
            None => {
                tracing::info!(reservoir_u = cfg.sim.reservoir_u, "activating a new simulated pod");
                let (state, model) = fresh(cfg, &limits)?;
                (Initial::Fresh(state), model)
            }
        };

        let pod = Arc::new(SimulatedPod::spawn(
            model,
            SystemClock::new(),
            Duration::from_millis(cfg.sim.latency_ms),
        )?);
        if let Some(e) = fault {
            tracing::info!(fault = %e, "simulated pod will fail the next exchange");
            pod.fail_next(e);
        }
        let dispatcher = Arc::new(QueueDispatcher::spawn("pump-delegate")?);
        let delegate = Arc::new(FileDelegate {
            path: state_path,
            pod: Arc::downgrade(&pod),
            write_lock: Mutex::new(()),
            errors: Mutex::new(Vec::new()),
        });

        let builder = PumpManager::builder()
            .with_comm(Arc::clone(&pod))
            .with_store(JsonLedgerStore::new(&cfg.storage.ledger_file))
            .with_clock(SystemClock::new())
            .with_limits(limits)
            .with_freshness(freshness)
            .with_delegate(delegate.clone(), dispatcher.clone());
        let builder = match initial {
            Initial::Fresh(state) => builder.with_state(state),
            Initial::Restored(raw) => builder.with_raw_state(&raw)?,
        };
        let manager = builder.build()?;
        tracing::debug!(?manager, "pump manager ready");

        Ok(Self {
            manager,
            pod,
            delegate,
            dispatcher,
            response_timeout: Duration::from_millis(cfg.sim.response_timeout_ms),
        })
    }

    /// Wait for an operation; a response that never comes counts as lost.
    pub fn wait<T>(&self, pending: Pending<T>) -> PumpResult<T> {
        pending.wait_timeout(self.response_timeout).unwrap_or_else(|| {
            tracing::warn!(timeout = ?self.response_timeout, "timed out waiting for the pod");
            Err(PumpManagerError::CommunicationFailure(CommError::NoResponse))
        })
    }

    /// Drain notifications, write the state file and surface any dose store failure.
    pub fn close(self) -> eyre::Result<()> {
        self.dispatcher.flush();
        let raw = self.manager.raw_state()?;
        self.delegate.save(raw, self.pod.model())?;
        if let Some(e) = self.delegate.persistence_error() {
            return Err(e.into());
        }
        Ok(())
    }
}
