//! JSON file dose store.
//!
//! Records are upserted by sync identifier, so an in-flight dose that is
//! delivered again on a later reconciliation replaces its earlier copy.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use pump_core::{DoseRecord, DoseStore, StoreCompletion, StoreError};
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sync_identifier: String,
    #[serde(flatten)]
    pub dose: DoseRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub last_reconciliation: Option<DateTime<Utc>>,
    #[serde(default)]
    pub doses: Vec<LedgerEntry>,
}

impl Ledger {
    /// Read a ledger file; a missing file is an empty ledger.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| eyre::eyre!("parse dose ledger {:?}: {}", path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(eyre::eyre!("read dose ledger {:?}: {}", path, e)),
        }
    }

    fn upsert(&mut self, doses: Vec<DoseRecord>) {
        for dose in doses {
            let id = dose.sync_identifier();
            match self.doses.iter_mut().find(|e| e.sync_identifier == id) {
                Some(existing) => existing.dose = dose,
                None => self.doses.push(LedgerEntry {
                    sync_identifier: id,
                    dose,
                }),
            }
        }
        self.doses.sort_by_key(|e| e.dose.start_time);
    }
}

pub struct JsonLedgerStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, doses: Vec<DoseRecord>, last_reconciliation: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ledger =
            Ledger::load(&self.path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        ledger.upsert(doses);
        ledger.last_reconciliation = Some(last_reconciliation);
        let bytes = serde_json::to_vec_pretty(&ledger)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        write_atomic(&self.path, &bytes)
            .map_err(|e| StoreError::Unavailable(format!("write {:?}: {}", self.path, e)))?;
        Ok(ledger.doses.len())
    }
}

impl DoseStore for JsonLedgerStore {
    fn store_doses(
        &self,
        doses: Vec<DoseRecord>,
        last_reconciliation: DateTime<Utc>,
        completion: StoreCompletion,
    ) {
        let incoming = doses.len();
        match self.write(doses, last_reconciliation) {
            Ok(total) => {
                tracing::debug!(incoming, total, path = ?self.path, "dose ledger updated");
                completion(Ok(()));
            }
            Err(e) => {
                tracing::warn!(error = %e, path = ?self.path, "dose ledger write failed");
                completion(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pump_core::Certainty;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000)
    }

    fn store(store: &JsonLedgerStore, doses: Vec<DoseRecord>) -> Result<(), StoreError> {
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        store.store_doses(doses, t0(), Box::new(move |r| *s.lock().unwrap() = Some(r)));
        let out = seen.lock().unwrap().take().unwrap();
        out
    }

    #[test]
    fn running_dose_is_replaced_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let s = JsonLedgerStore::new(dir.path().join("ledger.json"));
        let mut bolus = DoseRecord::bolus(t0(), 40, TimeDelta::seconds(80), Certainty::Certain);
        store(&s, vec![bolus.clone()]).unwrap();
        bolus.cancel(t0() + TimeDelta::seconds(40), Some(20));
        store(&s, vec![bolus.clone()]).unwrap();

        let ledger = Ledger::load(s.path()).unwrap();
        assert_eq!(ledger.doses.len(), 1);
        assert_eq!(ledger.doses[0].dose, bolus);
        assert_eq!(ledger.last_reconciliation, Some(t0()));
    }

    #[test]
    fn entries_are_ordered_by_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let s = JsonLedgerStore::new(dir.path().join("ledger.json"));
        let later = DoseRecord::suspend(t0() + TimeDelta::minutes(5), Certainty::Certain);
        let earlier = DoseRecord::bolus(t0(), 10, TimeDelta::seconds(20), Certainty::Certain);
        store(&s, vec![later]).unwrap();
        store(&s, vec![earlier]).unwrap();
        let kinds: Vec<_> = Ledger::load(s.path())
            .unwrap()
            .doses
            .iter()
            .map(|e| e.dose.kind)
            .collect();
        assert_eq!(kinds, vec![pump_core::DoseKind::Bolus, pump_core::DoseKind::Suspend]);
    }

    #[test]
    fn unreadable_ledger_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "not json").unwrap();
        let s = JsonLedgerStore::new(&path);
        let err = store(&s, vec![DoseRecord::resume(t0(), Certainty::Certain)]).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
