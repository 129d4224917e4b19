//! Dose persistence collaborator.

use chrono::{DateTime, Utc};

use crate::dose::DoseRecord;
use crate::error::StoreError;

pub type StoreCompletion = Box<dyn FnOnce(Result<(), StoreError>) + Send + 'static>;

/// Receives reconciled dose records.
///
/// The same in-flight record may be delivered repeatedly while it is still
/// running; stores should upsert by [`DoseRecord::sync_identifier`].
pub trait DoseStore: Send + Sync {
    fn store_doses(
        &self,
        doses: Vec<DoseRecord>,
        last_reconciliation: DateTime<Utc>,
        completion: StoreCompletion,
    );
}

impl<T: DoseStore + ?Sized> DoseStore for std::sync::Arc<T> {
    fn store_doses(
        &self,
        doses: Vec<DoseRecord>,
        last_reconciliation: DateTime<Utc>,
        completion: StoreCompletion,
    ) {
        (**self).store_doses(doses, last_reconciliation, completion);
    }
}
