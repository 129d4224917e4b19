//! Observer registry, dispatchers and the delegate slot.
//!
//! Observers are registered together with the [`Dispatcher`] that runs their
//! callbacks. Notification snapshots the registry and dispatches outside its
//! lock, so registering or removing from inside a callback is allowed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel as xch;

use crate::error::PumpManagerError;
use crate::state::PumpState;
use crate::status::PumpManagerStatus;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs notification jobs on a context chosen by the subscriber.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Runs jobs on the notifying thread, before the triggering mutation returns.
///
/// Callbacks dispatched inline must not start another pump operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs jobs in order on a dedicated worker thread.
///
/// The worker drains outstanding jobs and is joined when the dispatcher is dropped.
pub struct QueueDispatcher {
    tx: Option<xch::Sender<Job>>,
    join_handle: Option<JoinHandle<()>>,
}

impl QueueDispatcher {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = xch::unbounded::<Job>();
        let join_handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
                tracing::trace!("dispatcher thread exiting cleanly");
            })?;
        Ok(Self {
            tx: Some(tx),
            join_handle: Some(join_handle),
        })
    }

    /// Block until every job queued before this call has run.
    pub fn flush(&self) {
        let (done_tx, done_rx) = xch::bounded::<()>(1);
        self.dispatch(Box::new(move || {
            let _ = done_tx.send(());
        }));
        let _ = done_rx.recv();
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, job: Job) {
        if let Some(tx) = &self.tx {
            if tx.send(job).is_err() {
                tracing::warn!("dispatcher worker is gone; notification dropped");
            }
        }
    }
}

impl Drop for QueueDispatcher {
    fn drop(&mut self) {
        // Disconnect so the worker loop ends after draining.
        self.tx.take();
        if let Some(handle) = self.join_handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if let Err(e) = handle.join() {
                tracing::error!("dispatcher thread panicked: {:?}", e);
            }
        }
    }
}

/// Receives changes to the derived pump status.
pub trait PumpStatusObserver: Send + Sync {
    fn did_update_status(&self, new: &PumpManagerStatus, old: &PumpManagerStatus);
}

/// Receives every committed change to the pump state.
pub trait PodStatusObserver: Send + Sync {
    fn did_update_pod_status(&self, state: &PumpState);
}

/// Host hooks. Every method defaults to doing nothing.
pub trait PumpManagerDelegate: Send + Sync {
    /// The state changed; persist it if the host keeps raw state.
    fn did_update_state(&self, _state: &PumpState) {}
    fn did_update_status(&self, _new: &PumpManagerStatus, _old: &PumpManagerStatus) {}
    /// Pump data is fresh and the dosing loop may run.
    fn recommends_loop(&self) {}
    fn did_error(&self, _error: &PumpManagerError) {}
}

/// Token returned by registration; pass it back to remove the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

struct Entry<T: ?Sized> {
    id: u64,
    observer: Arc<T>,
    dispatcher: Arc<dyn Dispatcher>,
}

pub struct ObserverRegistry<T: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, observer: Arc<T>, dispatcher: Arc<dyn Dispatcher>) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                observer,
                dispatcher,
            });
        ObserverHandle(id)
    }

    /// Remove an observer. Returns false if the handle was already removed.
    pub fn remove(&self, handle: ObserverHandle) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.id != handle.0);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch one job per observer, built by `make`.
    pub fn notify(&self, make: impl Fn(Arc<T>) -> Job) {
        let targets: Vec<(Arc<T>, Arc<dyn Dispatcher>)> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| (Arc::clone(&e.observer), Arc::clone(&e.dispatcher)))
            .collect();
        for (observer, dispatcher) in targets {
            dispatcher.dispatch(make(observer));
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the single optional delegate and its dispatcher.
#[derive(Default)]
pub struct DelegateSlot {
    inner: Mutex<Option<(Arc<dyn PumpManagerDelegate>, Arc<dyn Dispatcher>)>>,
}

impl DelegateSlot {
    pub fn set(&self, delegate: Arc<dyn PumpManagerDelegate>, dispatcher: Arc<dyn Dispatcher>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some((delegate, dispatcher));
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn notify(&self, f: impl FnOnce(&dyn PumpManagerDelegate) + Send + 'static) {
        let current = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some((delegate, dispatcher)) = current {
            dispatcher.dispatch(Box::new(move || f(delegate.as_ref())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    trait Ping: Send + Sync {
        fn ping(&self);
    }

    struct Counter(AtomicUsize);

    impl Ping for Counter {
        fn ping(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn removal_is_idempotent() {
        let reg: ObserverRegistry<dyn Ping> = ObserverRegistry::new();
        let c = Arc::new(Counter(AtomicUsize::new(0)));
        let h = reg.insert(c.clone(), Arc::new(InlineDispatcher));
        reg.notify(|o| Box::new(move || o.ping()));
        assert!(reg.remove(h));
        assert!(!reg.remove(h));
        reg.notify(|o| Box::new(move || o.ping()));
        assert_eq!(c.0.load(Ordering::SeqCst), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn queue_dispatcher_runs_jobs_in_order() {
        let q = QueueDispatcher::spawn("test-dispatch").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let s = seen.clone();
            q.dispatch(Box::new(move || s.lock().unwrap().push(i)));
        }
        q.flush();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn delegate_slot_without_delegate_is_silent() {
        let slot = DelegateSlot::default();
        assert!(!slot.is_set());
        slot.notify(|d| d.recommends_loop());
    }
}
