//! One-shot results of asynchronous pump operations.

use std::time::Duration;

use crossbeam_channel as xch;
use pump_traits::{CommError, CommResult, Completion};

use crate::error::{PumpManagerError, PumpResult};

/// Result of an operation that resolves once the pod answers.
///
/// Dropping a `Pending` does not cancel the operation.
#[derive(Debug)]
pub struct Pending<T> {
    rx: xch::Receiver<PumpResult<T>>,
}

pub(crate) struct Resolver<T> {
    tx: xch::Sender<PumpResult<T>>,
}

pub(crate) fn pending<T>() -> (Resolver<T>, Pending<T>) {
    let (tx, rx) = xch::bounded(1);
    (Resolver { tx }, Pending { rx })
}

impl<T> Resolver<T> {
    pub(crate) fn resolve(self, result: PumpResult<T>) {
        // Receiver may be gone; the operation still committed.
        let _ = self.tx.send(result);
    }
}

fn lost<T>() -> PumpResult<T> {
    Err(PumpManagerError::CommunicationFailure(CommError::NoResponse))
}

impl<T> Pending<T> {
    /// Already-resolved result, used for admission failures.
    pub fn ready(result: PumpResult<T>) -> Self {
        let (resolver, pending) = pending();
        resolver.resolve(result);
        pending
    }

    /// Non-blocking poll.
    pub fn try_result(&self) -> Option<PumpResult<T>> {
        match self.rx.try_recv() {
            Ok(r) => Some(r),
            Err(xch::TryRecvError::Empty) => None,
            Err(xch::TryRecvError::Disconnected) => Some(lost()),
        }
    }

    pub fn wait(self) -> PumpResult<T> {
        self.rx.recv().unwrap_or_else(|_| lost())
    }

    /// Wait at most `timeout`; `None` if the result has not arrived yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<PumpResult<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(r) => Some(r),
            Err(xch::RecvTimeoutError::Timeout) => None,
            Err(xch::RecvTimeoutError::Disconnected) => Some(lost()),
        }
    }
}

/// Completion handed to the pod façade.
///
/// If the façade drops it without calling it, the callback still runs with
/// `NoResponse`, so the transition tag is always cleared.
struct CompletionGuard<T> {
    inner: Option<Box<dyn FnOnce(CommResult<T>) + Send + 'static>>,
}

impl<T> CompletionGuard<T> {
    fn complete(mut self, result: CommResult<T>) {
        if let Some(f) = self.inner.take() {
            f(result);
        }
    }
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if let Some(f) = self.inner.take() {
            tracing::warn!("pod completion dropped without a response");
            f(Err(CommError::NoResponse));
        }
    }
}

pub(crate) fn guarded<T: 'static>(f: impl FnOnce(CommResult<T>) + Send + 'static) -> Completion<T> {
    let guard = CompletionGuard {
        inner: Some(Box::new(f)),
    };
    Box::new(move |result| guard.complete(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn ready_resolves_immediately() {
        let p = Pending::ready(Err::<(), _>(PumpManagerError::Busy));
        assert_eq!(p.try_result(), Some(Err(PumpManagerError::Busy)));
    }

    #[test]
    fn dropped_resolver_reports_lost_response() {
        let (resolver, p) = pending::<u8>();
        assert_eq!(p.try_result(), None);
        drop(resolver);
        assert_eq!(
            p.wait(),
            Err(PumpManagerError::CommunicationFailure(CommError::NoResponse))
        );
    }

    #[test]
    fn wait_timeout_returns_none_while_pending() {
        let (_resolver, p) = pending::<u8>();
        assert_eq!(p.wait_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn dropped_completion_fires_no_response() {
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let c: Completion<u8> = guarded(move |r| *s.lock().unwrap() = Some(r));
        drop(c);
        assert_eq!(*seen.lock().unwrap(), Some(Err(CommError::NoResponse)));
    }

    #[test]
    fn called_completion_fires_once() {
        let count = Arc::new(Mutex::new(0));
        let c2 = count.clone();
        let c: Completion<u8> = guarded(move |_| *c2.lock().unwrap() += 1);
        c(Ok(1));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
