//! Per-call deadline for collaborator calls.
//!
//! Blocking providers cannot be cancelled, so the call runs on a short-lived
//! worker thread and the cycle waits on a channel. On timeout the worker is
//! abandoned; its late result is dropped, or handed to a callback with
//! [`bounded_or_late`].

use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use pairtrader_core::provider::ProviderError;

/// Run `call` with a deadline. A late result is dropped.
pub fn bounded<T, F>(name: &str, timeout: Duration, call: F) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    bounded_or_late(name, timeout, call, |_| {})
}

/// Like [`bounded`], but a result that arrives after the deadline is handed
/// to `late` on the worker thread instead of being dropped. Exactly one of
/// the caller and `late` sees the result.
pub fn bounded_or_late<T, F, L>(name: &str, timeout: Duration, call: F, late: L) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
    L: FnOnce(Result<T, ProviderError>) + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let abandoned = Arc::new(Mutex::new(false));
    let worker_abandoned = Arc::clone(&abandoned);

    thread::Builder::new()
        .name(format!("pairtrader-{name}"))
        .spawn(move || {
            let result = call();
            let guard = worker_abandoned.lock().unwrap_or_else(PoisonError::into_inner);
            if *guard {
                drop(guard);
                late(result);
            } else {
                // Sent under the lock, so the caller either receives it or
                // has not yet given up.
                let _ = tx.send(result);
            }
        })
        .map_err(|e| ProviderError::Unavailable(format!("failed to spawn {name} call: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            let mut guard = abandoned.lock().unwrap_or_else(PoisonError::into_inner);
            match rx.try_recv() {
                // Finished while the deadline was being handled.
                Ok(result) => result,
                Err(TryRecvError::Empty) => {
                    *guard = true;
                    Err(ProviderError::Timeout(timeout))
                }
                Err(TryRecvError::Disconnected) => {
                    Err(ProviderError::Unavailable(format!("{name} call panicked")))
                }
            }
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(ProviderError::Unavailable(format!("{name} call panicked")))
        }
    }
}
