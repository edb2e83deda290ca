//! Global admission control
//!
//! At most `ceiling` requests execute at once across all sessions. Up to
//! `queue_depth` further requests may wait for a slot; beyond that new
//! requests are rejected instead of queued.
//!
//! The per-session exclusive gate is bounded the same way: at most
//! `exclusive_queue_depth` exclusive requests of one session may wait behind
//! the one currently running.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::domain::DispatchError;
use crate::session::Session;

#[derive(Debug)]
pub struct Admission {
    permits: Arc<Semaphore>,
    ceiling: usize,
    queue_depth: usize,
    exclusive_queue_depth: usize,
    waiting: AtomicUsize,
}

/// Decrements the waiter count however the wait ends
struct Waiting<'a>(&'a AtomicUsize);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Admission {
    pub fn new(ceiling: usize, queue_depth: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            queue_depth,
            exclusive_queue_depth: queue_depth,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Bound the per-session exclusive queue separately from the global one
    pub fn with_exclusive_queue_depth(mut self, depth: usize) -> Self {
        self.exclusive_queue_depth = depth;
        self
    }

    /// Wait for an execution slot
    ///
    /// The returned permit frees the slot when dropped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, DispatchError> {
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            return Ok(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = Waiting(&self.waiting);
        if queued >= self.queue_depth {
            return Err(DispatchError::AdmissionRejected {
                in_flight: self.in_flight(),
                queued,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| DispatchError::AdmissionRejected {
                    in_flight: self.in_flight(),
                    queued,
                })
            }
        }
    }

    /// Wait for the session's exclusive gate
    ///
    /// Waiters are served in arrival order. The permit reopens the gate
    /// when dropped.
    pub async fn acquire_exclusive(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, DispatchError> {
        let gate = session.exclusive_gate();
        if let Ok(permit) = gate.clone().try_acquire_owned() {
            return Ok(permit);
        }

        let waiting = session.exclusive_waiting();
        let queued = waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = Waiting(waiting);
        if queued >= self.exclusive_queue_depth {
            return Err(DispatchError::AdmissionRejected {
                in_flight: self.in_flight(),
                queued,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            permit = gate.acquire_owned() => permit.map_err(|_| DispatchError::Cancelled),
        }
    }

    /// Requests currently holding an execution slot
    pub fn in_flight(&self) -> usize {
        self.ceiling - self.permits.available_permits()
    }

    /// Requests waiting for a slot
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn exclusive_queue_depth(&self) -> usize {
        self.exclusive_queue_depth
    }
}
