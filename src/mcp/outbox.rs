//! Bounded per-session queue of responses waiting to be written to the SSE
//! stream
//!
//! When the queue is full the oldest queued `partial` response is evicted to
//! make room. Terminal responses are never evicted; if nothing can be evicted
//! the sender waits until the client drains the queue or the session closes.

use std::collections::VecDeque;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::Response;

/// The session behind this outbox has gone away
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("outbound queue is closed")]
pub struct OutboxClosed;

#[derive(Debug, Default)]
struct OutboxState {
    queue: VecDeque<Response>,
    closed: bool,
    evicted: u64,
}

/// Single-consumer outbound queue for one session
#[derive(Debug)]
pub struct Outbox {
    capacity: usize,
    state: Mutex<OutboxState>,
    readable: Notify,
    writable: Notify,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(OutboxState::default()),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Queue a response for delivery
    pub async fn send(&self, response: Response) -> Result<(), OutboxClosed> {
        loop {
            let writable = self.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(OutboxClosed);
                }

                if state.queue.len() < self.capacity {
                    state.queue.push_back(response);
                    drop(state);
                    self.readable.notify_one();
                    return Ok(());
                }

                if let Some(position) = state.queue.iter().position(|r| !r.is_terminal()) {
                    if let Some(evicted) = state.queue.remove(position) {
                        debug!(
                            request_id = ?evicted.request_id,
                            seq = evicted.seq,
                            "Outbound queue full, dropped oldest partial response"
                        );
                    }
                    state.evicted += 1;
                    state.queue.push_back(response);
                    drop(state);
                    self.readable.notify_one();
                    return Ok(());
                }
            }

            // Full of terminal responses: wait for the client to read
            writable.await;
        }
    }

    /// Take the next response, waiting if none is queued
    ///
    /// Returns `None` once the outbox is closed and fully drained.
    pub async fn recv(&self) -> Option<Response> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(response) = state.queue.pop_front() {
                    drop(state);
                    self.writable.notify_waiters();
                    return Some(response);
                }
                if state.closed {
                    return None;
                }
            }
            self.readable.notified().await;
        }
    }

    /// Stop accepting responses; already queued ones can still be drained
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.writable.notify_waiters();
        self.readable.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of partial responses dropped because the queue was full
    pub fn evicted(&self) -> u64 {
        self.state.lock().evicted
    }
}
