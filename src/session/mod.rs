//! Session registry: one logical session per connected SSE client
//!
//! A session owns its outbound queue, a cancellation token that parents the
//! token of every request it accepts, and the table of requests that were
//! accepted but have not yet produced their terminal response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{DispatchError, RequestId, SessionId};
use crate::mcp::Outbox;

/// Why a session is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The SSE connection went away; nothing can be delivered any more
    Disconnected,
    /// No activity for longer than the idle timeout
    IdleTimeout,
    /// The server is shutting down
    Shutdown,
}

#[derive(Debug)]
struct SessionState {
    alive: bool,
    last_activity: Instant,
    outstanding: HashMap<RequestId, CancellationToken>,
}

/// Server-side state of one connected client
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    outbox: Outbox,
    exclusive_gate: Arc<Semaphore>,
    exclusive_waiting: AtomicUsize,
    state: Mutex<SessionState>,
    drained: Notify,
}

impl Session {
    fn new(outbound_capacity: usize) -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            outbox: Outbox::new(outbound_capacity),
            exclusive_gate: Arc::new(Semaphore::new(1)),
            exclusive_waiting: AtomicUsize::new(0),
            state: Mutex::new(SessionState {
                alive: true,
                last_activity: Instant::now(),
                outstanding: HashMap::new(),
            }),
            drained: Notify::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Number of accepted requests still waiting for their terminal response
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// FIFO gate serializing `exclusive-per-session` tools
    pub(crate) fn exclusive_gate(&self) -> Arc<Semaphore> {
        self.exclusive_gate.clone()
    }

    pub(crate) fn exclusive_waiting(&self) -> &AtomicUsize {
        &self.exclusive_waiting
    }

    /// Exclusive requests waiting behind the one holding the gate
    pub fn queued_exclusive(&self) -> usize {
        self.exclusive_waiting.load(Ordering::SeqCst)
    }

    pub fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    /// Accept a request, returning the token that cancels it
    ///
    /// The token is a child of the session token, so closing the session
    /// cancels every request it accepted.
    pub fn begin_request(&self, request_id: &RequestId) -> Result<CancellationToken, DispatchError> {
        let mut state = self.state.lock();
        if !state.alive {
            return Err(DispatchError::UnknownSession {
                id: self.id.to_string(),
            });
        }
        if state.outstanding.contains_key(request_id) {
            return Err(DispatchError::DuplicateRequest {
                request_id: request_id.to_string(),
            });
        }

        let token = self.cancel.child_token();
        state.outstanding.insert(request_id.clone(), token.clone());
        state.last_activity = Instant::now();
        Ok(token)
    }

    /// Mark a request as terminally resolved
    pub fn finish_request(&self, request_id: &RequestId) {
        let now_empty = {
            let mut state = self.state.lock();
            state.outstanding.remove(request_id);
            state.last_activity = Instant::now();
            state.outstanding.is_empty()
        };
        if now_empty {
            self.drained.notify_waiters();
        }
    }

    /// Signal cancellation to one outstanding request
    ///
    /// Returns false if no such request is outstanding.
    pub fn cancel_request(&self, request_id: &RequestId) -> bool {
        let token = self.state.lock().outstanding.get(request_id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Flip the liveness flag; true only for the first caller
    fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.alive, false)
    }

    async fn wait_drained(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Owns every live session of the process
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    outbound_capacity: usize,
    idle_timeout: Duration,
    close_grace: Duration,
}

impl SessionRegistry {
    pub fn new(outbound_capacity: usize, idle_timeout: Duration, close_grace: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            outbound_capacity,
            idle_timeout,
            close_grace,
        }
    }

    /// Create a session with zero outstanding requests
    pub fn open(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(self.outbound_capacity));
        self.sessions.insert(session.id().clone(), session.clone());
        info!(session_id = %session.id(), "Session opened");
        session
    }

    /// Look up a live session
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>, DispatchError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .filter(|session| session.is_alive())
            .ok_or_else(|| DispatchError::UnknownSession { id: id.to_string() })
    }

    pub fn touch(&self, id: &SessionId) -> Result<(), DispatchError> {
        self.get(id)?.touch();
        Ok(())
    }

    /// Close a session and cancel everything it has outstanding
    ///
    /// The session stays in the map until its outstanding requests have
    /// delivered their terminal responses or the grace period runs out.
    /// Returns false if the session was unknown or already closing.
    pub fn close(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some(session) = self.sessions.get(id).map(|entry| entry.value().clone()) else {
            return false;
        };
        if !session.mark_closed() {
            return false;
        }

        info!(
            session_id = %id,
            ?reason,
            outstanding = session.outstanding(),
            "Closing session"
        );
        session.cancel.cancel();
        if reason == CloseReason::Disconnected {
            session.outbox().close();
        }

        let sessions = self.sessions.clone();
        let grace = self.close_grace;
        let reap = async move {
            tokio::select! {
                _ = session.wait_drained() => {
                    debug!(session_id = %session.id(), "Session drained");
                }
                _ = tokio::time::sleep(grace) => {
                    warn!(
                        session_id = %session.id(),
                        outstanding = session.outstanding(),
                        "Grace period elapsed, reclaiming session"
                    );
                }
            }
            session.outbox().close();
            sessions.remove(session.id());
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(reap);
            }
            Err(_) => {
                // No runtime left (process teardown): reclaim immediately
                if let Some((_, session)) = self.sessions.remove(id) {
                    session.outbox().close();
                }
            }
        }
        true
    }

    /// Close every session idle for longer than the configured timeout
    ///
    /// Sessions with outstanding requests are never considered idle.
    pub fn sweep_idle(&self) -> usize {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.is_alive() && session.outstanding() == 0 && session.idle_for() >= self.idle_timeout
            })
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|id| self.close(id, CloseReason::IdleTimeout))
            .count()
    }

    /// Run `sweep_idle` periodically until `shutdown` fires
    pub fn spawn_idle_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = (self.idle_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(30));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let closed = self.sweep_idle();
                        if closed > 0 {
                            info!(closed, "Closed idle sessions");
                        }
                    }
                }
            }
        })
    }

    /// Close all sessions, used on shutdown
    pub fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.close(&id, CloseReason::Shutdown);
        }
    }

    /// Number of live (not closing) sessions
    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|entry| entry.value().is_alive()).count()
    }

    /// Number of sessions still held, including ones draining after close
    pub fn held_count(&self) -> usize {
        self.sessions.len()
    }
}
