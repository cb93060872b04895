//! Call session store
//!
//! In-memory map from [`CallId`] to its [`CallSession`]. Two lock levels:
//!
//! - one `RwLock` over the map for structural operations (create/remove/sweep)
//! - one `Mutex` per session serialising its transitions
//!
//! Lock order is always map → session. Code holding a session lock must never
//! take the map lock, which is why removal relies on a mirrored state kept in
//! each cell instead of locking the session.
//!
//! Poisoning of any lock means a panic interrupted a mutation, leaving call
//! state half-applied. The store then drops every in-flight session: a call
//! the platform has to re-signal is better than a call in an undefined state.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::{BridgeError, BridgeResult};
use crate::push::CallId;

use super::session::CallSession;
use super::state::CallState;

/// Retention limits applied by [`CallSessionStore::sweep_expired`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// How long a terminal session may wait for teardown acknowledgment
    pub terminal_grace: Duration,
    /// How long a finished call id is remembered to reject redelivered pushes
    pub tombstone_ttl: Duration,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            terminal_grace: Duration::from_secs(30),
            tombstone_ttl: Duration::from_secs(300),
        }
    }
}

/// One stored session plus a lock-free mirror of its state
#[derive(Debug)]
pub struct SessionCell {
    pub(crate) session: Mutex<CallSession>,
    state: AtomicU8,
}

impl SessionCell {
    fn new(session: CallSession) -> Self {
        let state = AtomicU8::new(encode_state(session.state()));
        Self {
            session: Mutex::new(session),
            state,
        }
    }

    /// Last state published by a released session guard
    pub fn state(&self) -> CallState {
        decode_state(self.state.load(Ordering::Acquire))
    }
}

/// Exclusive access to one session
///
/// Publishes the session's state to the cell mirror when dropped.
pub struct SessionGuard<'a> {
    cell: &'a SessionCell,
    guard: MutexGuard<'a, CallSession>,
}

impl Deref for SessionGuard<'_> {
    type Target = CallSession;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.cell
            .state
            .store(encode_state(self.guard.state()), Ordering::Release);
    }
}

/// Result of [`CallSessionStore::get_or_create`]
#[derive(Debug, Clone)]
pub enum Slot {
    /// A new `Pending` session was inserted
    Created(Arc<SessionCell>),
    /// A session already existed for the call
    Existing(Arc<SessionCell>),
    /// The call finished recently; no session is created
    Closed,
}

/// Aggregate store statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub pending: usize,
    pub ringing: usize,
    pub answered: usize,
    pub active: usize,
    pub terminal: usize,
    pub tombstones: usize,
    pub created_total: u64,
    pub removed_total: u64,
    pub swept_total: u64,
    pub resets: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<CallId, Arc<SessionCell>>,
    closed: HashMap<CallId, Instant>,
}

/// Map of in-flight call sessions
#[derive(Debug)]
pub struct CallSessionStore {
    inner: RwLock<StoreInner>,
    limits: StoreLimits,
    created_total: AtomicU64,
    removed_total: AtomicU64,
    swept_total: AtomicU64,
    resets: AtomicU64,
}

impl CallSessionStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            limits,
            created_total: AtomicU64::new(0),
            removed_total: AtomicU64::new(0),
            swept_total: AtomicU64::new(0),
            resets: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Look up the session for `call_id`, creating a `Pending` one if absent
    ///
    /// Atomic with respect to concurrent callers: exactly one of them observes
    /// [`Slot::Created`]. Recently finished calls yield [`Slot::Closed`].
    pub fn get_or_create(&self, call_id: &CallId) -> Slot {
        if let Some(cell) = self.read_inner().sessions.get(call_id) {
            return Slot::Existing(cell.clone());
        }

        let mut inner = self.write_inner();
        if let Some(cell) = inner.sessions.get(call_id) {
            return Slot::Existing(cell.clone());
        }
        if inner.closed.contains_key(call_id) {
            debug!(%call_id, "Call already completed, not recreating session");
            return Slot::Closed;
        }

        let cell = Arc::new(SessionCell::new(CallSession::new(call_id.clone())));
        inner.sessions.insert(call_id.clone(), cell.clone());
        self.created_total.fetch_add(1, Ordering::Relaxed);
        debug!(%call_id, "Created call session");
        Slot::Created(cell)
    }

    /// Snapshot of the session for `call_id`
    pub fn get(&self, call_id: &CallId) -> Option<CallSession> {
        let cell = self.cell(call_id)?;
        let snapshot = self.lock(&cell).ok().map(|guard| (*guard).clone());
        snapshot
    }

    /// Remove a terminal session, leaving a tombstone for its call id
    ///
    /// Returns the final snapshot when the session lock is free, otherwise a
    /// session rebuilt from the mirrored state.
    pub fn remove(&self, call_id: &CallId) -> BridgeResult<CallSession> {
        let cell = {
            let mut inner = self.write_inner();
            let state = match inner.sessions.get(call_id) {
                Some(cell) => cell.state(),
                None => return Err(BridgeError::session_not_found(call_id)),
            };
            if !state.is_terminal() {
                return Err(BridgeError::SessionNotTerminal {
                    call_id: call_id.clone(),
                    state,
                });
            }

            inner.closed.insert(call_id.clone(), Instant::now());
            inner.sessions.remove(call_id)
        };
        let Some(cell) = cell else {
            return Err(BridgeError::session_not_found(call_id));
        };

        self.removed_total.fetch_add(1, Ordering::Relaxed);
        let snapshot = match cell.session.try_lock() {
            Ok(session) => Some((*session).clone()),
            Err(TryLockError::Poisoned(poisoned)) => Some((*poisoned.into_inner()).clone()),
            Err(TryLockError::WouldBlock) => None,
        };
        let removed = snapshot.unwrap_or_else(|| CallSession::terminated(call_id.clone(), cell.state()));
        info!(%call_id, final_state = %removed.state(), "Removed call session");
        Ok(removed)
    }

    /// Remember a call id that finished before any session existed for it
    ///
    /// Returns false when a session exists.
    pub fn close_unknown(&self, call_id: &CallId) -> bool {
        let mut inner = self.write_inner();
        if inner.sessions.contains_key(call_id) {
            return false;
        }
        inner.closed.insert(call_id.clone(), Instant::now());
        true
    }

    pub fn is_closed(&self, call_id: &CallId) -> bool {
        self.read_inner().closed.contains_key(call_id)
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.read_inner().sessions.contains_key(call_id)
    }

    /// Remove sessions stuck past their limits
    ///
    /// Terminal sessions go after [`StoreLimits::terminal_grace`] in their
    /// final state; non-terminal ones after `max_age` since creation. Expired
    /// tombstones are pruned too. Returns the number of sessions removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        self.take_expired(max_age).map_or(0, |removed| removed.len())
    }

    /// Like [`sweep_expired`](Self::sweep_expired) but hands the removed
    /// sessions back, ring timers detached, so the caller can tear them down
    ///
    /// A poisoned session lock found along the way resets the store and fails
    /// with [`BridgeError::StoreCorrupted`].
    pub(crate) fn take_expired(&self, max_age: Duration) -> BridgeResult<Vec<CallSession>> {
        let now = Instant::now();
        let terminal_grace = self.limits.terminal_grace;
        let tombstone_ttl = self.limits.tombstone_ttl;
        let mut removed = Vec::new();
        let mut poisoned = false;

        {
            let mut inner = self.write_inner();
            let StoreInner { sessions, closed } = &mut *inner;

            closed.retain(|_, at| now.duration_since(*at) < tombstone_ttl);

            sessions.retain(|call_id, cell| {
                let mut session = match cell.session.try_lock() {
                    Ok(session) => session,
                    Err(TryLockError::WouldBlock) => return true,
                    Err(TryLockError::Poisoned(_)) => {
                        poisoned = true;
                        return true;
                    }
                };

                let expired = if session.is_terminal() {
                    now.duration_since(session.last_transition_at()) >= terminal_grace
                } else {
                    now.duration_since(session.created_at()) >= max_age
                };
                if !expired {
                    return true;
                }

                let mut swept = (*session).clone();
                swept.ring_timer = session.ring_timer.take();
                closed.insert(call_id.clone(), now);
                removed.push(swept);
                false
            });
        }

        if poisoned {
            for session in &mut removed {
                session.cancel_ring_timer();
            }
            self.reset();
            return Err(BridgeError::store_corrupted("session lock poisoned during sweep"));
        }

        if !removed.is_empty() {
            self.swept_total.fetch_add(removed.len() as u64, Ordering::Relaxed);
            info!(count = removed.len(), "Swept expired call sessions");
        }
        Ok(removed)
    }

    /// Snapshot of the stored cells, for scans that lock sessions one by one
    pub(crate) fn cells(&self) -> Vec<Arc<SessionCell>> {
        self.read_inner().sessions.values().cloned().collect()
    }

    /// Drop every session and tombstone
    ///
    /// Ring timers of dropped sessions are cancelled. Returns the number of
    /// sessions dropped.
    pub fn reset(&self) -> usize {
        let drained: Vec<Arc<SessionCell>> = {
            let mut inner = self.write_inner();
            inner.closed.clear();
            inner.sessions.drain().map(|(_, cell)| cell).collect()
        };

        for cell in &drained {
            cancel_timer(cell);
        }

        self.resets.fetch_add(1, Ordering::Relaxed);
        error!(dropped = drained.len(), "Call session store reset");
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.read_inner().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.read_inner();
        let mut stats = StoreStats {
            total: inner.sessions.len(),
            tombstones: inner.closed.len(),
            created_total: self.created_total.load(Ordering::Relaxed),
            removed_total: self.removed_total.load(Ordering::Relaxed),
            swept_total: self.swept_total.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            ..Default::default()
        };

        for cell in inner.sessions.values() {
            match cell.state() {
                CallState::Pending => stats.pending += 1,
                CallState::Ringing => stats.ringing += 1,
                CallState::Answered => stats.answered += 1,
                CallState::Active => stats.active += 1,
                CallState::Ended | CallState::Declined | CallState::Missed => stats.terminal += 1,
            }
        }
        stats
    }

    pub(crate) fn cell(&self, call_id: &CallId) -> Option<Arc<SessionCell>> {
        self.read_inner().sessions.get(call_id).cloned()
    }

    /// Acquire the per-call lock
    ///
    /// A poisoned lock resets the whole store and fails with
    /// [`BridgeError::StoreCorrupted`]. Must not be called while holding the
    /// map lock or another session lock.
    pub(crate) fn lock<'a>(&self, cell: &'a SessionCell) -> BridgeResult<SessionGuard<'a>> {
        match cell.session.lock() {
            Ok(guard) => Ok(SessionGuard { cell, guard }),
            Err(poisoned) => {
                let call_id = poisoned.get_ref().call_id().clone();
                drop(poisoned);
                error!(%call_id, "Call session lock poisoned, resetting store");
                self.reset();
                Err(BridgeError::store_corrupted(format!(
                    "session lock for call {} was poisoned",
                    call_id
                )))
            }
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, StoreInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(_) => {
                // Recover through the write path, which clears the map
                drop(self.write_inner());
                self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
            }
        }
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, StoreInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.closed.clear();
                let dropped: Vec<Arc<SessionCell>> = guard.sessions.drain().map(|(_, cell)| cell).collect();
                for cell in &dropped {
                    cancel_timer(cell);
                }
                self.inner.clear_poison();
                self.resets.fetch_add(1, Ordering::Relaxed);
                error!(dropped = dropped.len(), "Call session map lock poisoned, store reset");
                guard
            }
        }
    }
}

/// Best effort; a session locked elsewhere keeps its timer, which finds no
/// session when it fires
fn cancel_timer(cell: &SessionCell) {
    let session = match cell.session.try_lock() {
        Ok(session) => Some(session),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    };
    if let Some(mut session) = session {
        session.cancel_ring_timer();
    }
}

impl Default for CallSessionStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

fn encode_state(state: CallState) -> u8 {
    match state {
        CallState::Pending => 0,
        CallState::Ringing => 1,
        CallState::Answered => 2,
        CallState::Active => 3,
        CallState::Ended => 4,
        CallState::Declined => 5,
        CallState::Missed => 6,
    }
}

fn decode_state(raw: u8) -> CallState {
    match raw {
        0 => CallState::Pending,
        1 => CallState::Ringing,
        2 => CallState::Answered,
        3 => CallState::Active,
        4 => CallState::Ended,
        5 => CallState::Declined,
        _ => CallState::Missed,
    }
}
