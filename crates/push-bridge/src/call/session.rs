//! Per-call session record
//!
//! A [`CallSession`] is owned by the [`CallSessionStore`](super::CallSessionStore)
//! and only mutated while its per-call lock is held. Everything handed out to
//! callers is a clone.

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TransitionError;
use crate::push::{CallId, IncomingCallEvent};

use super::state::{next_state, CallSignal, CallState, StateChange};

/// Cancelable ring timer owned by the session
///
/// The generation lets a timer that already fired (and is waiting for the
/// per-call lock) detect that it was superseded.
#[derive(Debug, Clone)]
pub(crate) struct RingTimer {
    pub(crate) generation: u64,
    pub(crate) handle: AbortHandle,
}

impl RingTimer {
    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}

/// State-machine instance for one call
#[derive(Debug, Clone)]
pub struct CallSession {
    call_id: CallId,
    state: CallState,
    created_at: Instant,
    last_transition_at: Instant,

    /// Decoded push, absent for a cold-start placeholder
    event: Option<IncomingCallEvent>,
    /// User answered before the push was decoded
    deferred_answer: bool,
    /// Presenter confirmed the call UI; teardown is owed on termination
    surfaced: bool,
    on_hold: bool,
    muted: bool,
    teardown_pending: bool,
    media_overdue_reported: bool,

    pub(crate) ring_timer: Option<RingTimer>,
}

impl CallSession {
    /// Create a session in `Pending`
    pub fn new(call_id: CallId) -> Self {
        let now = Instant::now();
        Self {
            call_id,
            state: CallState::Pending,
            created_at: now,
            last_transition_at: now,
            event: None,
            deferred_answer: false,
            surfaced: false,
            on_hold: false,
            muted: false,
            teardown_pending: false,
            media_overdue_reported: false,
            ring_timer: None,
        }
    }

    /// Bare record of a finished call whose live session could not be read
    pub(crate) fn terminated(call_id: CallId, state: CallState) -> Self {
        let mut session = Self::new(call_id);
        session.state = state;
        session
    }

    /// Apply a signal through the transition table
    ///
    /// On success the state and `last_transition_at` are updated; on error the
    /// session is left untouched.
    pub fn apply(&mut self, signal: CallSignal) -> Result<StateChange, TransitionError> {
        let from = self.state;
        let to = next_state(from, signal)?;

        self.state = to;
        self.last_transition_at = Instant::now();
        if signal == CallSignal::Surfaced {
            self.surfaced = true;
        }

        debug!(call_id = %self.call_id, %from, %to, ?signal, "Call state transition");
        Ok(StateChange { from, to, signal })
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_transition_at(&self) -> Instant {
        self.last_transition_at
    }

    /// Time spent in the current state
    pub fn time_in_state(&self) -> std::time::Duration {
        self.last_transition_at.elapsed()
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn event(&self) -> Option<&IncomingCallEvent> {
        self.event.as_ref()
    }

    pub fn caller_display_name(&self) -> Option<&str> {
        self.event.as_ref().map(|e| e.caller_display_name())
    }

    pub fn has_video(&self) -> bool {
        self.event.as_ref().is_some_and(|e| e.has_video())
    }

    /// Placeholder created by a user action before the push arrived
    pub fn is_placeholder(&self) -> bool {
        self.event.is_none()
    }

    pub fn is_surfaced(&self) -> bool {
        self.surfaced
    }

    pub fn has_deferred_answer(&self) -> bool {
        self.deferred_answer
    }

    pub fn is_on_hold(&self) -> bool {
        self.on_hold
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_teardown_pending(&self) -> bool {
        self.teardown_pending
    }

    /// Merge the decoded push; returns false when an event was already merged
    pub(crate) fn merge_event(&mut self, event: IncomingCallEvent) -> bool {
        if self.event.is_some() {
            return false;
        }
        self.event = Some(event);
        true
    }

    pub(crate) fn defer_answer(&mut self) -> bool {
        !std::mem::replace(&mut self.deferred_answer, true)
    }

    pub(crate) fn take_deferred_answer(&mut self) -> bool {
        std::mem::take(&mut self.deferred_answer)
    }

    pub(crate) fn set_on_hold(&mut self, on_hold: bool) {
        self.on_hold = on_hold;
    }

    pub(crate) fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub(crate) fn set_teardown_pending(&mut self, pending: bool) {
        self.teardown_pending = pending;
    }

    /// Returns true the first time it is called
    pub(crate) fn mark_media_overdue_reported(&mut self) -> bool {
        !std::mem::replace(&mut self.media_overdue_reported, true)
    }

    pub(crate) fn cancel_ring_timer(&mut self) {
        if let Some(timer) = self.ring_timer.take() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn session(id: &str) -> CallSession {
        CallSession::new(CallId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn test_new_session_is_pending_placeholder() {
        let session = session("abc");
        assert_eq!(session.state(), CallState::Pending);
        assert!(session.is_placeholder());
        assert!(!session.is_surfaced());
        assert_eq!(session.created_at(), session.last_transition_at());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_updates_transition_time() {
        let mut session = session("abc");
        tokio::time::advance(std::time::Duration::from_secs(5)).await;

        let change = session.apply(CallSignal::Surfaced).unwrap();
        assert_eq!(change.from, CallState::Pending);
        assert_eq!(change.to, CallState::Ringing);
        assert!(session.is_surfaced());
        assert_eq!(
            session.last_transition_at() - session.created_at(),
            std::time::Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_session_untouched() {
        let mut session = session("abc");
        let before = session.last_transition_at();
        assert!(session.apply(CallSignal::MediaConnected).is_err());
        assert_eq!(session.state(), CallState::Pending);
        assert_eq!(session.last_transition_at(), before);
    }

    #[tokio::test]
    async fn test_merge_event_once() {
        let mut session = session("abc");
        let event = IncomingCallEvent::new(CallId::parse("abc").unwrap(), "Alice", true, Utc::now());
        assert!(session.merge_event(event.clone()));
        assert!(!session.merge_event(event));
        assert_eq!(session.caller_display_name(), Some("Alice"));
        assert!(session.has_video());
    }

    #[tokio::test]
    async fn test_deferred_answer_flag() {
        let mut session = session("xyz");
        assert!(session.defer_answer());
        assert!(!session.defer_answer());
        assert!(session.take_deferred_answer());
        assert!(!session.take_deferred_answer());
    }
}
