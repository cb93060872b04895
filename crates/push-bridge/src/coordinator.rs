//! Bridge coordinator
//!
//! [`BridgeCoordinator`] is the single entry point the embedding application
//! talks to. It receives decoded pushes, user actions from the native call UI
//! and connection signals from the media stack, and drives the matching
//! session through the state machine:
//!
//! ```text
//!  push bytes ──► decode ──┐
//!                          ▼
//!  user action ──► BridgeCoordinator ──► CallSessionStore ──► CallSession
//!  media signal ─┘        │                                     │
//!                         ├──► CallPresenter (surface/teardown) │
//!                         └──► BridgeEvent broadcast ◄──────────┘
//! ```
//!
//! Every entry point is synchronous and only blocks for the per-call lock, so
//! it can be called straight from platform callbacks on any thread. Ring
//! timers run on the Tokio runtime the coordinator was created in (or the one
//! given to [`BridgeCoordinator::with_runtime`]), not the caller's. Duplicate and late
//! signals are normal under at-least-once delivery; they are reported as
//! [`SignalOutcome::Ignored`] instead of errors.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voip_push_bridge::{BridgeConfig, BridgeCoordinator, CallId};
//! # use voip_push_bridge::presenter::{CallPresenter, SurfaceOutcome, TeardownAck};
//! # struct Ui;
//! # impl CallPresenter for Ui {
//! #     fn surface(&self, _: &CallId, _: &str, _: bool) -> SurfaceOutcome { SurfaceOutcome::Surfaced }
//! #     fn teardown(&self, _: &CallId) -> TeardownAck { TeardownAck::Completed }
//! # }
//!
//! # async fn example() -> Result<(), voip_push_bridge::BridgeError> {
//! let coordinator = BridgeCoordinator::new(BridgeConfig::default(), Arc::new(Ui))?;
//! let _sweeper = coordinator.spawn_sweeper();
//!
//! coordinator.handle_push(br#"{"type":"incomingCall","callId":"abc","callerDisplayName":"Alice"}"#)?;
//! coordinator.user_answered(&CallId::parse("abc")?)?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::call::session::RingTimer;
use crate::call::store::SessionGuard;
use crate::call::{CallSession, CallSessionStore, CallSignal, CallState, SessionCell, Slot, StateChange, StoreStats};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, TransitionError};
use crate::events::{BridgeEvent, EventPublisher, IgnoreReason};
use crate::presenter::{CallPresenter, MediaSignal, PresenterAction, SurfaceOutcome, TeardownAck};
use crate::push::{self, CallId, IncomingCallEvent};

/// What happened to an incoming-call push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The call was surfaced and is ringing
    Presented,
    /// The push completed a cold-start placeholder; a deferred answer, if
    /// any, was replayed
    MergedIntoPlaceholder,
    /// The same call was already delivered
    Duplicate,
    /// The call finished recently
    AlreadyCompleted,
}

/// What happened to a user action or media signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The session changed
    Applied,
    /// Held until the call's push arrives
    Deferred,
    /// Dropped with no effect
    Ignored(IgnoreReason),
}

impl SignalOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

struct Inner {
    config: BridgeConfig,
    store: CallSessionStore,
    presenter: Arc<dyn CallPresenter>,
    events: EventPublisher,
    runtime: Option<Handle>,
    timer_generation: AtomicU64,
}

/// Wires pushes, user actions and media signals to call sessions
#[derive(Clone)]
pub struct BridgeCoordinator {
    inner: Arc<Inner>,
}

impl BridgeCoordinator {
    /// Create a coordinator bound to the current Tokio runtime, if any
    ///
    /// Outside a runtime the coordinator still works, but ring timers are
    /// disabled.
    pub fn new(config: BridgeConfig, presenter: Arc<dyn CallPresenter>) -> BridgeResult<Self> {
        Self::build(config, presenter, Handle::try_current().ok())
    }

    /// Create a coordinator whose timers and sweeper run on `runtime`
    pub fn with_runtime(
        config: BridgeConfig,
        presenter: Arc<dyn CallPresenter>,
        runtime: Handle,
    ) -> BridgeResult<Self> {
        Self::build(config, presenter, Some(runtime))
    }

    fn build(
        config: BridgeConfig,
        presenter: Arc<dyn CallPresenter>,
        runtime: Option<Handle>,
    ) -> BridgeResult<Self> {
        config.validate()?;
        if runtime.is_none() {
            warn!("No Tokio runtime available, ring timeouts disabled");
        }
        let store = CallSessionStore::new(config.store_limits());
        let events = EventPublisher::new(config.event_capacity);

        info!(
            ring_timeout_secs = config.ring_timeout_secs,
            session_ceiling_secs = config.session_ceiling_secs,
            "Push bridge coordinator created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                presenter,
                events,
                runtime,
                timer_generation: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the session for `call_id`
    pub fn session(&self, call_id: &CallId) -> Option<CallSession> {
        self.inner.store.get(call_id)
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.store.stats()
    }

    // ===== Push path =====

    /// Decode a raw push payload and present the call it announces
    ///
    /// Payloads that are not incoming-call pushes fail with
    /// [`BridgeError::UnsupportedPayload`], which callers may drop.
    pub fn handle_push(&self, raw: &[u8]) -> BridgeResult<PushOutcome> {
        let event = match push::decode(raw, Utc::now()) {
            Ok(event) => event,
            Err(err) => {
                let ignorable = err.is_ignorable();
                if ignorable {
                    debug!(error = %err, "Ignoring non-call push");
                } else {
                    warn!(error = %err, "Rejected push payload");
                }
                self.inner.events.publish(BridgeEvent::PayloadRejected {
                    reason: err.to_string(),
                    ignorable,
                });
                return Err(err.into());
            }
        };
        self.handle_incoming_call(event)
    }

    /// Present a decoded incoming call
    ///
    /// Surfaces the call at most once per call id, however often the push is
    /// redelivered. A pending placeholder absorbs the event instead of
    /// creating a second session.
    pub fn handle_incoming_call(&self, event: IncomingCallEvent) -> BridgeResult<PushOutcome> {
        let call_id = event.call_id().clone();
        let (cell, created) = match self.inner.store.get_or_create(&call_id) {
            Slot::Created(cell) => (cell, true),
            Slot::Existing(cell) => (cell, false),
            Slot::Closed => {
                info!(%call_id, "Push for a completed call, not presenting again");
                self.ignored(&call_id, None, CallSignal::Surfaced, IgnoreReason::AlreadyCompleted);
                return Ok(PushOutcome::AlreadyCompleted);
            }
        };

        let caller_name = event.caller_display_name().to_string();
        let has_video = event.has_video();

        let (outcome, release) = {
            let mut session = self.lock(&cell)?;
            if session.is_terminal() {
                self.ignored(&call_id, Some(session.state()), CallSignal::Surfaced, IgnoreReason::AlreadyCompleted);
                return Ok(PushOutcome::AlreadyCompleted);
            }
            if !session.merge_event(event) {
                debug!(%call_id, state = %session.state(), "Duplicate incoming-call push");
                self.ignored(&call_id, Some(session.state()), CallSignal::Surfaced, IgnoreReason::Duplicate);
                return Ok(PushOutcome::Duplicate);
            }

            match self.inner.presenter.surface(&call_id, &caller_name, has_video) {
                SurfaceOutcome::Surfaced => {
                    self.transition(&mut session, CallSignal::Surfaced)
                        .map_err(|err| BridgeError::from_transition(&call_id, err))?;

                    let replayed = session.take_deferred_answer();
                    if replayed {
                        info!(%call_id, "Replaying answer received before the push");
                        self.transition(&mut session, CallSignal::UserAnswered)
                            .map_err(|err| BridgeError::from_transition(&call_id, err))?;
                    } else {
                        self.arm_ring_timer(&mut session);
                    }

                    info!(%call_id, caller = %caller_name, has_video, "Incoming call presented");
                    let outcome = if created && !replayed {
                        PushOutcome::Presented
                    } else {
                        PushOutcome::MergedIntoPlaceholder
                    };
                    (Ok(outcome), false)
                }
                SurfaceOutcome::Unavailable => {
                    warn!(%call_id, "Call presenter unavailable, marking call missed");
                    self.inner.events.publish(BridgeEvent::PresenterUnavailable {
                        call_id: call_id.clone(),
                    });
                    self.transition(&mut session, CallSignal::PresenterUnavailable)
                        .map_err(|err| BridgeError::from_transition(&call_id, err))?;
                    let release = self.settle(&mut session);
                    (
                        Err(BridgeError::PresenterUnavailable {
                            call_id: call_id.clone(),
                        }),
                        release,
                    )
                }
            }
        };

        if release {
            self.release(&call_id);
        }
        outcome
    }

    // ===== User actions =====

    /// User accepted the call on the native UI
    ///
    /// An answer for a call whose push has not been decoded yet creates a
    /// placeholder session holding the answer until the push arrives.
    pub fn user_answered(&self, call_id: &CallId) -> BridgeResult<SignalOutcome> {
        let cell = match self.inner.store.get_or_create(call_id) {
            Slot::Created(cell) | Slot::Existing(cell) => cell,
            Slot::Closed => {
                return Ok(self.ignored(call_id, None, CallSignal::UserAnswered, IgnoreReason::AlreadyCompleted));
            }
        };

        let release = {
            let mut session = self.lock(&cell)?;
            if session.state() == CallState::Pending && session.is_placeholder() {
                if !session.defer_answer() {
                    return Ok(self.ignored(
                        call_id,
                        Some(CallState::Pending),
                        CallSignal::UserAnswered,
                        IgnoreReason::Duplicate,
                    ));
                }
                if session.ring_timer.is_none() {
                    self.arm_ring_timer(&mut session);
                }
                info!(%call_id, "Answer arrived before the push, holding placeholder session");
                self.inner.events.publish(BridgeEvent::PlaceholderCreated {
                    call_id: call_id.clone(),
                });
                return Ok(SignalOutcome::Deferred);
            }

            match self.transition(&mut session, CallSignal::UserAnswered) {
                Ok(change) => change.to.is_terminal() && self.settle(&mut session),
                Err(err) => return Ok(self.rejected(call_id, err)),
            }
        };

        if release {
            self.release(call_id);
        }
        Ok(SignalOutcome::Applied)
    }

    /// User rejected a ringing call
    pub fn user_declined(&self, call_id: &CallId) -> BridgeResult<SignalOutcome> {
        self.drive(call_id, CallSignal::UserDeclined)
    }

    /// User hung up
    pub fn user_ended(&self, call_id: &CallId) -> BridgeResult<SignalOutcome> {
        self.drive(call_id, CallSignal::UserEnded)
    }

    /// Hold toggle; only valid on an active call
    pub fn user_set_held(&self, call_id: &CallId, on_hold: bool) -> BridgeResult<SignalOutcome> {
        self.control(call_id, "hold", &[CallState::Active], |session| {
            if session.is_on_hold() == on_hold {
                return false;
            }
            session.set_on_hold(on_hold);
            true
        })
    }

    /// Mute toggle; valid once the call is answered
    pub fn user_set_muted(&self, call_id: &CallId, muted: bool) -> BridgeResult<SignalOutcome> {
        self.control(call_id, "mute", &[CallState::Answered, CallState::Active], |session| {
            if session.is_muted() == muted {
                return false;
            }
            session.set_muted(muted);
            true
        })
    }

    pub fn handle_presenter_action(&self, action: PresenterAction) -> BridgeResult<SignalOutcome> {
        match action {
            PresenterAction::Answered(call_id) => self.user_answered(&call_id),
            PresenterAction::Declined(call_id) => self.user_declined(&call_id),
            PresenterAction::Ended(call_id) => self.user_ended(&call_id),
            PresenterAction::SetHeld { call_id, on_hold } => self.user_set_held(&call_id, on_hold),
            PresenterAction::SetMuted { call_id, muted } => self.user_set_muted(&call_id, muted),
        }
    }

    // ===== Media signals =====

    pub fn media_connected(&self, call_id: &CallId) -> BridgeResult<SignalOutcome> {
        self.drive(call_id, CallSignal::MediaConnected)
    }

    pub fn media_disconnected(&self, call_id: &CallId) -> BridgeResult<SignalOutcome> {
        self.drive(call_id, CallSignal::MediaDisconnected)
    }

    pub fn transport_failed(&self, call_id: &CallId) -> BridgeResult<SignalOutcome> {
        self.drive(call_id, CallSignal::TransportFailed)
    }

    pub fn handle_media_signal(&self, signal: MediaSignal) -> BridgeResult<SignalOutcome> {
        self.drive(signal.call_id(), signal.signal())
    }

    // ===== Teardown and housekeeping =====

    /// The presenter finished a teardown it previously deferred
    pub fn teardown_acknowledged(&self, call_id: &CallId) -> BridgeResult<SignalOutcome> {
        let Some(cell) = self.inner.store.cell(call_id) else {
            debug!(%call_id, "Teardown acknowledged for unknown call");
            return Ok(SignalOutcome::Ignored(IgnoreReason::UnknownCall));
        };

        {
            let mut session = self.lock(&cell)?;
            if !session.is_terminal() {
                return Err(BridgeError::SessionNotTerminal {
                    call_id: call_id.clone(),
                    state: session.state(),
                });
            }
            session.set_teardown_pending(false);
        }

        if self.release(call_id) {
            Ok(SignalOutcome::Applied)
        } else {
            Ok(SignalOutcome::Ignored(IgnoreReason::UnknownCall))
        }
    }

    /// Drop sessions past their limits and report answered calls whose media
    /// never connected
    ///
    /// Non-terminal sessions older than the configured ceiling are torn down
    /// on the presenter. Returns the number of sessions removed.
    pub fn sweep_expired(&self) -> usize {
        let swept = match self.inner.store.take_expired(self.inner.config.session_ceiling()) {
            Ok(swept) => swept,
            Err(err) => {
                self.store_reset(&err);
                return 0;
            }
        };

        let count = swept.len();
        for mut session in swept {
            session.cancel_ring_timer();
            let call_id = session.call_id().clone();
            if !session.is_terminal() {
                warn!(%call_id, state = %session.state(), age_secs = session.age().as_secs(), "Sweeping stuck call session");
                if session.is_surfaced() {
                    self.inner.presenter.teardown(&call_id);
                }
            }
            self.inner.events.publish(BridgeEvent::SessionRemoved {
                call_id,
                final_state: session.state(),
            });
        }
        if count > 0 {
            self.inner.events.publish(BridgeEvent::SessionsSwept { count });
        }

        self.report_overdue_media();
        count
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every sweep interval
    ///
    /// The task stops once every coordinator clone is dropped.
    ///
    /// # Panics
    ///
    /// Panics when the coordinator has no runtime and is called outside one.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval();

        let task = async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                BridgeCoordinator { inner }.sweep_expired();
            }
            debug!("Session sweeper stopped");
        };
        match &self.inner.runtime {
            Some(runtime) => runtime.spawn(task),
            None => tokio::spawn(task),
        }
    }

    // ===== Internals =====

    /// Apply `signal` to an existing session; unknown calls are ignored,
    /// except that a decline or hang-up is remembered so a late push for the
    /// call is not presented
    fn drive(&self, call_id: &CallId, signal: CallSignal) -> BridgeResult<SignalOutcome> {
        let cell = loop {
            if let Some(cell) = self.inner.store.cell(call_id) {
                break cell;
            }
            if self.inner.store.is_closed(call_id) {
                return Ok(self.ignored(call_id, None, signal, IgnoreReason::AlreadyCompleted));
            }
            if !matches!(signal, CallSignal::UserDeclined | CallSignal::UserEnded) {
                return Ok(self.ignored(call_id, None, signal, IgnoreReason::UnknownCall));
            }
            if self.inner.store.close_unknown(call_id) {
                info!(%call_id, ?signal, "Call finished before its push arrived");
                return Ok(self.ignored(call_id, None, signal, IgnoreReason::UnknownCall));
            }
        };

        let release = {
            let mut session = self.lock(&cell)?;
            match self.transition(&mut session, signal) {
                Ok(change) => change.to.is_terminal() && self.settle(&mut session),
                Err(err) => return Ok(self.rejected(call_id, err)),
            }
        };

        if release {
            self.release(call_id);
        }
        Ok(SignalOutcome::Applied)
    }

    fn control<F>(
        &self,
        call_id: &CallId,
        control: &'static str,
        allowed: &[CallState],
        apply: F,
    ) -> BridgeResult<SignalOutcome>
    where
        F: FnOnce(&mut CallSession) -> bool,
    {
        let Some(cell) = self.inner.store.cell(call_id) else {
            debug!(%call_id, control, "Call control for unknown call");
            return Ok(SignalOutcome::Ignored(IgnoreReason::UnknownCall));
        };

        let mut session = self.lock(&cell)?;
        let state = session.state();
        if !allowed.contains(&state) {
            let reason = if state.is_terminal() {
                IgnoreReason::Stale
            } else {
                IgnoreReason::Invalid
            };
            warn!(%call_id, control, %state, "Call control not valid in this state");
            return Ok(SignalOutcome::Ignored(reason));
        }
        if !apply(&mut *session) {
            return Ok(SignalOutcome::Ignored(IgnoreReason::Duplicate));
        }

        info!(%call_id, control, on_hold = session.is_on_hold(), muted = session.is_muted(), "Call control changed");
        self.inner.events.publish(BridgeEvent::CallControlChanged {
            call_id: call_id.clone(),
            on_hold: session.is_on_hold(),
            muted: session.is_muted(),
        });
        Ok(SignalOutcome::Applied)
    }

    /// Apply one signal under the session lock and publish the change
    fn transition(&self, session: &mut CallSession, signal: CallSignal) -> Result<StateChange, TransitionError> {
        let change = session.apply(signal)?;
        if !matches!(change.to, CallState::Pending | CallState::Ringing) {
            session.cancel_ring_timer();
        }

        info!(call_id = %session.call_id(), from = %change.from, to = %change.to, ?signal, "Call state changed");
        self.inner.events.publish(BridgeEvent::CallStateChanged {
            call_id: session.call_id().clone(),
            from: change.from,
            to: change.to,
            signal,
            at: Utc::now(),
        });
        Ok(change)
    }

    /// Finish a session that just became terminal
    ///
    /// Returns true when the session can be removed once its lock is
    /// released; false when the presenter deferred teardown.
    fn settle(&self, session: &mut CallSession) -> bool {
        session.cancel_ring_timer();
        if !session.is_surfaced() {
            return true;
        }

        match self.inner.presenter.teardown(session.call_id()) {
            TeardownAck::Completed => true,
            TeardownAck::Deferred => {
                debug!(call_id = %session.call_id(), "Presenter deferred teardown");
                session.set_teardown_pending(true);
                false
            }
        }
    }

    /// Remove a settled session; must not be called with its lock held
    fn release(&self, call_id: &CallId) -> bool {
        match self.inner.store.remove(call_id) {
            Ok(session) => {
                self.inner.events.publish(BridgeEvent::SessionRemoved {
                    call_id: call_id.clone(),
                    final_state: session.state(),
                });
                true
            }
            Err(err) => {
                debug!(%call_id, error = %err, "Session already released");
                false
            }
        }
    }

    fn arm_ring_timer(&self, session: &mut CallSession) {
        session.cancel_ring_timer();
        let Some(runtime) = &self.inner.runtime else {
            debug!(call_id = %session.call_id(), "Ring timeout disabled, no runtime");
            return;
        };

        let generation = self.inner.timer_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timeout = self.inner.config.ring_timeout();
        let call_id = session.call_id().clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                BridgeCoordinator { inner }.ring_timeout_fired(&call_id, generation);
            }
        });
        session.ring_timer = Some(RingTimer {
            generation,
            handle: task.abort_handle(),
        });
    }

    /// Timer callback; only the timer currently armed on the session counts
    fn ring_timeout_fired(&self, call_id: &CallId, generation: u64) {
        let Some(cell) = self.inner.store.cell(call_id) else {
            return;
        };

        let release = {
            let Ok(mut session) = self.lock(&cell) else {
                return;
            };
            if session.ring_timer.as_ref().map(|timer| timer.generation) != Some(generation) {
                debug!(%call_id, generation, "Superseded ring timer fired");
                return;
            }
            session.ring_timer = None;

            match self.transition(&mut session, CallSignal::RingTimeout) {
                Ok(_) => {
                    info!(%call_id, "Call not answered in time");
                    self.settle(&mut session)
                }
                Err(err) => {
                    self.rejected(call_id, err);
                    return;
                }
            }
        };

        if release {
            self.release(call_id);
        }
    }

    fn report_overdue_media(&self) {
        let overdue_after = self.inner.config.media_overdue_after();
        for cell in self.inner.store.cells() {
            if cell.state() != CallState::Answered {
                continue;
            }
            let Ok(mut session) = self.lock(&cell) else {
                return;
            };
            let waited = session.time_in_state();
            if session.state() != CallState::Answered || waited < overdue_after {
                continue;
            }
            if session.mark_media_overdue_reported() {
                warn!(call_id = %session.call_id(), waited_secs = waited.as_secs(), "Media not connected after answer");
                self.inner.events.publish(BridgeEvent::MediaConfirmationOverdue {
                    call_id: session.call_id().clone(),
                    waited,
                });
            }
        }
    }

    fn lock<'a>(&self, cell: &'a SessionCell) -> BridgeResult<SessionGuard<'a>> {
        self.inner.store.lock(cell).inspect_err(|err| self.store_reset(err))
    }

    fn store_reset(&self, err: &BridgeError) {
        error!(error = %err, "In-flight calls dropped");
        self.inner.events.publish(BridgeEvent::StoreReset {
            reason: err.to_string(),
        });
    }

    fn rejected(&self, call_id: &CallId, err: TransitionError) -> SignalOutcome {
        let reason = if err.is_stale() {
            debug!(%call_id, error = %err, "Stale call signal ignored");
            IgnoreReason::Stale
        } else {
            warn!(error = %BridgeError::from_transition(call_id, err), "Ignoring call signal");
            IgnoreReason::Invalid
        };
        self.ignored(call_id, Some(err.state()), err.signal(), reason)
    }

    fn ignored(
        &self,
        call_id: &CallId,
        state: Option<CallState>,
        signal: CallSignal,
        reason: IgnoreReason,
    ) -> SignalOutcome {
        self.inner.events.publish(BridgeEvent::TransitionIgnored {
            call_id: call_id.clone(),
            state,
            signal,
            reason,
        });
        SignalOutcome::Ignored(reason)
    }
}

impl fmt::Debug for BridgeCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeCoordinator")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.store.len())
            .field("subscribers", &self.inner.events.subscriber_count())
            .finish()
    }
}
