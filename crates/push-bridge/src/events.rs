//! Observability events
//!
//! Every decision the bridge makes is published as a [`BridgeEvent`] on a
//! Tokio broadcast channel, so the embedding application can feed its own
//! metrics, crash reporting or call history. Events are best effort: a slow
//! subscriber lags and loses the oldest events, it never blocks the bridge.
//!
//! # Example
//!
//! ```rust,no_run
//! # use voip_push_bridge::{BridgeCoordinator, events::BridgeEvent};
//! # async fn example(coordinator: BridgeCoordinator) {
//! let mut events = coordinator.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let BridgeEvent::CallStateChanged { call_id, to, .. } = &event {
//!         println!("{} -> {}", call_id, to);
//!     }
//! }
//! # }
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::call::{CallSignal, CallState};
use crate::push::CallId;

/// Why a signal had no effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IgnoreReason {
    /// Session already terminal
    Stale,
    /// Signal not valid in the current state
    Invalid,
    /// Same push or action delivered again
    Duplicate,
    /// No session exists for the call
    UnknownCall,
    /// The call finished recently
    AlreadyCompleted,
}

/// Event published by the bridge
#[derive(Debug, Clone, Serialize)]
pub enum BridgeEvent {
    /// A session moved to another state
    CallStateChanged {
        call_id: CallId,
        from: CallState,
        to: CallState,
        signal: CallSignal,
        at: DateTime<Utc>,
    },
    /// A signal was dropped
    TransitionIgnored {
        call_id: CallId,
        state: Option<CallState>,
        signal: CallSignal,
        reason: IgnoreReason,
    },
    /// A push payload could not be used
    PayloadRejected { reason: String, ignorable: bool },
    /// The native call UI could not show a call
    PresenterUnavailable { call_id: CallId },
    /// A user answer arrived before its push; a placeholder session holds it
    PlaceholderCreated { call_id: CallId },
    /// Hold or mute changed on an active call
    CallControlChanged {
        call_id: CallId,
        on_hold: bool,
        muted: bool,
    },
    /// A call has been answered for a while without media connecting
    MediaConfirmationOverdue { call_id: CallId, waited: Duration },
    /// A session left the store
    SessionRemoved { call_id: CallId, final_state: CallState },
    /// The sweeper removed sessions past their limits
    SessionsSwept { count: usize },
    /// Store corruption dropped every in-flight session
    StoreReset { reason: String },
}

impl BridgeEvent {
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::CallStateChanged { call_id, .. }
            | Self::TransitionIgnored { call_id, .. }
            | Self::PresenterUnavailable { call_id }
            | Self::PlaceholderCreated { call_id }
            | Self::CallControlChanged { call_id, .. }
            | Self::MediaConfirmationOverdue { call_id, .. }
            | Self::SessionRemoved { call_id, .. } => Some(call_id),
            Self::PayloadRejected { .. } | Self::SessionsSwept { .. } | Self::StoreReset { .. } => None,
        }
    }
}

/// Sending side of the event channel
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting; no subscribers is not an error
    pub fn publish(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let publisher = EventPublisher::new(4);
        publisher.publish(BridgeEvent::SessionsSwept { count: 1 });
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let publisher = EventPublisher::new(4);
        let mut rx = publisher.subscribe();
        publisher.publish(BridgeEvent::SessionsSwept { count: 3 });

        match rx.recv().await.unwrap() {
            BridgeEvent::SessionsSwept { count } => assert_eq!(count, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_call_id() {
        let call_id = CallId::parse("abc").unwrap();
        let event = BridgeEvent::PlaceholderCreated { call_id: call_id.clone() };
        assert_eq!(event.call_id(), Some(&call_id));
        assert_eq!(BridgeEvent::SessionsSwept { count: 0 }.call_id(), None);
    }
}
