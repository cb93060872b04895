//! Native call UI capability
//!
//! The bridge drives the platform's call screen through [`CallPresenter`]; it
//! never renders anything itself. User actions taken on that screen come back
//! as [`PresenterAction`]s, and connection changes reported by the media stack
//! as [`MediaSignal`]s.
//!
//! # Implementing a presenter
//!
//! ```rust
//! use voip_push_bridge::presenter::{CallPresenter, SurfaceOutcome, TeardownAck};
//! use voip_push_bridge::push::CallId;
//!
//! struct LoggingPresenter;
//!
//! impl CallPresenter for LoggingPresenter {
//!     fn surface(&self, call_id: &CallId, caller_name: &str, has_video: bool) -> SurfaceOutcome {
//!         println!("ringing {} from {} (video: {})", call_id, caller_name, has_video);
//!         SurfaceOutcome::Surfaced
//!     }
//!
//!     fn teardown(&self, call_id: &CallId) -> TeardownAck {
//!         println!("ending {}", call_id);
//!         TeardownAck::Completed
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::call::CallSignal;
use crate::push::CallId;

/// Result of asking the platform to show an incoming call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceOutcome {
    /// The incoming-call UI is showing
    Surfaced,
    /// No call UI capability (permissions missing, unsupported device, ...)
    Unavailable,
}

/// Result of asking the platform to dismiss a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeardownAck {
    /// The call UI is gone; the session can be released
    Completed,
    /// The platform will confirm later via
    /// [`BridgeCoordinator::teardown_acknowledged`](crate::BridgeCoordinator::teardown_acknowledged)
    Deferred,
}

/// Platform call UI driven by the bridge
///
/// Both methods are invoked while the bridge holds the per-call lock, so they
/// must return promptly and must not call back into the
/// [`BridgeCoordinator`](crate::BridgeCoordinator) synchronously. User actions
/// are delivered later through the coordinator's entry points.
pub trait CallPresenter: Send + Sync {
    /// Show the incoming-call UI
    fn surface(&self, call_id: &CallId, caller_name: &str, has_video: bool) -> SurfaceOutcome;

    /// Dismiss the call UI for a call that reached a terminal state
    fn teardown(&self, call_id: &CallId) -> TeardownAck;
}

/// Action taken by the user on the native call UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenterAction {
    Answered(CallId),
    Declined(CallId),
    Ended(CallId),
    SetHeld { call_id: CallId, on_hold: bool },
    SetMuted { call_id: CallId, muted: bool },
}

impl PresenterAction {
    pub fn call_id(&self) -> &CallId {
        match self {
            Self::Answered(id) | Self::Declined(id) | Self::Ended(id) => id,
            Self::SetHeld { call_id, .. } | Self::SetMuted { call_id, .. } => call_id,
        }
    }
}

/// Connection change reported by the media collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaSignal {
    Connected(CallId),
    Disconnected(CallId),
    TransportFailed(CallId),
}

impl MediaSignal {
    pub fn call_id(&self) -> &CallId {
        match self {
            Self::Connected(id) | Self::Disconnected(id) | Self::TransportFailed(id) => id,
        }
    }

    pub fn signal(&self) -> CallSignal {
        match self {
            Self::Connected(_) => CallSignal::MediaConnected,
            Self::Disconnected(_) => CallSignal::MediaDisconnected,
            Self::TransportFailed(_) => CallSignal::TransportFailed,
        }
    }
}
