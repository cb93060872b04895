//! # VoIP Push Bridge
//!
//! Bridges silent "wake up, a call is coming" VoIP pushes into a native
//! call-session lifecycle (ringing → answered/declined → active → ended) that
//! stays correct when the app was not running before the push arrived.
//!
//! The crate owns no UI, audio or signaling. It consumes:
//!
//! - raw push payloads ([`push::decode`])
//! - a platform call UI through [`presenter::CallPresenter`]
//! - user actions and media connection signals
//!
//! and produces [`events::BridgeEvent`]s plus push-token changes relayed to a
//! [`token::TokenTransport`].
//!
//! ## Modules
//!
//! - [`push`] - payload decoding into [`IncomingCallEvent`]
//! - [`call`] - state machine, per-call session and the session store
//! - [`coordinator`] - [`BridgeCoordinator`], the entry point
//! - [`presenter`] - native call UI capability
//! - [`token`] - push credential registry
//! - [`events`] - observability events
//! - [`config`], [`logging`], [`error`]

pub mod call;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod presenter;
pub mod push;
pub mod token;

pub use call::{CallSession, CallSignal, CallState};
pub use config::BridgeConfig;
pub use coordinator::{BridgeCoordinator, PushOutcome, SignalOutcome};
pub use error::{BridgeError, BridgeResult, DecodeError, TransitionError};
pub use events::{BridgeEvent, IgnoreReason};
pub use presenter::{CallPresenter, MediaSignal, PresenterAction, SurfaceOutcome, TeardownAck};
pub use push::{CallId, IncomingCallEvent};
pub use token::{PushToken, TokenRegistry, TokenTransport};
