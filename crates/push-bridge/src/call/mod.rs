//! Call sessions: state machine, per-call record and the session store

pub mod session;
pub mod state;
pub mod store;

pub use session::CallSession;
pub use state::{next_state, CallSignal, CallState, StateChange};
pub use store::{CallSessionStore, SessionCell, Slot, StoreLimits, StoreStats};
