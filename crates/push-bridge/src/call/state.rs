//! Call state machine: states, signals and the transition table

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Lifecycle state of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Event decoded (or placeholder created), presenter not yet confirmed
    Pending,
    /// Native call UI is showing the incoming call
    Ringing,
    /// User answered; waiting for media to connect
    Answered,
    /// Media connected
    Active,
    /// Call finished after being answered
    Ended,
    /// User declined the call
    Declined,
    /// Nobody answered, the caller gave up, or the call could not be shown
    Missed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Declined | Self::Missed)
    }

    /// Position in the canonical order `Pending, Ringing, {Answered|Declined|Missed}, Active, Ended`
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ringing => 1,
            Self::Answered | Self::Declined | Self::Missed => 2,
            Self::Active => 3,
            Self::Ended => 4,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Declined => "declined",
            Self::Missed => "missed",
        };
        f.write_str(name)
    }
}

/// Input that may move a call to another state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallSignal {
    /// Presenter confirmed the incoming-call UI is showing
    Surfaced,
    /// Presenter capability is absent
    PresenterUnavailable,
    UserAnswered,
    UserDeclined,
    UserEnded,
    /// Ring timer expired with no user action
    RingTimeout,
    /// Media collaborator confirmed the connection
    MediaConnected,
    /// Media collaborator reported the remote side went away
    MediaDisconnected,
    TransportFailed,
}

/// A transition that was applied to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: CallState,
    pub to: CallState,
    pub signal: CallSignal,
}

/// Look up the target state for `signal` in `state`
pub fn next_state(state: CallState, signal: CallSignal) -> Result<CallState, TransitionError> {
    use CallSignal::*;
    use CallState::*;

    if state.is_terminal() {
        return Err(TransitionError::Stale { state, signal });
    }

    let next = match (state, signal) {
        (Pending, Surfaced) => Ringing,
        (Pending, PresenterUnavailable | RingTimeout | MediaDisconnected) => Missed,
        (Pending, UserDeclined | UserEnded) => Declined,

        (Ringing, UserAnswered) => Answered,
        (Ringing, UserDeclined | UserEnded) => Declined,
        (Ringing, RingTimeout | MediaDisconnected) => Missed,

        (Answered, MediaConnected) => Active,
        (Answered | Active, UserEnded | MediaDisconnected | TransportFailed) => Ended,

        _ => return Err(TransitionError::Invalid { state, signal }),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_SIGNALS: [CallSignal; 9] = [
        CallSignal::Surfaced,
        CallSignal::PresenterUnavailable,
        CallSignal::UserAnswered,
        CallSignal::UserDeclined,
        CallSignal::UserEnded,
        CallSignal::RingTimeout,
        CallSignal::MediaConnected,
        CallSignal::MediaDisconnected,
        CallSignal::TransportFailed,
    ];

    #[test]
    fn test_happy_path() {
        let mut state = CallState::Pending;
        for signal in [
            CallSignal::Surfaced,
            CallSignal::UserAnswered,
            CallSignal::MediaConnected,
            CallSignal::UserEnded,
        ] {
            state = next_state(state, signal).unwrap();
        }
        assert_eq!(state, CallState::Ended);
    }

    #[test]
    fn test_answer_only_from_ringing() {
        for state in [CallState::Pending, CallState::Answered, CallState::Active] {
            assert_eq!(
                next_state(state, CallSignal::UserAnswered),
                Err(TransitionError::Invalid { state, signal: CallSignal::UserAnswered })
            );
        }
    }

    #[test]
    fn test_terminal_states_are_stale() {
        for state in [CallState::Ended, CallState::Declined, CallState::Missed] {
            for signal in ALL_SIGNALS {
                assert!(next_state(state, signal).unwrap_err().is_stale());
            }
        }
    }

    #[test]
    fn test_ringing_outcomes() {
        assert_eq!(next_state(CallState::Ringing, CallSignal::UserDeclined), Ok(CallState::Declined));
        assert_eq!(next_state(CallState::Ringing, CallSignal::RingTimeout), Ok(CallState::Missed));
        assert_eq!(next_state(CallState::Ringing, CallSignal::MediaDisconnected), Ok(CallState::Missed));
    }

    #[test]
    fn test_presenter_unavailable_misses_call() {
        assert_eq!(
            next_state(CallState::Pending, CallSignal::PresenterUnavailable),
            Ok(CallState::Missed)
        );
    }

    #[test]
    fn test_answered_has_no_timeout() {
        assert!(next_state(CallState::Answered, CallSignal::RingTimeout).is_err());
    }

    fn signal_strategy() -> impl Strategy<Value = CallSignal> {
        proptest::sample::select(ALL_SIGNALS.to_vec())
    }

    proptest! {
        #[test]
        fn prop_states_follow_canonical_order(signals in proptest::collection::vec(signal_strategy(), 0..32)) {
            let mut state = CallState::Pending;
            let mut terminal_seen = false;
            for signal in signals {
                match next_state(state, signal) {
                    Ok(next) => {
                        prop_assert!(!terminal_seen);
                        prop_assert!(next.rank() > state.rank());
                        state = next;
                        terminal_seen = state.is_terminal();
                    }
                    Err(err) => {
                        prop_assert_eq!(err.is_stale(), state.is_terminal());
                    }
                }
            }
        }
    }
}
