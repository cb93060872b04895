//! Redelivered pushes and signals must not change the outcome of a call

mod common;

use common::*;
use proptest::prelude::*;
use voip_push_bridge::{
    BridgeEvent, CallSignal, CallState, IgnoreReason, PushOutcome, SignalOutcome, TeardownAck,
};

#[tokio::test]
async fn test_duplicate_push_surfaces_once() {
    let presenter = RecordingPresenter::new();
    let bridge = bridge(presenter.clone());
    let mut events = bridge.subscribe();
    let call = id("dup");
    let raw = incoming_call_payload("dup", "Alice", false);

    assert_eq!(bridge.handle_push(&raw).unwrap(), PushOutcome::Presented);
    assert_eq!(bridge.handle_push(&raw).unwrap(), PushOutcome::Duplicate);
    assert_eq!(bridge.handle_push(&raw).unwrap(), PushOutcome::Duplicate);

    assert_eq!(presenter.surface_count(&call), 1);
    let events = drain(&mut events);
    assert_eq!(states_of(&events, &call), vec![CallState::Ringing]);
    let duplicates = events
        .iter()
        .filter(|event| {
            matches!(
                event,
                BridgeEvent::TransitionIgnored {
                    reason: IgnoreReason::Duplicate,
                    signal: CallSignal::Surfaced,
                    ..
                }
            )
        })
        .count();
    assert_eq!(duplicates, 2);
}

#[tokio::test]
async fn test_push_redelivered_after_call_completed() {
    let presenter = RecordingPresenter::new();
    let bridge = bridge(presenter.clone());
    let call = id("done");
    let raw = incoming_call_payload("done", "Bob", false);

    bridge.handle_push(&raw).unwrap();
    bridge.user_declined(&call).unwrap();
    assert!(bridge.session(&call).is_none());

    assert_eq!(bridge.handle_push(&raw).unwrap(), PushOutcome::AlreadyCompleted);
    assert_eq!(presenter.surface_count(&call), 1);
    assert_eq!(bridge.stats().total, 0);
}

#[tokio::test]
async fn test_signals_after_terminal_state_are_stale() {
    let presenter = RecordingPresenter::new();
    presenter.set_teardown_ack(TeardownAck::Deferred);
    let bridge = bridge(presenter.clone());
    let call = id("stale");

    bridge.handle_push(&incoming_call_payload("stale", "Cy", false)).unwrap();
    bridge.user_answered(&call).unwrap();
    bridge.user_ended(&call).unwrap();
    assert_eq!(bridge.session(&call).unwrap().state(), CallState::Ended);

    for outcome in [
        bridge.user_ended(&call).unwrap(),
        bridge.user_answered(&call).unwrap(),
        bridge.media_connected(&call).unwrap(),
        bridge.transport_failed(&call).unwrap(),
    ] {
        assert_eq!(outcome, SignalOutcome::Ignored(IgnoreReason::Stale));
    }
    assert_eq!(
        bridge.user_set_muted(&call, true).unwrap(),
        SignalOutcome::Ignored(IgnoreReason::Stale)
    );
    assert_eq!(bridge.session(&call).unwrap().state(), CallState::Ended);
    assert_eq!(presenter.torn_down(), vec![call]);
}

#[tokio::test]
async fn test_duplicate_answer_is_invalid_not_fatal() {
    let bridge = bridge(RecordingPresenter::new());
    let call = id("answer-twice");

    bridge.handle_push(&incoming_call_payload("answer-twice", "Di", false)).unwrap();
    assert_eq!(bridge.user_answered(&call).unwrap(), SignalOutcome::Applied);
    assert_eq!(
        bridge.user_answered(&call).unwrap(),
        SignalOutcome::Ignored(IgnoreReason::Invalid)
    );
    assert_eq!(bridge.session(&call).unwrap().state(), CallState::Answered);
}

#[tokio::test]
async fn test_signals_for_removed_call_are_already_completed() {
    let bridge = bridge(RecordingPresenter::new());
    let call = id("gone");

    bridge.handle_push(&incoming_call_payload("gone", "Ed", false)).unwrap();
    bridge.user_declined(&call).unwrap();

    assert_eq!(
        bridge.user_ended(&call).unwrap(),
        SignalOutcome::Ignored(IgnoreReason::AlreadyCompleted)
    );
    assert_eq!(
        bridge.media_disconnected(&call).unwrap(),
        SignalOutcome::Ignored(IgnoreReason::AlreadyCompleted)
    );
}

#[derive(Debug, Clone, Copy)]
enum Input {
    Push,
    Answer,
    Decline,
    End,
    Connect,
    Disconnect,
    Fail,
}

fn input() -> impl Strategy<Value = Input> {
    prop_oneof![
        Just(Input::Push),
        Just(Input::Answer),
        Just(Input::Decline),
        Just(Input::End),
        Just(Input::Connect),
        Just(Input::Disconnect),
        Just(Input::Fail),
    ]
}

proptest! {
    #[test]
    fn prop_any_delivery_order_yields_canonical_states(inputs in prop::collection::vec(input(), 1..24)) {
        let presenter = RecordingPresenter::new();
        let bridge = bridge(presenter.clone());
        let mut events = bridge.subscribe();
        let call = id("prop");
        let raw = incoming_call_payload("prop", "Fuzz", false);

        for input in inputs {
            let _ = match input {
                Input::Push => bridge.handle_push(&raw).map(|_| SignalOutcome::Applied),
                Input::Answer => bridge.user_answered(&call),
                Input::Decline => bridge.user_declined(&call),
                Input::End => bridge.user_ended(&call),
                Input::Connect => bridge.media_connected(&call),
                Input::Disconnect => bridge.media_disconnected(&call),
                Input::Fail => bridge.transport_failed(&call),
            };
        }

        let states = states_of(&drain(&mut events), &call);
        let ranks: Vec<u8> = states.iter().map(|state| state.rank()).collect();
        prop_assert!(ranks.windows(2).all(|pair| pair[0] < pair[1]), "states out of order: {:?}", states);
        if let Some(pos) = states.iter().position(|state| state.is_terminal()) {
            prop_assert_eq!(pos, states.len() - 1);
        }
        prop_assert!(presenter.surface_count(&call) <= 1);
    }
}
