//! Property-based tests for the state machine

use super::*;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_pending_tool() -> impl Strategy<Value = PendingTool> {
    ("[a-z]{8}", prop_oneof![Just("read_file"), Just("list_files"), Just("edit_file")])
        .prop_map(|(id, name)| PendingTool::new(id, name))
}

fn arb_pending() -> impl Strategy<Value = Vec<PendingTool>> {
    proptest::collection::vec(arb_pending_tool(), 0..4)
}

fn arb_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        Just(ConvState::AwaitingModel),
        proptest::collection::vec(arb_pending_tool(), 1..4)
            .prop_map(|pending| ConvState::ToolChaining { pending }),
        Just(ConvState::AwaitingUser),
        Just(ConvState::Closed),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_pending().prop_map(|tool_uses| Event::ModelResponded { tool_uses }),
        proptest::collection::vec("[a-z]{8}", 0..4)
            .prop_map(|results| Event::ToolsDispatched { results }),
        Just(Event::UserMessage),
        Just(Event::EndOfInput),
        Just(Event::Shutdown),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Closed is terminal: nothing ever moves the conversation out of it
    #[test]
    fn prop_closed_is_never_left(events in proptest::collection::vec(arb_event(), 0..10)) {
        let mut state = ConvState::Closed;
        for event in events {
            if let Ok(next) = transition(&state, event) {
                state = next;
            }
            prop_assert_eq!(&state, &ConvState::Closed);
        }
    }

    #[test]
    fn prop_shutdown_always_closes(state in arb_state()) {
        prop_assert_eq!(transition(&state, Event::Shutdown), Ok(ConvState::Closed));
    }

    #[test]
    fn prop_transition_is_deterministic(state in arb_state(), event in arb_event()) {
        let first = transition(&state, event.clone());
        let second = transition(&state, event);
        prop_assert_eq!(first, second);
    }

    // Tool chaining only ends once every pending use is answered, in order
    #[test]
    fn prop_chaining_requires_matching_results(
        pending in proptest::collection::vec(arb_pending_tool(), 1..4),
        results in proptest::collection::vec("[a-z]{8}", 0..4),
    ) {
        let state = ConvState::ToolChaining { pending: pending.clone() };
        let matches = pending.iter().map(|p| p.id.clone()).collect::<Vec<_>>() == results;
        let next = transition(&state, Event::ToolsDispatched { results });
        prop_assert_eq!(next.is_ok(), matches);
        if let Ok(next) = next {
            prop_assert_eq!(next, ConvState::AwaitingModel);
        }
    }

    // Walking any event sequence from the initial state only ever reaches
    // ToolChaining with a non-empty pending list
    #[test]
    fn prop_tool_chaining_never_empty(events in proptest::collection::vec(arb_event(), 0..20)) {
        let mut state = ConvState::default();
        for event in events {
            if let Ok(next) = transition(&state, event) {
                state = next;
            }
            if let ConvState::ToolChaining { pending } = &state {
                prop_assert!(!pending.is_empty());
            }
        }
    }
}
