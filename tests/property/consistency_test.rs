// tests/property/consistency_test.rs

//! Property-based tests for delivery and resolution invariants
//! Value chains stay consistent under arbitrary update sequences, and every
//! conversation resolves exactly once whatever order its events arrive in

use crate::test_helpers::{RecordingStream, RecordingTransport, recorder};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use topicwire::MessagingError;
use topicwire::core::codec::{DataType, Value, encode};
use topicwire::core::conversation::{
    ConversationCorrelator, CorrelatorSettings, ManualTimer, OutgoingRequest,
};
use topicwire::core::protocol::{ConversationTarget, ErrorReason};
use topicwire::core::pubsub::SubscriptionRegistry;
use topicwire::core::topics::TopicSelector;

#[derive(Debug, Clone)]
enum Event {
    Respond(usize),
    Fail(usize),
    Cancel(usize),
    Advance(u64),
    Close,
}

fn any_event(conversations: usize) -> impl Strategy<Value = Event> {
    prop_oneof![
        (0..conversations).prop_map(Event::Respond),
        (0..conversations).prop_map(Event::Fail),
        (0..conversations).prop_map(Event::Cancel),
        (0u64..3_000).prop_map(Event::Advance),
        Just(Event::Close),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_chain_matches_update_sequence(
        updates in prop::collection::vec((0usize..3, any::<i64>()), 1..60)
    ) {
        let registry = SubscriptionRegistry::default();
        let stream = RecordingStream::new();
        registry.subscribe(TopicSelector::parse("?t/.*").unwrap(), DataType::Int64, stream.clone());

        for (topic, n) in &updates {
            registry.dispatch(&format!("t/{topic}"), &encode(&Value::Int64(*n)).unwrap());
        }

        for topic in 0..3 {
            let sent: Vec<i64> = updates.iter().filter(|(t, _)| *t == topic).map(|(_, n)| *n).collect();
            let seen = stream.values_for(&format!("t/{topic}"));
            prop_assert_eq!(seen.len(), sent.len());
            for (i, (previous, current)) in seen.iter().enumerate() {
                prop_assert_eq!(current, &Value::Int64(sent[i]));
                let expected = if i == 0 { None } else { Some(Value::Int64(sent[i - 1])) };
                prop_assert_eq!(previous, &expected);
            }
        }
    }

    #[test]
    fn test_every_conversation_resolves_exactly_once(
        events in prop::collection::vec(any_event(4), 0..40)
    ) {
        let transport = RecordingTransport::new();
        let timer = ManualTimer::new();
        let correlator = ConversationCorrelator::new(
            transport,
            Arc::new(timer.clone()),
            CorrelatorSettings {
                default_timeout: Duration::from_secs(1),
                ..CorrelatorSettings::default()
            },
        );

        let mut tokens = Vec::new();
        let mut outcomes = Vec::new();
        for _ in 0..4 {
            let (seen, handler) = recorder::<Value>();
            let request = OutgoingRequest::new(
                ConversationTarget::Path("p".to_string()),
                &Value::Int64(0),
                DataType::Int64,
            )
            .unwrap();
            tokens.push(correlator.send(request, handler).unwrap());
            outcomes.push(seen);
        }

        for event in events {
            match event {
                Event::Respond(i) => {
                    correlator.resolve(tokens[i], Ok(encode(&Value::Int64(i as i64)).unwrap()));
                }
                Event::Fail(i) => {
                    correlator.resolve(tokens[i], Err(ErrorReason::new(9, "nope")));
                }
                Event::Cancel(i) => {
                    correlator.cancel(tokens[i]);
                }
                Event::Advance(ms) => {
                    timer.advance(Duration::from_millis(ms));
                }
                Event::Close => {
                    correlator.close_all();
                }
            }
        }
        // Anything still pending ends now.
        timer.advance(Duration::from_secs(10));

        for (i, seen) in outcomes.iter().enumerate() {
            let seen = seen.lock();
            prop_assert_eq!(seen.len(), 1, "conversation {} resolved {} times", i, seen.len());
            match &seen[0] {
                Ok(value) => prop_assert_eq!(value, &Value::Int64(i as i64)),
                Err(MessagingError::Rejected(_))
                | Err(MessagingError::Cancelled)
                | Err(MessagingError::Timeout)
                | Err(MessagingError::SessionClosed) => {}
                Err(other) => prop_assert!(false, "unexpected outcome {:?}", other),
            }
        }
        prop_assert_eq!(correlator.pending_count(), 0);
    }
}
