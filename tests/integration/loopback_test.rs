// tests/integration/loopback_test.rs

//! End-to-end flows through a session served by the loopback platform.

use super::test_helpers::{
    FilteredEvent, LoopbackContext, RecordingStream, StreamEvent, filtered_recorder, recorder,
};
use std::sync::Arc;
use topicwire::core::codec::{DataType, Value};
use topicwire::core::conversation::{IncomingRequest, RequestHandler, ResponderHandle};
use topicwire::core::topic_views::TopicView;
use topicwire::core::topics::{AddTopicResult, TopicSpecification, UnsubscribeReason};
use topicwire::MessagingError;

struct Greeter;

impl RequestHandler for Greeter {
    fn on_request(
        &self,
        request: IncomingRequest,
        responder: ResponderHandle,
    ) -> anyhow::Result<()> {
        let name = request.value.as_str().unwrap_or("stranger");
        responder.respond(&Value::from(format!("Hello, {name}")))?;
        Ok(())
    }
}

#[tokio::test]
async fn test_request_to_own_session_round_trip() {
    let mut ctx = LoopbackContext::new();
    ctx.session
        .set_request_stream("greet", DataType::String, DataType::String, Arc::new(Greeter))
        .unwrap();

    let (outcomes, handler) = recorder::<Value>();
    let own_id = ctx.session.id().clone();
    ctx.session
        .send_request_to_session(&own_id, "greet", &Value::from("world"), DataType::String, handler)
        .unwrap();

    // Request in, response out, response back in.
    assert_eq!(ctx.pump(), 2);
    assert_eq!(*outcomes.lock(), vec![Ok(Value::from("Hello, world"))]);
    assert!(ctx.session.pending_requests().is_empty());
}

#[tokio::test]
async fn test_request_to_path_round_trip() {
    let mut ctx = LoopbackContext::new();
    ctx.session
        .set_request_stream("greet", DataType::String, DataType::String, Arc::new(Greeter))
        .unwrap();

    let (outcomes, handler) = recorder::<Value>();
    ctx.session
        .send_request("greet", &Value::from("path"), DataType::String, handler)
        .unwrap();
    ctx.pump();
    assert_eq!(*outcomes.lock(), vec![Ok(Value::from("Hello, path"))]);
}

#[tokio::test]
async fn test_request_without_stream_is_rejected() {
    let mut ctx = LoopbackContext::new();
    let (outcomes, handler) = recorder::<Value>();
    ctx.session
        .send_request("nobody", &Value::from("hi"), DataType::String, handler)
        .unwrap();
    ctx.pump();

    let outcomes = outcomes.lock();
    assert!(matches!(&outcomes[0], Err(MessagingError::Rejected(m)) if m.contains("nobody")));
}

#[tokio::test]
async fn test_request_to_unknown_session_fails() {
    let mut ctx = LoopbackContext::new();
    let (outcomes, handler) = recorder::<Value>();
    ctx.session
        .send_request_to_session(
            &topicwire::core::protocol::SessionId::new("elsewhere"),
            "greet",
            &Value::from("hi"),
            DataType::String,
            handler,
        )
        .unwrap();
    ctx.pump();
    assert!(matches!(
        &outcomes.lock()[0],
        Err(MessagingError::Rejected(_))
    ));
}

#[tokio::test]
async fn test_request_to_matching_filter_round_trip() {
    let mut ctx = LoopbackContext::new();
    ctx.session
        .set_request_stream("greet", DataType::String, DataType::String, Arc::new(Greeter))
        .unwrap();

    let own_id = ctx.session.id().clone();
    let filter = format!("$SessionId is '{own_id}'");
    let (events, handler) = filtered_recorder();
    ctx.session
        .send_request_to_filter(&filter, "greet", &Value::from("filter"), DataType::String, handler)
        .unwrap();

    // Dispatch count and request in, response out, response back in.
    assert_eq!(ctx.pump(), 3);
    assert_eq!(
        *events.lock(),
        vec![
            FilteredEvent::Dispatched(1),
            FilteredEvent::Response(own_id, Value::from("Hello, filter")),
            FilteredEvent::Closed(Ok(())),
        ]
    );
    assert!(ctx.session.pending_requests().is_empty());
}

#[tokio::test]
async fn test_filter_without_request_stream_reports_session_error() {
    let mut ctx = LoopbackContext::new();
    let (events, handler) = filtered_recorder();
    ctx.session
        .send_request_to_filter("all", "nobody", &Value::from("hi"), DataType::String, handler)
        .unwrap();
    ctx.pump();

    let events = events.lock();
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[1],
        FilteredEvent::ResponseError(id, MessagingError::Rejected(m))
            if id == ctx.session.id() && m.contains("nobody")
    ));
    assert_eq!(events[2], FilteredEvent::Closed(Ok(())));
}

#[tokio::test]
async fn test_filter_matching_no_session_and_unsupported_filter() {
    let mut ctx = LoopbackContext::new();
    let (unmatched, handler) = filtered_recorder();
    ctx.session
        .send_request_to_filter(
            "$SessionId is 'elsewhere'",
            "greet",
            &Value::from("hi"),
            DataType::String,
            handler,
        )
        .unwrap();
    let (unsupported, handler) = filtered_recorder();
    ctx.session
        .send_request_to_filter("$Principal EQ 'client'", "greet", &Value::from("hi"), DataType::String, handler)
        .unwrap();
    ctx.pump();

    assert_eq!(
        *unmatched.lock(),
        vec![FilteredEvent::Dispatched(0), FilteredEvent::Closed(Ok(()))]
    );
    assert!(matches!(
        &unsupported.lock()[..],
        [FilteredEvent::Closed(Err(MessagingError::Rejected(m)))] if m.contains("unsupported")
    ));
}

#[tokio::test]
async fn test_topic_lifecycle_reaches_subscriber() {
    let mut ctx = LoopbackContext::new();
    let stream = RecordingStream::new();
    ctx.session
        .subscribe("?random/.*", DataType::Int64, stream.clone())
        .unwrap();

    let (added, handler) = recorder::<AddTopicResult>();
    ctx.session
        .add_topic("random/Int64", TopicSpecification::new(DataType::Int64), handler)
        .unwrap();
    ctx.pump();
    assert_eq!(*added.lock(), vec![Ok(AddTopicResult::Created)]);

    for n in [10, 42] {
        let (set, handler) = recorder::<()>();
        ctx.session
            .set_topic("random/Int64", &Value::Int64(n), handler)
            .unwrap();
        ctx.pump();
        assert_eq!(*set.lock(), vec![Ok(())]);
    }

    let (removed, handler) = recorder::<u64>();
    ctx.session.remove_topics("random//", handler).unwrap();
    ctx.pump();
    assert_eq!(*removed.lock(), vec![Ok(1)]);

    assert_eq!(
        stream.events(),
        vec![
            StreamEvent::Subscribed("random/Int64".into()),
            StreamEvent::Value {
                topic: "random/Int64".into(),
                previous: None,
                current: Value::Int64(10),
            },
            StreamEvent::Value {
                topic: "random/Int64".into(),
                previous: Some(Value::Int64(10)),
                current: Value::Int64(42),
            },
            StreamEvent::Unsubscribed("random/Int64".into(), UnsubscribeReason::Removed),
        ]
    );
}

#[tokio::test]
async fn test_add_existing_topic_reports_exists() {
    let mut ctx = LoopbackContext::new();
    let (outcomes, first) = recorder::<AddTopicResult>();
    let sink = outcomes.clone();
    ctx.session
        .add_topic("t", TopicSpecification::new(DataType::String), first)
        .unwrap();
    ctx.session
        .add_topic(
            "t",
            TopicSpecification::new(DataType::String),
            move |o: Result<AddTopicResult, MessagingError>| sink.lock().push(o),
        )
        .unwrap();
    ctx.pump();
    assert_eq!(
        *outcomes.lock(),
        vec![Ok(AddTopicResult::Created), Ok(AddTopicResult::Exists)]
    );
}

#[tokio::test]
async fn test_set_topic_with_wrong_type_is_rejected() {
    let mut ctx = LoopbackContext::new();
    let (_added, handler) = recorder::<AddTopicResult>();
    ctx.session
        .add_topic("n", TopicSpecification::new(DataType::Int64), handler)
        .unwrap();
    let (set, handler) = recorder::<()>();
    ctx.session
        .set_topic("n", &Value::from("text"), handler)
        .unwrap();
    ctx.pump();
    assert!(matches!(&set.lock()[0], Err(MessagingError::Rejected(_))));
}

#[tokio::test]
async fn test_late_subscriber_receives_current_value() {
    let mut ctx = LoopbackContext::new();
    let (_added, handler) = recorder::<AddTopicResult>();
    ctx.session
        .add_topic("a/b", TopicSpecification::new(DataType::Int64), handler)
        .unwrap();
    let (_set, handler) = recorder::<()>();
    ctx.session
        .set_topic("a/b", &Value::Int64(7), handler)
        .unwrap();
    ctx.pump();

    let stream = RecordingStream::new();
    ctx.session
        .subscribe("a/b", DataType::Int64, stream.clone())
        .unwrap();
    ctx.pump();
    assert_eq!(stream.values_for("a/b"), vec![(None, Value::Int64(7))]);

    ctx.transport.publish("a/b", &Value::Int64(8)).unwrap();
    ctx.pump();
    assert_eq!(
        stream.values_for("a/b"),
        vec![
            (None, Value::Int64(7)),
            (Some(Value::Int64(7)), Value::Int64(8))
        ]
    );
}

#[tokio::test]
async fn test_unsubscribe_withdraws_topics() {
    let mut ctx = LoopbackContext::new();
    let (_added, handler) = recorder::<AddTopicResult>();
    ctx.session
        .add_topic("a", TopicSpecification::new(DataType::Int64), handler)
        .unwrap();
    let stream = RecordingStream::new();
    let id = ctx
        .session
        .subscribe("a", DataType::Int64, stream.clone())
        .unwrap();
    let other = RecordingStream::new();
    ctx.session
        .subscribe("a", DataType::Int64, other.clone())
        .unwrap();
    ctx.pump();

    assert!(ctx.session.unsubscribe(id));
    ctx.pump();
    assert!(!other
        .events()
        .iter()
        .any(|e| matches!(e, StreamEvent::Unsubscribed(..))));

    assert_eq!(ctx.session.discard_subscriptions(), 1);
    assert_eq!(
        other.events().last(),
        Some(&StreamEvent::Closed)
    );
}

#[tokio::test]
async fn test_topic_view_service_round_trip() {
    let mut ctx = LoopbackContext::new();

    let (created, handler) = recorder::<TopicView>();
    ctx.session
        .create_topic_view("latest", "map ?prices/ to views/<path(1)>", handler)
        .unwrap();
    let (_other, handler) = recorder::<TopicView>();
    ctx.session
        .create_topic_view("archive", "map prices// to archive/prices", handler)
        .unwrap();
    ctx.pump();
    let view = created.lock()[0].clone().unwrap();
    assert_eq!(view.name(), "latest");
    assert_eq!(view.specification().source_path(), "?prices/");

    let (listed, handler) = recorder::<Vec<TopicView>>();
    ctx.session.list_topic_views(handler).unwrap();
    ctx.pump();
    let names: Vec<String> = listed.lock()[0]
        .as_ref()
        .unwrap()
        .iter()
        .map(|v| v.name().to_string())
        .collect();
    assert_eq!(names, vec!["archive", "latest"]);

    let (removed, handler) = recorder::<()>();
    ctx.session.remove_topic_view("archive", handler).unwrap();
    let (fetched, handler) = recorder::<Option<TopicView>>();
    ctx.session.get_topic_view("archive", handler).unwrap();
    let (kept, handler) = recorder::<Option<TopicView>>();
    ctx.session.get_topic_view("latest", handler).unwrap();
    ctx.pump();

    assert_eq!(*removed.lock(), vec![Ok(())]);
    assert_eq!(*fetched.lock(), vec![Ok(None)]);
    assert_eq!(kept.lock()[0].as_ref().unwrap().as_ref(), Some(&view));
}

#[tokio::test]
async fn test_close_stops_delivery_and_closes_transport() {
    let mut ctx = LoopbackContext::new();
    let stream = RecordingStream::new();
    ctx.session
        .subscribe("a", DataType::Int64, stream.clone())
        .unwrap();
    let (_added, handler) = recorder::<AddTopicResult>();
    ctx.session
        .add_topic("a", TopicSpecification::new(DataType::Int64), handler)
        .unwrap();

    ctx.session.close();
    // Frames already queued are dropped by the closed session.
    ctx.pump();
    assert!(stream.values_for("a").is_empty());
    assert!(ctx.transport.publish("a", &Value::Int64(1)).is_err());
}
