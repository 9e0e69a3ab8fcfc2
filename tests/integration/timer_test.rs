// tests/integration/timer_test.rs

//! Request deadlines and the inbound loop on a real (paused) Tokio clock.

use super::test_helpers::{RecordingTransport, init_tracing, recorder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use topicwire::config::Config;
use topicwire::core::codec::{DataType, Value};
use topicwire::core::conversation::{TimerService, TokioTimer};
use topicwire::core::protocol::SessionId;
use topicwire::session::ConnectionState;
use topicwire::transport::LoopbackTransport;
use topicwire::{MessagingError, Session};

#[tokio::test(start_paused = true)]
async fn test_tokio_timer_fires_after_deadline() {
    let timer = TokioTimer::current().unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _handle = timer.schedule(
        Duration::from_secs(5),
        Box::new(move || {
            let _ = tx.send(());
        }),
    );

    tokio::time::sleep(Duration::from_millis(4_999)).await;
    assert!(rx.try_recv().is_err());
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(rx.try_recv().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_tokio_timer_never_fires() {
    let timer = TokioTimer::current().unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = timer.schedule(
        Duration::from_secs(1),
        Box::new(move || {
            let _ = tx.send(());
        }),
    );
    handle.cancel();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_session_request_times_out_on_tokio_clock() {
    init_tracing();
    let mut config = Config::default();
    config.session.request_timeout = Duration::from_secs(5);
    let session = Session::with_tokio_timer(
        SessionId::new("S1"),
        RecordingTransport::new(),
        config,
    )
    .unwrap();

    let (outcomes, handler) = recorder::<Value>();
    session
        .send_request_to_session(
            &SessionId::new("S2"),
            "echo",
            &Value::from("hello"),
            DataType::String,
            handler,
        )
        .unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(outcomes.lock().is_empty());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(*outcomes.lock(), vec![Err(MessagingError::Timeout)]);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_loop_resolves_requests_and_stops_on_shutdown() {
    init_tracing();
    let id = SessionId::random();
    let (transport, inbound) = LoopbackTransport::new(id.clone(), 64);
    let session = Arc::new(Session::with_tokio_timer(id, transport, Config::default()).unwrap());
    session.mark_connected().unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(session.clone().run_inbound(inbound, shutdown_rx));

    let (outcomes, handler) = recorder::<Vec<topicwire::core::topic_views::TopicView>>();
    session.list_topic_views(handler).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*outcomes.lock(), vec![Ok(Vec::new())]);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_loop_closes_session_when_channel_ends() {
    init_tracing();
    let id = SessionId::random();
    let (transport, inbound) = LoopbackTransport::new(id.clone(), 64);
    let session = Arc::new(
        Session::with_tokio_timer(id, transport.clone(), Config::default()).unwrap(),
    );
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(session.clone().run_inbound(inbound, shutdown_rx));

    // Dropping the platform's sender ends the inbound channel.
    topicwire::core::protocol::Transport::close(transport.as_ref());
    task.await.unwrap();
    assert_eq!(session.state(), ConnectionState::Closed);
}
