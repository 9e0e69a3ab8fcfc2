// tests/integration/test_helpers.rs

//! Test helpers and utilities shared by the test harnesses

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use topicwire::config::Config;
use topicwire::core::conversation::{FilteredResponseHandler, ManualTimer};
use topicwire::core::protocol::{InboundFrame, OutboundFrame, SessionId, Transport};
use topicwire::core::pubsub::{ValueStream, ValueUpdate};
use topicwire::core::topics::{TopicSpecification, UnsubscribeReason};
use topicwire::transport::LoopbackTransport;
use topicwire::{MessagingError, Session, Value};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs a quiet test subscriber (ignores the error if one is already set).
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A transport that records every outbound frame and can be told to fail.
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<OutboundFrame>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().clone()
    }

    pub fn take_frames(&self) -> Vec<OutboundFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The token of the most recent outbound request.
    pub fn last_request_token(&self) -> Option<topicwire::core::protocol::CorrelationToken> {
        self.frames.lock().iter().rev().find_map(|frame| match frame {
            OutboundFrame::Request { token, .. } => Some(*token),
            _ => None,
        })
    }
}

impl Transport for RecordingTransport {
    fn send_frame(&self, frame: OutboundFrame) -> Result<(), MessagingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MessagingError::Transport("link down".to_string()));
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Everything a recording value stream observed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Value {
        topic: String,
        previous: Option<Value>,
        current: Value,
    },
    Subscribed(String),
    Unsubscribed(String, UnsubscribeReason),
    Error(String),
    Closed,
}

/// A value stream that records its callbacks.
#[derive(Default)]
pub struct RecordingStream {
    events: Mutex<Vec<StreamEvent>>,
}

impl RecordingStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    /// Just the `(previous, current)` pairs delivered for `topic`.
    pub fn values_for(&self, topic: &str) -> Vec<(Option<Value>, Value)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Value {
                    topic: t,
                    previous,
                    current,
                } if t == topic => Some((previous.clone(), current.clone())),
                _ => None,
            })
            .collect()
    }
}

impl ValueStream for RecordingStream {
    fn on_value(&self, topic_path: &str, update: &ValueUpdate) -> anyhow::Result<()> {
        self.events.lock().push(StreamEvent::Value {
            topic: topic_path.to_string(),
            previous: update.previous.clone(),
            current: update.current.clone(),
        });
        Ok(())
    }

    fn on_subscription(&self, topic_path: &str, _specification: &TopicSpecification) {
        self.events
            .lock()
            .push(StreamEvent::Subscribed(topic_path.to_string()));
    }

    fn on_unsubscription(&self, topic_path: &str, reason: UnsubscribeReason) {
        self.events
            .lock()
            .push(StreamEvent::Unsubscribed(topic_path.to_string(), reason));
    }

    fn on_error(&self, topic_path: &str, _error: &MessagingError) {
        self.events
            .lock()
            .push(StreamEvent::Error(topic_path.to_string()));
    }

    fn on_close(&self) {
        self.events.lock().push(StreamEvent::Closed);
    }
}

/// Collected outcomes of one or more conversations.
pub type Outcomes<T> = Arc<Mutex<Vec<Result<T, MessagingError>>>>;

/// Returns a shared outcome list and a handler appending to it.
pub fn recorder<T: Send + 'static>() -> (
    Outcomes<T>,
    impl FnOnce(Result<T, MessagingError>) + Send + 'static,
) {
    let outcomes: Outcomes<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    let handler = move |outcome: Result<T, MessagingError>| sink.lock().push(outcome);
    (outcomes, handler)
}

/// Everything a filtered response handler observed.
#[derive(Debug, Clone, PartialEq)]
pub enum FilteredEvent {
    Dispatched(usize),
    Response(SessionId, Value),
    ResponseError(SessionId, MessagingError),
    Closed(Result<(), MessagingError>),
}

/// A filtered response handler that records its callbacks.
pub struct FilteredRecorder {
    events: Arc<Mutex<Vec<FilteredEvent>>>,
}

/// Returns a shared event list and a filtered handler appending to it.
pub fn filtered_recorder() -> (Arc<Mutex<Vec<FilteredEvent>>>, FilteredRecorder) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let handler = FilteredRecorder {
        events: events.clone(),
    };
    (events, handler)
}

impl FilteredResponseHandler for FilteredRecorder {
    fn on_dispatched(&mut self, count: usize) {
        self.events.lock().push(FilteredEvent::Dispatched(count));
    }

    fn on_response(&mut self, session_id: SessionId, response: Value) {
        self.events
            .lock()
            .push(FilteredEvent::Response(session_id, response));
    }

    fn on_response_error(&mut self, session_id: SessionId, error: MessagingError) {
        self.events
            .lock()
            .push(FilteredEvent::ResponseError(session_id, error));
    }

    fn on_close(self: Box<Self>, outcome: Result<(), MessagingError>) {
        self.events.lock().push(FilteredEvent::Closed(outcome));
    }
}

/// A session wired to a recording transport and a manual timer.
pub struct TestSession {
    pub session: Arc<Session>,
    pub transport: Arc<RecordingTransport>,
    pub timer: ManualTimer,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let transport = RecordingTransport::new();
        let timer = ManualTimer::new();
        let session = Arc::new(Session::new(
            SessionId::new("test-session"),
            transport.clone(),
            Arc::new(timer.clone()),
            config,
        ));
        session
            .mark_connected()
            .expect("a new session can be marked connected");
        Self {
            session,
            transport,
            timer,
        }
    }
}

/// A session served by the loopback platform, with its inbound frames pumped by hand.
pub struct LoopbackContext {
    pub session: Arc<Session>,
    pub transport: Arc<LoopbackTransport>,
    pub inbound: mpsc::Receiver<InboundFrame>,
    pub timer: ManualTimer,
}

impl LoopbackContext {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let id = SessionId::random();
        let (transport, inbound) =
            LoopbackTransport::new(id.clone(), config.session.inbound_queue_capacity);
        let timer = ManualTimer::new();
        let session = Arc::new(Session::new(
            id,
            transport.clone(),
            Arc::new(timer.clone()),
            config,
        ));
        session
            .mark_connected()
            .expect("a new session can be marked connected");
        Self {
            session,
            transport,
            inbound,
            timer,
        }
    }

    /// Delivers queued inbound frames until none are left. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(frame) = self.inbound.try_recv() {
            self.session.handle_frame(frame);
            handled += 1;
        }
        handled
    }
}
