// src/main.rs

//! A demo client that runs a session against the in-process loopback platform.

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use std::env;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use topicwire::config::Config;
use topicwire::core::conversation::{
    FilteredResponseHandler, IncomingRequest, RequestHandler, ResponderHandle,
};
use topicwire::core::metrics::gather_metrics;
use topicwire::core::protocol::SessionId;
use topicwire::core::pubsub::{ValueStream, ValueUpdate};
use topicwire::core::topic_views::TopicView;
use topicwire::core::topics::{AddTopicResult, TopicSpecification, UnsubscribeReason};
use topicwire::session::ConnectionState;
use topicwire::transport::LoopbackTransport;
use topicwire::{DataType, MessagingError, Session, Value};
use tracing::{debug, error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

/// Answers every request with a fixed string.
struct EchoHandler {
    response: String,
}

impl RequestHandler for EchoHandler {
    fn on_request(&self, request: IncomingRequest, responder: ResponderHandle) -> Result<()> {
        info!(
            path = %request.path,
            sender = ?request.sender.as_ref().map(|s| s.to_string()),
            "Received request: {:?}",
            request.value
        );
        responder.respond(&Value::from(self.response.as_str()))?;
        Ok(())
    }
}

/// Logs every value it receives.
struct LoggingStream;

impl ValueStream for LoggingStream {
    fn on_value(&self, topic_path: &str, update: &ValueUpdate) -> Result<()> {
        info!(
            topic = topic_path,
            "Value changed: {:?} -> {:?}",
            update.previous,
            update.current
        );
        Ok(())
    }

    fn on_subscription(&self, topic_path: &str, specification: &TopicSpecification) {
        info!(topic = topic_path, topic_type = %specification.topic_type, "Subscribed");
    }

    fn on_unsubscription(&self, topic_path: &str, reason: UnsubscribeReason) {
        info!(topic = topic_path, %reason, "Unsubscribed");
    }
}

/// Logs each answer to a filtered request and reports how many sessions answered.
struct FilteredLogger {
    answered: usize,
    done: Option<oneshot::Sender<Result<usize, MessagingError>>>,
}

impl FilteredResponseHandler for FilteredLogger {
    fn on_dispatched(&mut self, count: usize) {
        info!(sessions = count, "Filtered request dispatched");
    }

    fn on_response(&mut self, session_id: SessionId, response: Value) {
        self.answered += 1;
        info!(session = %session_id, "Filtered response: {:?}", response);
    }

    fn on_response_error(&mut self, session_id: SessionId, error: MessagingError) {
        error!(session = %session_id, "Filtered response error: {}", error);
    }

    fn on_close(mut self: Box<Self>, outcome: Result<(), MessagingError>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome.map(|()| self.answered));
        }
    }
}

/// Bridges a callback-style completion to an awaitable one.
fn completion<T: Send + 'static>() -> (
    impl FnOnce(Result<T, MessagingError>) + Send + 'static,
    oneshot::Receiver<Result<T, MessagingError>>,
) {
    let (tx, rx) = oneshot::channel();
    let callback = move |outcome: Result<T, MessagingError>| {
        let _ = tx.send(outcome);
    };
    (callback, rx)
}

async fn outcome<T>(rx: oneshot::Receiver<Result<T, MessagingError>>) -> Result<T> {
    let outcome = rx
        .await
        .map_err(|_| anyhow!("conversation was dropped without an outcome"))?;
    Ok(outcome?)
}

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("topicwire version {VERSION}");
        return Ok(());
    }

    // Without --config the built-in defaults are used.
    let config = match args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
    {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{path}\": {e:#}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    if let Err(e) = run_demo(config).await {
        error!("Demo failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run_demo(config: Config) -> Result<()> {
    let demo = config.demo.clone();
    let session_id = SessionId::random();
    let (transport, inbound) =
        LoopbackTransport::new(session_id.clone(), config.session.inbound_queue_capacity);
    let session = Arc::new(
        Session::with_tokio_timer(session_id.clone(), transport.clone(), config)
            .context("Failed to create session")?,
    );
    session.add_listener(Arc::new(
        |id: &SessionId, old: ConnectionState, new: ConnectionState| {
            info!(session = %id, "Session state {} -> {}", old, new);
        },
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let inbound_task = tokio::spawn(session.clone().run_inbound(inbound, shutdown_rx));
    session.mark_connected()?;

    session.set_request_stream(
        &demo.request_path,
        DataType::String,
        DataType::String,
        Arc::new(EchoHandler {
            response: demo.response.clone(),
        }),
    )?;

    let (done, rx) = completion::<AddTopicResult>();
    session.add_topic(&demo.topic_path, TopicSpecification::new(DataType::Int64), done)?;
    info!(topic = %demo.topic_path, "Add topic: {:?}", outcome(rx).await?);

    session.subscribe(&demo.topic_path, DataType::Int64, Arc::new(LoggingStream))?;

    let (done, rx) = completion::<TopicView>();
    session.create_topic_view(
        "demo-view",
        &format!("map {} to views/<path(0)>", demo.topic_path),
        done,
    )?;
    let view = outcome(rx).await?;
    info!(view = view.name(), "Created topic view: {}", view.specification());

    let (done, rx) = completion::<Vec<TopicView>>();
    session.list_topic_views(done)?;
    for view in outcome(rx).await? {
        info!(view = view.name(), "Topic view: {}", view.specification());
    }

    let mut interval = tokio::time::interval(demo.interval);
    for i in 0..demo.updates {
        interval.tick().await;

        let value = Value::Int64(rand::thread_rng().gen_range(-1_000_000..=1_000_000));
        let (done, rx) = completion::<()>();
        session.set_topic(&demo.topic_path, &value, done)?;
        outcome(rx).await?;

        let (done, rx) = completion::<Value>();
        session.send_request_to_session(
            &session_id,
            &demo.request_path,
            &Value::from(demo.request.as_str()),
            DataType::String,
            done,
        )?;
        match outcome(rx).await {
            Ok(response) => info!(round = i, "Received response: {:?}", response),
            Err(e) => error!(round = i, "Request failed: {:#}", e),
        }
    }

    let (tx, rx) = oneshot::channel();
    session.send_request_to_filter(
        "all",
        &demo.request_path,
        &Value::from(demo.request.as_str()),
        DataType::String,
        FilteredLogger {
            answered: 0,
            done: Some(tx),
        },
    )?;
    info!(sessions = outcome(rx).await?, "Filtered request answered");

    session.close();
    let _ = shutdown_tx.send(());
    inbound_task.await.context("Inbound loop panicked")?;

    debug!("Final metrics:\n{}", gather_metrics());
    Ok(())
}
