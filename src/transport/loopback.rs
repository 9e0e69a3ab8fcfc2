// src/transport/loopback.rs

//! An in-process stand-in for the platform, serving a single session.
//!
//! Outbound frames are answered by pushing inbound frames onto a bounded
//! channel, which the session drains with `run_inbound` (or which tests pump
//! by hand). Requests addressed to the session itself, to a request path or
//! to a session filter it matches are routed back to it; service calls are
//! served from an in-memory topic tree and topic view table.
//!
//! Session filters are limited to `all` and `$SessionId is '<id>'`.

use crate::core::codec::{Value, ValueCodec, encode};
use crate::core::errors::MessagingError;
use crate::core::protocol::{
    ConversationTarget, CorrelationToken, ErrorReason, InboundFrame, OutboundFrame,
    ServiceRequest, SessionId, Transport,
};
use crate::core::topic_views::{TopicView, TopicViewSpec};
use crate::core::topics::{AddTopicResult, TopicSelector, TopicSpecification, UnsubscribeReason};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Error code of failures reported by the loopback platform itself.
pub const LOOPBACK_ERROR_CODE: u32 = 100;

struct Topic {
    specification: TopicSpecification,
    value: Option<Bytes>,
}

/// The outbound request a relayed inbound request answers.
#[derive(Debug, Clone, Copy)]
enum Relay {
    Single(CorrelationToken),
    Filtered(CorrelationToken),
}

#[derive(Default)]
struct PlatformState {
    closed: bool,
    next_conversation_id: u64,
    /// Inbound conversation ids handed to the session.
    relayed: HashMap<u64, Relay>,
    /// Subscribed selectors keyed by expression.
    selectors: BTreeMap<String, TopicSelector>,
    topics: BTreeMap<String, Topic>,
    views: BTreeMap<String, TopicView>,
}

impl PlatformState {
    fn is_subscribed(&self, topic_path: &str) -> bool {
        self.selectors.values().any(|s| s.matches(topic_path))
    }

    fn relay(&mut self, relay: Relay) -> u64 {
        self.next_conversation_id += 1;
        let conversation_id = self.next_conversation_id;
        self.relayed.insert(conversation_id, relay);
        conversation_id
    }
}

/// `LoopbackTransport` plays the platform for one session.
pub struct LoopbackTransport {
    session_id: SessionId,
    inbound: Mutex<Option<mpsc::Sender<InboundFrame>>>,
    state: Mutex<PlatformState>,
}

impl LoopbackTransport {
    /// Creates the transport and the receiver of the frames it produces.
    pub fn new(
        session_id: SessionId,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<InboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let transport = Arc::new(Self {
            session_id,
            inbound: Mutex::new(Some(tx)),
            state: Mutex::new(PlatformState::default()),
        });
        (transport, rx)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Paths of the topics currently held.
    pub fn topic_paths(&self) -> Vec<String> {
        self.state.lock().topics.keys().cloned().collect()
    }

    /// Publishes a value from outside the session, as another client would.
    pub fn publish(&self, topic_path: &str, value: &Value) -> Result<(), MessagingError> {
        let payload = encode(value)?;
        let replies = {
            let mut state = self.state.lock();
            set_topic(&mut state, topic_path, payload)
                .map_err(|reason| MessagingError::Rejected(reason.to_string()))?
        };
        self.push_all(replies)
    }

    fn handle(&self, frame: OutboundFrame) -> Result<Vec<InboundFrame>, MessagingError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MessagingError::Transport(
                "loopback transport is closed".to_string(),
            ));
        }

        let mut replies = Vec::new();
        match frame {
            OutboundFrame::Subscribe { selector } => {
                let parsed = TopicSelector::parse(&selector)?;
                for (path, topic) in state.topics.iter() {
                    if parsed.matches(path) && !state.is_subscribed(path) {
                        replies.extend(notices_for(path, topic));
                    }
                }
                state.selectors.insert(selector, parsed);
            }
            OutboundFrame::Unsubscribe { selector } => {
                if let Some(removed) = state.selectors.remove(&selector) {
                    for path in state.topics.keys() {
                        if removed.matches(path) && !state.is_subscribed(path) {
                            replies.push(InboundFrame::UnsubscriptionNotice {
                                topic_path: path.clone(),
                                reason: UnsubscribeReason::Requested,
                            });
                        }
                    }
                }
            }
            OutboundFrame::Request {
                token,
                target,
                payload,
            } => match target {
                ConversationTarget::Session { session_id, path } => {
                    if session_id == self.session_id {
                        let conversation_id = state.relay(Relay::Single(token));
                        replies.push(InboundFrame::Request {
                            conversation_id,
                            path,
                            sender: Some(self.session_id.clone()),
                            payload,
                        });
                    } else {
                        replies.push(InboundFrame::Error {
                            token,
                            reason: ErrorReason::new(
                                LOOPBACK_ERROR_CODE,
                                format!("no session {session_id}"),
                            ),
                        });
                    }
                }
                ConversationTarget::Path(path) => {
                    let conversation_id = state.relay(Relay::Single(token));
                    replies.push(InboundFrame::Request {
                        conversation_id,
                        path,
                        sender: Some(self.session_id.clone()),
                        payload,
                    });
                }
                ConversationTarget::Filter { filter, path } => {
                    match filter_matches(&filter, &self.session_id) {
                        Ok(matched) => {
                            replies.push(InboundFrame::FilterDispatched {
                                token,
                                count: usize::from(matched),
                            });
                            if matched {
                                let conversation_id = state.relay(Relay::Filtered(token));
                                replies.push(InboundFrame::Request {
                                    conversation_id,
                                    path,
                                    sender: Some(self.session_id.clone()),
                                    payload,
                                });
                            }
                        }
                        Err(reason) => replies.push(InboundFrame::Error { token, reason }),
                    }
                }
                ConversationTarget::Service(request) => {
                    let (outcome, notices) = serve(&mut state, request, payload);
                    replies.extend(notices);
                    let payload =
                        outcome.and_then(|json| encode(&Value::Json(json)).map_err(|e| failure(e.to_string())));
                    replies.push(match payload {
                        Ok(payload) => InboundFrame::Response { token, payload },
                        Err(reason) => InboundFrame::Error { token, reason },
                    });
                }
            },
            OutboundFrame::Response {
                conversation_id,
                payload,
            } => match state.relayed.remove(&conversation_id) {
                Some(Relay::Single(token)) => {
                    replies.push(InboundFrame::Response { token, payload })
                }
                Some(Relay::Filtered(token)) => replies.push(InboundFrame::FilterResponse {
                    token,
                    session_id: self.session_id.clone(),
                    payload,
                }),
                None => warn!(conversation_id, "Loopback dropped response for unknown conversation"),
            },
            OutboundFrame::ErrorResponse {
                conversation_id,
                reason,
            } => match state.relayed.remove(&conversation_id) {
                Some(Relay::Single(token)) => replies.push(InboundFrame::Error { token, reason }),
                Some(Relay::Filtered(token)) => replies.push(InboundFrame::FilterError {
                    token,
                    session_id: self.session_id.clone(),
                    reason,
                }),
                None => warn!(conversation_id, "Loopback dropped error for unknown conversation"),
            },
            OutboundFrame::Close => {
                state.closed = true;
            }
        }
        Ok(replies)
    }

    fn push_all(&self, frames: Vec<InboundFrame>) -> Result<(), MessagingError> {
        let guard = self.inbound.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(MessagingError::Transport(
                "loopback inbound channel is closed".to_string(),
            ));
        };
        for frame in frames {
            tx.try_send(frame)
                .map_err(|e| MessagingError::Transport(format!("inbound queue rejected frame: {e}")))?;
        }
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn send_frame(&self, frame: OutboundFrame) -> Result<(), MessagingError> {
        let replies = self.handle(frame)?;
        if replies.is_empty() {
            return Ok(());
        }
        self.push_all(replies)
    }

    fn close(&self) {
        self.state.lock().closed = true;
        if self.inbound.lock().take().is_some() {
            debug!(session = %self.session_id, "Loopback transport closed");
        }
    }
}

fn notices_for(path: &str, topic: &Topic) -> Vec<InboundFrame> {
    let mut frames = vec![InboundFrame::SubscriptionNotice {
        topic_path: path.to_string(),
        specification: topic.specification.clone(),
    }];
    if let Some(value) = &topic.value {
        frames.push(InboundFrame::ValueUpdate {
            topic_path: path.to_string(),
            payload: value.clone(),
        });
    }
    frames
}

/// Evaluates a session filter against the single session served.
fn filter_matches(filter: &str, session_id: &SessionId) -> Result<bool, ErrorReason> {
    let filter = filter.trim();
    if filter.eq_ignore_ascii_case("all") {
        return Ok(true);
    }
    let tokens: Vec<&str> = filter.split_whitespace().collect();
    match tokens.as_slice() {
        [property, op, quoted]
            if property.eq_ignore_ascii_case("$SessionId") && op.eq_ignore_ascii_case("is") =>
        {
            let id = quoted
                .strip_prefix('\'')
                .and_then(|q| q.strip_suffix('\''))
                .ok_or_else(|| failure(format!("expected a quoted session id in filter '{filter}'")))?;
            Ok(id == session_id.as_str())
        }
        _ => Err(failure(format!("unsupported session filter '{filter}'"))),
    }
}

fn failure(message: impl Into<String>) -> ErrorReason {
    ErrorReason::new(LOOPBACK_ERROR_CODE, message)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ErrorReason> {
    serde_json::to_value(value).map_err(|e| failure(e.to_string()))
}

fn set_topic(
    state: &mut PlatformState,
    path: &str,
    payload: Bytes,
) -> Result<Vec<InboundFrame>, ErrorReason> {
    let subscribed = state.is_subscribed(path);
    let Some(topic) = state.topics.get_mut(path) else {
        return Err(failure(format!("no topic at '{path}'")));
    };
    ValueCodec
        .decode(topic.specification.topic_type, &payload)
        .map_err(|e| failure(format!("invalid value for '{path}': {e}")))?;
    topic.value = Some(payload.clone());
    if subscribed {
        Ok(vec![InboundFrame::ValueUpdate {
            topic_path: path.to_string(),
            payload,
        }])
    } else {
        Ok(Vec::new())
    }
}

/// Serves a platform service call, returning its outcome and any notices
/// the change causes for the subscribed session.
fn serve(
    state: &mut PlatformState,
    request: ServiceRequest,
    payload: Bytes,
) -> (Result<serde_json::Value, ErrorReason>, Vec<InboundFrame>) {
    let mut notices = Vec::new();
    let outcome = match request {
        ServiceRequest::AddTopic {
            path,
            specification,
        } => match state.topics.get(&path) {
            Some(existing) if existing.specification == specification => {
                to_json(&AddTopicResult::Exists)
            }
            Some(_) => Err(failure(format!(
                "topic '{path}' exists with a different specification"
            ))),
            None if path.trim_matches('/').is_empty() => Err(failure("topic path cannot be empty")),
            None => {
                let topic = Topic {
                    specification,
                    value: None,
                };
                if state.is_subscribed(&path) {
                    notices.extend(notices_for(&path, &topic));
                }
                state.topics.insert(path, topic);
                to_json(&AddTopicResult::Created)
            }
        },
        ServiceRequest::SetTopic { path } => match set_topic(state, &path, payload) {
            Ok(frames) => {
                notices.extend(frames);
                Ok(serde_json::Value::Null)
            }
            Err(reason) => Err(reason),
        },
        ServiceRequest::RemoveTopics { selector } => match TopicSelector::parse(&selector) {
            Ok(selector) => {
                let removed: Vec<String> = state
                    .topics
                    .keys()
                    .filter(|path| selector.matches(path))
                    .cloned()
                    .collect();
                for path in &removed {
                    state.topics.remove(path);
                    if state.is_subscribed(path) {
                        notices.push(InboundFrame::UnsubscriptionNotice {
                            topic_path: path.clone(),
                            reason: UnsubscribeReason::Removed,
                        });
                    }
                }
                Ok(serde_json::Value::from(removed.len() as u64))
            }
            Err(e) => Err(failure(e.to_string())),
        },
        ServiceRequest::CreateTopicView {
            name,
            specification,
        } => match TopicViewSpec::parse(&specification) {
            Ok(specification) => {
                let view = TopicView::new(name.clone(), specification);
                let json = to_json(&view);
                state.views.insert(name, view);
                json
            }
            Err(e) => Err(failure(e.to_string())),
        },
        ServiceRequest::ListTopicViews => {
            let views: Vec<&TopicView> = state.views.values().collect();
            to_json(&views)
        }
        ServiceRequest::GetTopicView { name } => to_json(&state.views.get(&name)),
        ServiceRequest::RemoveTopicView { name } => {
            state.views.remove(&name);
            Ok(serde_json::Value::Null)
        }
    };
    (outcome, notices)
}
