// src/core/pubsub/mod.rs

//! The subscription registry and value dispatcher.
//!
//! The registry owns every active subscription and routes inbound value
//! updates to exactly those whose selector matches the update's topic path.
//! Each subscription keeps the last delivered value per topic path so that
//! handlers observe a `previous -> current` chain in transport order.

use crate::core::codec::{DataType, Value, ValueCodec};
use crate::core::errors::MessagingError;
use crate::core::isolation::{HandlerKind, invoke_isolated};
use crate::core::metrics::{VALUE_DECODE_FAILURES_TOTAL, VALUE_UPDATES_DISPATCHED_TOTAL};
use crate::core::topics::{TopicSelector, TopicSpecification, UnsubscribeReason};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

pub mod stream;

pub use stream::{SubscriptionId, ValueStream, ValueUpdate};

/// The last value delivered for one (subscription, topic path) pair.
/// Holding its lock serializes deliveries for that pair.
type TopicSlot = Arc<Mutex<Option<Value>>>;

/// A registered value stream bound to a selector and a declared value type.
pub struct Subscription {
    id: SubscriptionId,
    selector: TopicSelector,
    value_type: DataType,
    stream: Arc<dyn ValueStream>,
    active: AtomicBool,
    topics: DashMap<String, TopicSlot>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn selector(&self) -> &TopicSelector {
        &self.selector
    }

    pub fn value_type(&self) -> DataType {
        self.value_type
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The topic paths this subscription has received values for.
    pub fn topic_paths(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    fn is_same_registration(&self, selector: &TopicSelector, stream: &Arc<dyn ValueStream>) -> bool {
        self.selector == *selector && std::ptr::addr_eq(Arc::as_ptr(&self.stream), Arc::as_ptr(stream))
    }

    /// Decodes and delivers one update. Returns true if the handler was invoked.
    fn deliver(&self, topic_path: &str, payload: &[u8], catch_panics: bool) -> bool {
        let slot = self
            .topics
            .entry(topic_path.to_string())
            .or_default()
            .clone();
        let mut previous = slot.lock();

        // An unsubscribe may have raced with the snapshot taken by `dispatch`.
        if !self.is_active() {
            return false;
        }

        let current = match ValueCodec.decode(self.value_type, payload) {
            Ok(value) => value,
            Err(e) => {
                VALUE_DECODE_FAILURES_TOTAL.inc();
                warn!(
                    subscription = %self.id,
                    topic = topic_path,
                    "Failed to decode value update: {}",
                    e
                );
                let error = MessagingError::Decode(e);
                invoke_isolated(HandlerKind::Value, catch_panics, || {
                    self.stream.on_error(topic_path, &error);
                    Ok(())
                });
                return false;
            }
        };

        let update = ValueUpdate {
            previous: previous.take(),
            current,
        };
        invoke_isolated(HandlerKind::Value, catch_panics, || {
            self.stream.on_value(topic_path, &update)
        });
        *previous = Some(update.current);
        VALUE_UPDATES_DISPATCHED_TOTAL.inc();
        true
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("selector", &self.selector.expression())
            .field("value_type", &self.value_type)
            .field("active", &self.is_active())
            .finish()
    }
}

/// The result of a `subscribe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: SubscriptionId,
    /// False if the (selector, handler) pair was already registered.
    pub created: bool,
    /// True if no other subscription used this selector before.
    pub first_for_selector: bool,
}

/// The result of removing a subscription.
#[derive(Debug, Clone)]
pub struct Removal {
    pub selector: TopicSelector,
    /// True if no remaining subscription uses this selector.
    pub last_for_selector: bool,
}

/// `SubscriptionRegistry` owns the active subscriptions and the set of topics
/// the server currently delivers to this session.
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,
    /// Topics the server has advertised via subscription notices.
    known_topics: DashMap<String, TopicSpecification>,
    /// Serializes registration changes so the uniqueness check and insert are atomic.
    registration: Mutex<()>,
    catch_panics: bool,
}

impl SubscriptionRegistry {
    pub fn new(catch_panics: bool) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: DashMap::new(),
            known_topics: DashMap::new(),
            registration: Mutex::new(()),
            catch_panics,
        }
    }

    /// Registers `stream` for topics matching `selector`.
    ///
    /// Succeeds even if no topic currently matches. Registering the same
    /// (selector, stream) pair again returns the existing id.
    pub fn subscribe(
        &self,
        selector: TopicSelector,
        value_type: DataType,
        stream: Arc<dyn ValueStream>,
    ) -> Registration {
        let (subscription, first_for_selector) = {
            let _guard = self.registration.lock();

            let mut first_for_selector = true;
            for entry in self.subscriptions.iter() {
                if entry.is_same_registration(&selector, &stream) {
                    return Registration {
                        id: entry.id,
                        created: false,
                        first_for_selector: false,
                    };
                }
                if entry.selector == selector {
                    first_for_selector = false;
                }
            }

            let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let subscription = Arc::new(Subscription {
                id,
                selector,
                value_type,
                stream,
                active: AtomicBool::new(true),
                topics: DashMap::new(),
            });
            self.subscriptions.insert(id, subscription.clone());
            (subscription, first_for_selector)
        };

        debug!(
            subscription = %subscription.id,
            selector = %subscription.selector,
            "Registered value stream"
        );

        // Tell the new stream about topics the server is already delivering.
        let already_known: Vec<(String, TopicSpecification)> = self
            .known_topics
            .iter()
            .filter(|e| subscription.selector.matches(e.key()))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (topic_path, specification) in already_known {
            invoke_isolated(HandlerKind::Value, self.catch_panics, || {
                subscription.stream.on_subscription(&topic_path, &specification);
                Ok(())
            });
        }

        Registration {
            id: subscription.id,
            created: true,
            first_for_selector,
        }
    }

    /// Removes a registration. Returns `None` if it was already removed.
    ///
    /// Deliveries already in progress are not retracted.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Option<Removal> {
        let (removal, stream) = self.detach(id)?;
        self.close_stream(&stream);
        Some(removal)
    }

    /// Removes a registration without closing its stream. The caller hands
    /// the returned stream to `close_stream` once it holds no locks.
    pub fn detach(&self, id: SubscriptionId) -> Option<(Removal, Arc<dyn ValueStream>)> {
        let (subscription, last_for_selector) = {
            let _guard = self.registration.lock();
            let (_, subscription) = self.subscriptions.remove(&id)?;
            subscription.active.store(false, Ordering::Release);
            let last = !self
                .subscriptions
                .iter()
                .any(|e| e.selector == subscription.selector);
            (subscription, last)
        };

        debug!(subscription = %id, selector = %subscription.selector, "Removed value stream");
        let removal = Removal {
            selector: subscription.selector.clone(),
            last_for_selector,
        };
        Some((removal, subscription.stream.clone()))
    }

    /// Tells a detached stream it will receive nothing more.
    pub fn close_stream(&self, stream: &Arc<dyn ValueStream>) {
        invoke_isolated(HandlerKind::Value, self.catch_panics, || {
            stream.on_close();
            Ok(())
        });
    }

    /// Routes one inbound update to every matching subscription.
    ///
    /// Returns the number of handlers that received a decoded value.
    pub fn dispatch(&self, topic_path: &str, payload: &[u8]) -> usize {
        let matching = self.matching(topic_path);
        if matching.is_empty() {
            debug!(topic = topic_path, "Value update matched no subscription");
            return 0;
        }
        matching
            .iter()
            .filter(|sub| sub.deliver(topic_path, payload, self.catch_panics))
            .count()
    }

    /// Records that the server now delivers `topic_path` and notifies matching streams.
    pub fn on_subscription(&self, topic_path: &str, specification: &TopicSpecification) {
        self.known_topics
            .insert(topic_path.to_string(), specification.clone());
        for sub in self.matching(topic_path) {
            invoke_isolated(HandlerKind::Value, self.catch_panics, || {
                sub.stream.on_subscription(topic_path, specification);
                Ok(())
            });
        }
    }

    /// Records that the server stopped delivering `topic_path`.
    ///
    /// Stored previous values are discarded, so a later resubscription starts a
    /// fresh chain.
    pub fn on_unsubscription(&self, topic_path: &str, reason: UnsubscribeReason) {
        self.known_topics.remove(topic_path);
        for sub in self.matching(topic_path) {
            sub.topics.remove(topic_path);
            invoke_isolated(HandlerKind::Value, self.catch_panics, || {
                sub.stream.on_unsubscription(topic_path, reason);
                Ok(())
            });
        }
    }

    /// Removes every registration, notifying each stream. Returns how many were removed.
    pub fn discard_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self.subscription_ids();
        ids.into_iter()
            .filter(|id| self.unsubscribe(*id).is_some())
            .count()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subscriptions.get(&id).map(|e| e.value().clone())
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// The distinct selectors currently in use.
    pub fn selectors(&self) -> Vec<TopicSelector> {
        let mut selectors: Vec<TopicSelector> = Vec::new();
        for entry in self.subscriptions.iter() {
            if !selectors.contains(&entry.selector) {
                selectors.push(entry.selector.clone());
            }
        }
        selectors
    }

    /// Topics the server has advertised and not yet withdrawn.
    pub fn known_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.known_topics.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Snapshots the matching subscriptions so no map lock is held during delivery.
    fn matching(&self, topic_path: &str) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .iter()
            .filter(|e| e.selector.matches(topic_path))
            .map(|e| e.value().clone())
            .collect()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}
