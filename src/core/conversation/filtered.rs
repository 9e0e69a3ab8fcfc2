// src/core/conversation/filtered.rs

//! State of requests sent to every session matching a filter.
//!
//! A filtered conversation stays pending until the platform has reported how
//! many sessions it reached and that many answers have arrived. Answers are
//! delivered one at a time. The handler is taken out of its slot while it
//! runs, so a close that lands mid-delivery is parked and performed by the
//! delivering thread once the handler returns.

use super::handler::FilteredResponseHandler;
use super::timer::TimerHandle;
use crate::core::codec::DataType;
use crate::core::errors::MessagingError;
use crate::core::isolation::{HandlerKind, invoke_isolated};
use crate::core::protocol::ConversationTarget;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// One outstanding filtered request.
pub(super) struct FilteredConversation {
    pub(super) target: ConversationTarget,
    pub(super) response_type: DataType,
    /// Sessions reached, once the platform has said.
    pub(super) expected: Option<usize>,
    pub(super) answered: usize,
    pub(super) slot: Arc<FilteredSlot>,
    pub(super) timer: Option<TimerHandle>,
    pub(super) sent_at: Instant,
}

impl FilteredConversation {
    pub(super) fn new<H: FilteredResponseHandler>(
        target: ConversationTarget,
        response_type: DataType,
        handler: H,
    ) -> Self {
        Self {
            target,
            response_type,
            expected: None,
            answered: 0,
            slot: Arc::new(FilteredSlot {
                state: Mutex::new(SlotState {
                    handler: Some(Box::new(handler)),
                    parked_close: None,
                }),
            }),
            timer: None,
            sent_at: Instant::now(),
        }
    }

    pub(super) fn is_complete(&self) -> bool {
        self.expected.is_some_and(|expected| self.answered >= expected)
    }
}

struct SlotState {
    handler: Option<Box<dyn FilteredResponseHandler>>,
    parked_close: Option<Result<(), MessagingError>>,
}

/// Holds a filtered handler between deliveries.
pub(super) struct FilteredSlot {
    state: Mutex<SlotState>,
}

impl FilteredSlot {
    /// Runs `f` against the handler. Returns false if the handler is gone.
    pub(super) fn deliver<F>(&self, catch_panics: bool, f: F) -> bool
    where
        F: FnOnce(&mut dyn FilteredResponseHandler),
    {
        let Some(mut handler) = self.state.lock().handler.take() else {
            debug!("Filtered handler already closed; dropping delivery");
            return false;
        };
        invoke_isolated(HandlerKind::Response, catch_panics, || {
            f(handler.as_mut());
            Ok(())
        });

        let outcome = {
            let mut state = self.state.lock();
            match state.parked_close.take() {
                Some(outcome) => outcome,
                None => {
                    state.handler = Some(handler);
                    return true;
                }
            }
        };
        close_handler(handler, catch_panics, outcome);
        true
    }

    /// Closes the handler, or parks the close if a delivery is running.
    pub(super) fn close(&self, catch_panics: bool, outcome: Result<(), MessagingError>) {
        let handler = {
            let mut state = self.state.lock();
            match state.handler.take() {
                Some(handler) => handler,
                None => {
                    state.parked_close = Some(outcome);
                    return;
                }
            }
        };
        close_handler(handler, catch_panics, outcome);
    }
}

fn close_handler(
    handler: Box<dyn FilteredResponseHandler>,
    catch_panics: bool,
    outcome: Result<(), MessagingError>,
) {
    invoke_isolated(HandlerKind::Response, catch_panics, move || {
        handler.on_close(outcome);
        Ok(())
    });
}
