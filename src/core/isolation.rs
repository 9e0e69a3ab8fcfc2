// src/core/isolation.rs

//! Runs caller-supplied handlers so that their failures stay contained.
//!
//! A handler that returns an error or panics is logged and counted; the caller
//! (a dispatcher or resolver loop) always continues with its next delivery.

use crate::core::metrics::HANDLER_FAILURES_TOTAL;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::error;

/// The kind of handler being invoked, used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum HandlerKind {
    Value,
    Response,
    Request,
    Listener,
}

/// Invokes `f`, containing any returned error or panic.
///
/// Returns `true` if the handler completed successfully.
pub fn invoke_isolated<F>(kind: HandlerKind, catch_panics: bool, f: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let outcome = if catch_panics {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&panic))),
        }
    } else {
        f()
    };

    match outcome {
        Ok(()) => true,
        Err(e) => {
            let label: &'static str = kind.into();
            HANDLER_FAILURES_TOTAL.with_label_values(&[label]).inc();
            error!(handler = %kind, "Handler failed: {:#}", e);
            false
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
