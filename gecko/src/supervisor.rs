//! Fault policy.
//!
//! Every fault raised while processing sessions or running lifecycle calls
//! is reported here. Faults are always logged; with fail-fast enabled they
//! are additionally handed to the [`FatalHandler`], which by default
//! terminates the process.

use crate::dispatcher::Stage;
use gecko_core::BoxError;
use std::{any::Any, sync::Arc};
use thiserror::Error;

/// Exit status used by the default fatal handler.
pub const FAIL_FAST_EXIT_CODE: i32 = 1;

/// A failure observed by the engine.
#[derive(Error, Debug)]
pub enum Fault {
    /// An interceptor or driver returned an error.
    #[error("{stage} component '{component}' failed on topic '{topic}'")]
    Handling {
        /// Stage the component runs in.
        stage: Stage,
        /// Instance name.
        component: String,
        /// Topic of the session being handled.
        topic: String,
        /// The returned error.
        #[source]
        error: BoxError,
    },

    /// A stage handler panicked; the session went no further.
    #[error("{stage} stage panicked for session {session} on topic '{topic}': {message}")]
    Panicked {
        /// Stage that panicked.
        stage: Stage,
        /// Session id.
        session: i64,
        /// Session topic.
        topic: String,
        /// Panic message.
        message: String,
    },

    /// A lifecycle call returned an error or panicked.
    #[error("lifecycle call {action} failed")]
    Lifecycle {
        /// Lifecycle action, e.g. `Driver.Start(relay)`.
        action: String,
        /// The failure.
        #[source]
        error: BoxError,
    },
}

/// Escalation target for faults under fail-fast.
pub type FatalHandler = Arc<dyn Fn(&Fault) + Send + Sync>;

/// The default fatal handler: exit the process.
pub fn exit_process() -> FatalHandler {
    Arc::new(|fault| {
        tracing::error!(%fault, "fail-fast: terminating process");
        std::process::exit(FAIL_FAST_EXIT_CODE);
    })
}

/// Logs faults and escalates them under fail-fast.
pub struct Supervisor {
    fail_fast: bool,
    fatal: FatalHandler,
}

impl Supervisor {
    /// Create a supervisor.
    pub fn new(fail_fast: bool, fatal: FatalHandler) -> Self {
        Self { fail_fast, fatal }
    }

    /// Whether faults are escalated.
    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Log `fault` and, under fail-fast, escalate it.
    pub fn report(&self, fault: Fault) {
        match &fault {
            Fault::Handling { error, .. } | Fault::Lifecycle { error, .. } => {
                tracing::error!(%fault, %error, fail_fast = self.fail_fast, "component failure");
            }
            Fault::Panicked { .. } => {
                tracing::error!(%fault, fail_fast = self.fail_fast, "stage handler panicked");
            }
        }
        if self.fail_fast {
            (self.fatal)(&fault);
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("fail_fast", &self.fail_fast)
            .finish_non_exhaustive()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
