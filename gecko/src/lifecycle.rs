//! Soft timeout guard for lifecycle calls.
//!
//! Lifecycle calls run on their own task. The caller waits for the task up
//! to a deadline; past it a warning is logged and the caller moves on while
//! the task keeps running in the background. Whatever it returns later is
//! discarded.

use crate::supervisor::panic_message;
use std::{future::Future, time::Duration};
use tokio::{task::JoinError, time::timeout};

/// Default lifecycle deadline.
pub const DEFAULT_LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of a guarded call.
#[derive(Debug, PartialEq, Eq)]
pub enum Guarded<T> {
    /// Finished within the deadline.
    Completed(T),
    /// Still running when the deadline passed.
    TimedOut,
    /// The call panicked (or its task was cancelled).
    Panicked(String),
}

/// Deadline applied to lifecycle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftTimeout {
    deadline: Duration,
}

impl Default for SoftTimeout {
    fn default() -> Self {
        Self::new(DEFAULT_LIFECYCLE_TIMEOUT)
    }
}

impl SoftTimeout {
    /// Create a guard with the given deadline.
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// The deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `call`, waiting at most until the deadline.
    pub async fn guard<F, T>(&self, action: &str, call: F) -> Guarded<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = tokio::spawn(call);
        match timeout(self.deadline, &mut handle).await {
            Ok(Ok(value)) => Guarded::Completed(value),
            Ok(Err(err)) => Guarded::Panicked(join_failure(err)),
            Err(_) => {
                tracing::warn!(
                    action,
                    deadline = ?self.deadline,
                    "lifecycle call exceeded its deadline, continuing without it"
                );
                Guarded::TimedOut
            }
        }
    }

    /// Run `call` to completion, warning once if it outlives the deadline.
    ///
    /// Used where the caller needs the result, e.g. `on_init`.
    pub async fn watch<F, T>(&self, action: &str, call: F) -> Result<T, String>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = tokio::spawn(call);
        let joined = match timeout(self.deadline, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(
                    action,
                    deadline = ?self.deadline,
                    "lifecycle call exceeded its deadline, still waiting"
                );
                handle.await
            }
        };
        joined.map_err(join_failure)
    }
}

fn join_failure(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(&*err.into_panic())
    } else {
        "task cancelled".to_string()
    }
}
