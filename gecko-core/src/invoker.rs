//! Event intake for triggers.

use crate::{
    error::DispatchError,
    session::{OnCompleted, Payload},
};
use futures::{channel::oneshot, future::BoxFuture};
use std::{fmt, future::Future, sync::Arc};

/// An event produced by a trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    topic: String,
    data: Payload,
}

impl TriggerEvent {
    /// Create an event for `topic` carrying `data`.
    pub fn new(topic: impl Into<String>, data: Payload) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    /// Routing topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Event data.
    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// Split into topic and data.
    pub fn into_parts(self) -> (String, Payload) {
        (self.topic, self.data)
    }
}

type SubmitFn =
    dyn Fn(TriggerEvent, OnCompleted) -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync;

/// The callback triggers use to submit events into the dispatch stages.
///
/// Cloning is cheap; every clone feeds the same engine.
#[derive(Clone)]
pub struct Invoker {
    submit: Arc<SubmitFn>,
}

impl Invoker {
    /// Build an invoker from a submit function.
    pub fn new<F, Fut>(submit: F) -> Self
    where
        F: Fn(TriggerEvent, OnCompleted) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        Self {
            submit: Arc::new(move |event, on_completed| Box::pin(submit(event, on_completed))),
        }
    }

    /// Submit `event`; `on_completed` receives the outbound payload.
    ///
    /// Waits while the first stage is full.
    pub async fn invoke<F>(&self, event: TriggerEvent, on_completed: F) -> Result<(), DispatchError>
    where
        F: FnOnce(Payload) + Send + 'static,
    {
        (self.submit)(event, Box::new(on_completed)).await
    }

    /// Submit `event` and wait for its outbound payload.
    pub async fn call(&self, event: TriggerEvent) -> Result<Payload, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.invoke(event, move |out| {
            let _ = tx.send(out);
        })
        .await?;
        rx.await.map_err(|_| DispatchError::Abandoned)
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_call_returns_outbound() {
        let invoker = Invoker::new(|event: TriggerEvent, done: OnCompleted| async move {
            let mut out = Payload::new();
            out.insert("echo".into(), json!(event.topic()));
            done(out);
            Ok(())
        });
        let out = invoker.call(TriggerEvent::new("/ping", Payload::new())).await.unwrap();
        assert_eq!(out["echo"], json!("/ping"));
    }

    #[tokio::test]
    async fn test_call_abandoned_when_callback_dropped() {
        let invoker = Invoker::new(|_event, done: OnCompleted| async move {
            drop(done);
            Ok(())
        });
        let err = invoker.call(TriggerEvent::new("/ping", Payload::new())).await.unwrap_err();
        assert_eq!(err, DispatchError::Abandoned);
    }

    #[tokio::test]
    async fn test_closed_is_propagated() {
        let invoker = Invoker::new(|_event, _done| async { Err(DispatchError::Closed) });
        let err = invoker.call(TriggerEvent::new("/ping", Payload::new())).await.unwrap_err();
        assert_eq!(err, DispatchError::Closed);
    }
}
