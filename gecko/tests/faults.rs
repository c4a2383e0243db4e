//! Fault isolation and fail-fast escalation.

mod common;

use common::{COMPLETION_TIMEOUT, Fixture, eventually};
use gecko::{
    BoxError, DispatchError, GeckoContext, Initialize, Lifecycle, Payload, Plugin, TriggerEvent,
    async_trait,
};
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[tokio::test]
async fn test_driver_panic_is_contained_to_its_session() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "DRIVERS": {
                "boom": {"type": "Recording", "label": "boom", "topics": ["/boom"], "outcome": "panic"},
                "relay": {"type": "Recording", "label": "relay", "topics": ["/#"]},
            },
        }))
        .await;

    let doomed = tokio::time::timeout(
        COMPLETION_TIMEOUT,
        fx.invoker().call(TriggerEvent::new("/boom", Payload::new())),
    )
    .await
    .expect("abandoned sessions are noticed");
    assert_eq!(doomed, Err(DispatchError::Abandoned));

    let out = fx.call("/fine").await;
    assert_eq!(out.get("relay"), Some(&json!("handled")));
    assert!(fx.faults().is_empty(), "fail-fast is off");

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_interceptor_panic_skips_drivers() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "INTERCEPTORS": {"boom": {"type": "Recording", "label": "boom", "topics": ["/boom/#"], "outcome": "panic"}},
            "DRIVERS": {"relay": {"type": "Recording", "label": "relay", "topics": ["/#"]}},
        }))
        .await;

    let result = fx.invoker().call(TriggerEvent::new("/boom/1", Payload::new())).await;
    assert_eq!(result, Err(DispatchError::Abandoned));
    assert_eq!(fx.journal.count("driver:relay"), 0);

    fx.call("/calm").await;
    assert_eq!(fx.journal.count("driver:relay"), 1);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_fail_fast_escalates_handling_errors() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "GECKO": {"failFastEnabled": true},
            "INTERCEPTORS": {"strict": {"type": "Recording", "label": "strict", "topics": ["/#"], "outcome": "fail"}},
            "DRIVERS": {"relay": {"type": "Recording", "label": "relay", "topics": ["/#"], "outcome": "fail"}},
        }))
        .await;
    assert!(engine.context().unwrap().is_fail_fast());

    fx.call("/door").await;

    let faults = fx.faults();
    assert_eq!(faults.len(), 2, "{faults:?}");
    assert!(faults[0].contains("Interceptor") && faults[0].contains("strict"));
    assert!(faults[1].contains("Driver") && faults[1].contains("relay"));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_fail_fast_escalates_panics() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "GECKO": {"failFastEnabled": true},
            "DRIVERS": {"boom": {"type": "Recording", "label": "boom", "topics": ["/#"], "outcome": "panic"}},
        }))
        .await;

    let invoker = fx.invoker();
    invoker
        .invoke(TriggerEvent::new("/door", Payload::new()), |_| {})
        .await
        .unwrap();

    assert!(eventually(|| !fx.faults().is_empty()).await);
    let faults = fx.faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].contains("Driver stage panicked"), "{}", faults[0]);
    assert!(faults[0].contains("boom panicked"));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_completion_callback_fires_once() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "GECKO": {"failFastEnabled": true},
            "DRIVERS": {"relay": {"type": "Recording", "label": "relay", "topics": ["/#"]}},
        }))
        .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    fx.invoker()
        .invoke(TriggerEvent::new("/x", Payload::new()), move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            panic!("callback exploded");
        })
        .await
        .unwrap();

    assert!(eventually(|| !fx.faults().is_empty()).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let faults = fx.faults();
    assert_eq!(faults.len(), 1, "{faults:?}");
    assert!(faults[0].contains("Output stage panicked"), "{}", faults[0]);
    assert!(faults[0].contains("callback exploded"));

    let out = fx.call("/y").await;
    assert_eq!(out.get("relay"), Some(&json!("handled")));
    engine.stop().await.unwrap();
}

struct FailingPlugin;

#[async_trait]
impl Initialize for FailingPlugin {}

#[async_trait]
impl Lifecycle for FailingPlugin {
    async fn on_start(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        Err("disk full".into())
    }
}

impl Plugin for FailingPlugin {}

#[tokio::test]
async fn test_lifecycle_failure_does_not_stop_the_sequence() {
    for fail_fast in [false, true] {
        let fx = Fixture::new();
        let mut engine = fx.builder().plugin("Failing", || FailingPlugin).build();
        engine
            .init(common::config(json!({
                "GECKO": {"failFastEnabled": fail_fast},
                "PLUGINS": {"store": {"type": "Failing"}},
                "DRIVERS": {"relay": {"type": "Recording", "label": "relay"}},
            })))
            .await
            .unwrap();
        engine.start().await.unwrap();

        assert_eq!(fx.journal.count("driver:start:relay"), 1);
        assert_eq!(fx.journal.count("trigger:start"), 1);
        let faults = fx.faults();
        if fail_fast {
            assert_eq!(faults.len(), 1);
            assert!(faults[0].contains("Plugin.Start(store)"), "{}", faults[0]);
        } else {
            assert!(faults.is_empty());
        }
        engine.stop().await.unwrap();
    }
}
