//! Routing, ordering and completion behaviour of the dispatch stages.

mod common;

use common::{Fixture, eventually};
use gecko::{
    BoxError, ComponentConfig, Driver, GeckoContext, Initialize, Lifecycle, Payload,
    PipelineSelector, Session, TopicExpr, TriggerEvent, async_trait,
};
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

fn recording(label: &str, topics: &[&str]) -> serde_json::Value {
    json!({"type": "Recording", "label": label, "topics": topics})
}

#[tokio::test]
async fn test_routes_by_topic() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "INTERCEPTORS": {
                "auth": recording("auth", &["/door/+"]),
                "audit": recording("audit", &["/window/#"]),
            },
            "DRIVERS": {
                "relay": recording("relay", &["/door/#"]),
                "alarm": recording("alarm", &["/window/#"]),
            },
        }))
        .await;

    let out = fx.call("/door/1").await;

    assert_eq!(fx.journal.with_prefix("interceptor:"), vec!["interceptor:auth"]);
    assert_eq!(fx.journal.with_prefix("driver:"), vec![
        "driver:start:relay",
        "driver:start:alarm",
        "driver:relay"
    ]);
    assert_eq!(out.get("relay"), Some(&json!("handled")));
    assert!(!out.contains_key("alarm"));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_unmatched_topic_reaches_no_component() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "INTERCEPTORS": {"auth": recording("auth", &["/door/+"])},
            "DRIVERS": {"relay": recording("relay", &["/door/+"])},
        }))
        .await;

    let out = fx.call("/door/1/extra").await;

    assert!(out.is_empty());
    assert!(fx.journal.with_prefix("interceptor:").is_empty());
    assert_eq!(fx.journal.count("driver:relay"), 0);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_interceptors_run_in_ascending_priority() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "INTERCEPTORS": {
                "p10": {"type": "Recording", "label": "p10", "topics": ["/#"], "priority": 10},
                "p5": {"type": "Recording", "label": "p5", "topics": ["/#"], "priority": 5},
                "p20": {"type": "Recording", "label": "p20", "topics": ["/#"], "priority": 20},
            },
        }))
        .await;

    fx.call("/x").await;

    assert_eq!(fx.journal.with_prefix("interceptor:"), vec![
        "interceptor:p5",
        "interceptor:p10",
        "interceptor:p20"
    ]);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_drop_short_circuits_to_output() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "INTERCEPTORS": {
                "gate": {"type": "Recording", "label": "gate", "topics": ["/#"], "priority": 1, "outcome": "drop"},
                "late": {"type": "Recording", "label": "late", "topics": ["/#"], "priority": 2},
            },
            "DRIVERS": {"relay": recording("relay", &["/#"])},
        }))
        .await;

    let out = fx.call("/door/1").await;

    assert_eq!(out.get("error"), Some(&json!("InterceptorDropped")));
    assert_eq!(fx.journal.with_prefix("interceptor:"), vec!["interceptor:gate"]);
    assert_eq!(fx.journal.count("driver:relay"), 0);
    assert!(fx.faults().is_empty(), "a drop is not a fault");
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_interceptor_failure_does_not_stop_the_chain() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "INTERCEPTORS": {
                "flaky": {"type": "Recording", "label": "flaky", "topics": ["/#"], "priority": 1, "outcome": "fail"},
                "next": {"type": "Recording", "label": "next", "topics": ["/#"], "priority": 2},
            },
            "DRIVERS": {"relay": recording("relay", &["/#"])},
        }))
        .await;

    let out = fx.call("/door/1").await;

    assert_eq!(fx.journal.with_prefix("interceptor:"), vec![
        "interceptor:flaky",
        "interceptor:next"
    ]);
    assert_eq!(out.get("relay"), Some(&json!("handled")));
    assert!(!out.contains_key("error"));
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_all_matching_drivers_run_despite_errors() {
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "DRIVERS": {
                "a": {"type": "Recording", "label": "a", "topics": ["/#"], "outcome": "fail"},
                "b": recording("b", &["/#"]),
                "c": {"type": "Recording", "label": "c", "topics": ["/#"], "outcome": "fail"},
            },
        }))
        .await;

    let out = fx.call("/any").await;

    let handled: Vec<String> = fx
        .journal
        .with_prefix("driver:")
        .into_iter()
        .filter(|e| !e.starts_with("driver:start:"))
        .collect();
    assert_eq!(handled, vec!["driver:a", "driver:b", "driver:c"]);
    assert_eq!(out.get("b"), Some(&json!("handled")));
    assert_eq!(out.len(), 1);
    assert!(fx.faults().is_empty(), "fail-fast is off");
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_registry_passes_through() {
    let fx = Fixture::new();
    let engine = fx.start(json!({})).await;

    let out = fx.call("/anything/at/all").await;

    assert!(out.is_empty());
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_every_session_completes_exactly_once() {
    const EVENTS: usize = 32;
    let fx = Fixture::new();
    let engine = fx
        .start(json!({
            "INTERCEPTORS": {"auth": recording("auth", &["/#"])},
            "DRIVERS": {"relay": recording("relay", &["/#"])},
        }))
        .await;

    let counters: Vec<Arc<AtomicUsize>> = (0..EVENTS).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let invoker = fx.invoker();
    let submitters: Vec<_> = counters
        .iter()
        .enumerate()
        .map(|(i, counter)| {
            let invoker = invoker.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                invoker
                    .invoke(TriggerEvent::new(format!("/door/{i}"), Payload::new()), move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
            })
        })
        .collect();
    for submitter in submitters {
        submitter.await.unwrap().unwrap();
    }

    let total = || counters.iter().map(|c| c.load(Ordering::SeqCst)).sum::<usize>();
    assert!(eventually(|| total() == EVENTS).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    assert_eq!(fx.journal.count("driver:relay"), EVENTS);

    engine.stop().await.unwrap();
}

// ============================================================================
// Drivers reaching devices
// ============================================================================

/// Sends the inbound `frame` field to device `1` of the `loop` pipeline and
/// writes the reply to the outbound `reply` field.
#[derive(Default)]
struct EchoDriver {
    topics: Vec<TopicExpr>,
}

#[async_trait]
impl Initialize for EchoDriver {
    async fn on_init(&mut self, config: &ComponentConfig, _ctx: &GeckoContext) -> Result<(), BoxError> {
        self.topics = config.topic_exprs()?;
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for EchoDriver {}

#[async_trait]
impl Driver for EchoDriver {
    fn topic_exprs(&self) -> &[TopicExpr] {
        &self.topics
    }

    async fn handle(
        &self,
        session: &Session,
        selector: &PipelineSelector,
        ctx: &GeckoContext,
    ) -> Result<(), BoxError> {
        let frame = session.inbound().data.get("frame").and_then(|v| v.as_str()).unwrap_or_default();
        let pipeline = selector.select("loop").ok_or("no loop pipeline")?;
        let reply = pipeline.execute("1", frame.as_bytes().to_vec(), ctx).await?;
        session.outbound().add_field("reply", String::from_utf8(reply)?);
        session.outbound().add_field(
            "afterInterceptors",
            session.attributes().contains("Interceptor.End"),
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_driver_reaches_device_through_selector() {
    let fx = Fixture::new();
    let mut engine = fx.builder().driver("Echo", EchoDriver::default).build();
    engine
        .init(common::config(json!({"DRIVERS": {"echo": {"type": "Echo", "topics": ["/echo"]}}})))
        .await
        .unwrap();
    engine.start().await.unwrap();

    let mut data = Payload::new();
    data.insert("frame".into(), json!("ping"));
    let out = fx.invoker().call(TriggerEvent::new("/echo", data)).await.unwrap();

    assert_eq!(out.get("reply"), Some(&json!("ping")));
    assert_eq!(out.get("afterInterceptors"), Some(&json!(true)));
    assert_eq!(engine.registry().unwrap().selector().len(), 1);
    engine.stop().await.unwrap();
}
