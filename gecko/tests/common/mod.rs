//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use gecko::{
    Engine, EngineBuilder, GeckoConfig, Invoker, Payload, TriggerEvent,
    testing::{
        Journal, ManualTrigger, NullDevice, RecordingDriver, RecordingInterceptor,
        RecordingPlugin, TriggerSlot,
    },
};
use serde_json::{Value, json};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// How long a test waits for a session to complete.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(2);

/// Journal, trigger slot and fault log shared with the engine's components.
#[derive(Clone, Default)]
pub struct Fixture {
    pub journal: Journal,
    pub slot: TriggerSlot,
    pub faults: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder with the recording components registered as
    /// `Recording` (interceptor, driver, plugin), `Manual` (trigger),
    /// `NullDevice` and `JournaledNull` (device), and a fatal handler that
    /// records faults.
    pub fn builder(&self) -> EngineBuilder {
        let (j1, j2, j3, j4, j5) = (
            self.journal.clone(),
            self.journal.clone(),
            self.journal.clone(),
            self.journal.clone(),
            self.journal.clone(),
        );
        let slot = self.slot.clone();
        let faults = self.faults.clone();
        Engine::builder()
            .with_std_components()
            .device("NullDevice", NullDevice::default)
            .interceptor("Recording", move || RecordingInterceptor::new(j1.clone()))
            .driver("Recording", move || RecordingDriver::new(j2.clone()))
            .plugin("Recording", move || RecordingPlugin::new(j3.clone()))
            .trigger("Manual", move || ManualTrigger::new(j4.clone(), slot.clone()))
            .device("JournaledNull", move || NullDevice::default().with_journal(j5.clone()))
            .on_fatal(move |fault| faults.lock().unwrap().push(fault.to_string()))
    }

    /// Build, init and start an engine over [`config`]`(sections)`.
    pub async fn start(&self, sections: Value) -> Engine {
        let mut engine = self.builder().build();
        engine.init(config(sections)).await.expect("init");
        engine.start().await.expect("start");
        engine
    }

    /// The invoker published by the manual trigger.
    pub fn invoker(&self) -> Invoker {
        self.slot.invoker().expect("trigger has been started")
    }

    /// Submit an event on `topic` and wait for its outbound payload.
    pub async fn call(&self, topic: &str) -> Payload {
        tokio::time::timeout(
            COMPLETION_TIMEOUT,
            self.invoker().call(TriggerEvent::new(topic, Payload::new())),
        )
        .await
        .expect("session completes in time")
        .expect("session reaches output")
    }

    pub fn faults(&self) -> Vec<String> {
        self.faults.lock().unwrap().clone()
    }
}

/// A configuration with one `loop` pipeline, one device at address `1` and
/// the manual trigger. Top-level keys of `sections` are added or replace
/// the defaults.
pub fn config(sections: Value) -> GeckoConfig {
    let mut root = json!({
        "GECKO": {"eventsCapacity": 4},
        "PIPELINES": {"loop": {"type": "DevicePipeline", "protocol": "loop"}},
        "DEVICES": {"d1": {"type": "NullDevice", "protocol": "loop", "address": "1"}},
        "TRIGGERS": {"manual": {"type": "Manual"}},
    });
    if let Value::Object(sections) = sections {
        for (key, value) in sections {
            root[key.as_str()] = value;
        }
    }
    GeckoConfig::from_value(root).expect("valid configuration")
}

/// Poll `condition` until it holds or `COMPLETION_TIMEOUT` passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + COMPLETION_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
