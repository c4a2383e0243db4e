//! Scripted components that journal what the engine asks of them.

use gecko_core::{
    BoxError, ComponentConfig, ConfigError, Device, Driver, Frame, GeckoContext, InterceptError,
    Initialize, Interceptor, Invoker, Lifecycle, PipelineSelector, Plugin, Priority, Session,
    TopicExpr, Trigger, async_trait,
};
use std::{
    str::FromStr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

// ============================================================================
// Journal
// ============================================================================

/// A shared, ordered log of observations.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// Copy of all entries in order.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| *e == entry)
            .count()
    }

    /// Entries starting with `prefix`, in order.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Scripted result of a recording component's `handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Succeed.
    #[default]
    Pass,
    /// Interceptors return the drop sentinel; drivers treat it as `Fail`.
    Drop,
    /// Return a handling error.
    Fail,
    /// Panic inside `handle`.
    Panic,
}

impl FromStr for Outcome {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Outcome::Pass),
            "drop" => Ok(Outcome::Drop),
            "fail" => Ok(Outcome::Fail),
            "panic" => Ok(Outcome::Panic),
            other => Err(ConfigError::InvalidValue {
                key: "outcome".to_string(),
                reason: format!("unknown outcome '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Script {
    label: String,
    topics: Vec<TopicExpr>,
    outcome: Outcome,
    delay: Duration,
}

impl Script {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            topics: Vec::new(),
            outcome: Outcome::Pass,
            delay: Duration::ZERO,
        }
    }

    fn configure(&mut self, config: &ComponentConfig) -> Result<(), BoxError> {
        if let Some(label) = config.get_str("label") {
            self.label = label.to_string();
        }
        if config.contains("topics") {
            self.topics = config.topic_exprs()?;
        }
        if let Some(outcome) = config.get_str("outcome") {
            self.outcome = outcome.parse()?;
        }
        self.delay = millis(config, "delayMs", self.delay)?;
        Ok(())
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn millis(config: &ComponentConfig, key: &str, default: Duration) -> Result<Duration, BoxError> {
    let ms = config.get_i64_or(key, default.as_millis() as i64)?;
    Ok(Duration::from_millis(u64::try_from(ms)?))
}

fn compile(topics: &[&str]) -> Vec<TopicExpr> {
    TopicExpr::parse_all(topics).unwrap_or_else(|e| panic!("invalid test topic: {e}"))
}

// ============================================================================
// Recording Interceptor
// ============================================================================

/// An interceptor that journals `interceptor:<label>` and follows its script.
pub struct RecordingInterceptor {
    journal: Journal,
    priority: Priority,
    script: Script,
}

impl RecordingInterceptor {
    /// Create an interceptor writing to `journal`.
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            priority: Priority::default(),
            script: Script::new("interceptor"),
        }
    }

    /// Set the journal label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.script.label = label.to_string();
        self
    }

    /// Set the topic expressions. Panics on invalid expressions.
    pub fn with_topics(mut self, topics: &[&str]) -> Self {
        self.script.topics = compile(topics);
        self
    }

    /// Set the initial priority.
    pub fn with_priority(self, priority: i32) -> Self {
        self.priority.set(priority);
        self
    }

    /// Set the scripted outcome.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.script.outcome = outcome;
        self
    }
}

#[async_trait]
impl Initialize for RecordingInterceptor {
    async fn on_init(&mut self, config: &ComponentConfig, _ctx: &GeckoContext) -> Result<(), BoxError> {
        self.script.configure(config)
    }
}

#[async_trait]
impl Interceptor for RecordingInterceptor {
    fn priority(&self) -> i32 {
        self.priority.get()
    }

    fn set_priority(&self, priority: i32) {
        self.priority.set(priority);
    }

    fn topic_exprs(&self) -> &[TopicExpr] {
        &self.script.topics
    }

    async fn handle(&self, session: &Session, _ctx: &GeckoContext) -> Result<(), InterceptError> {
        self.script.pause().await;
        self.journal.record(format!("interceptor:{}", self.script.label));
        match self.script.outcome {
            Outcome::Pass => Ok(()),
            Outcome::Drop => Err(InterceptError::Dropped),
            Outcome::Fail => Err(InterceptError::failed(format!(
                "{} rejected {}",
                self.script.label,
                session.topic()
            ))),
            Outcome::Panic => panic!("{} panicked", self.script.label),
        }
    }
}

// ============================================================================
// Recording Driver
// ============================================================================

/// A driver that journals `driver:<label>` and, on success, sets the
/// outbound field `<label>` to `"handled"`.
pub struct RecordingDriver {
    journal: Journal,
    script: Script,
    start_delay: Duration,
    stop_delay: Duration,
}

impl RecordingDriver {
    /// Create a driver writing to `journal`.
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            script: Script::new("driver"),
            start_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
        }
    }

    /// Set the journal label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.script.label = label.to_string();
        self
    }

    /// Set the topic expressions. Panics on invalid expressions.
    pub fn with_topics(mut self, topics: &[&str]) -> Self {
        self.script.topics = compile(topics);
        self
    }

    /// Set the scripted outcome.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.script.outcome = outcome;
        self
    }
}

#[async_trait]
impl Initialize for RecordingDriver {
    async fn on_init(&mut self, config: &ComponentConfig, _ctx: &GeckoContext) -> Result<(), BoxError> {
        self.script.configure(config)?;
        self.start_delay = millis(config, "startDelayMs", self.start_delay)?;
        self.stop_delay = millis(config, "stopDelayMs", self.stop_delay)?;
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for RecordingDriver {
    async fn on_start(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        tokio::time::sleep(self.start_delay).await;
        self.journal.record(format!("driver:start:{}", self.script.label));
        Ok(())
    }

    async fn on_stop(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        tokio::time::sleep(self.stop_delay).await;
        self.journal.record(format!("driver:stop:{}", self.script.label));
        Ok(())
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    fn topic_exprs(&self) -> &[TopicExpr] {
        &self.script.topics
    }

    async fn handle(
        &self,
        session: &Session,
        _selector: &PipelineSelector,
        _ctx: &GeckoContext,
    ) -> Result<(), BoxError> {
        self.script.pause().await;
        self.journal.record(format!("driver:{}", self.script.label));
        match self.script.outcome {
            Outcome::Pass => {
                session
                    .outbound()
                    .add_field(self.script.label.clone(), "handled");
                Ok(())
            }
            Outcome::Drop | Outcome::Fail => {
                Err(format!("{} failed on {}", self.script.label, session.topic()).into())
            }
            Outcome::Panic => panic!("{} panicked", self.script.label),
        }
    }
}

// ============================================================================
// Recording Plugin
// ============================================================================

/// A plugin that journals `plugin:start:<label>` / `plugin:stop:<label>`
/// after optional delays.
pub struct RecordingPlugin {
    journal: Journal,
    label: String,
    start_delay: Duration,
    stop_delay: Duration,
}

impl RecordingPlugin {
    /// Create a plugin writing to `journal`.
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            label: "plugin".to_string(),
            start_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
        }
    }

    /// Delay `on_start` by `delay`.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }
}

#[async_trait]
impl Initialize for RecordingPlugin {
    async fn on_init(&mut self, config: &ComponentConfig, _ctx: &GeckoContext) -> Result<(), BoxError> {
        if let Some(label) = config.get_str("label") {
            self.label = label.to_string();
        }
        self.start_delay = millis(config, "startDelayMs", self.start_delay)?;
        self.stop_delay = millis(config, "stopDelayMs", self.stop_delay)?;
        self.journal.record(format!("plugin:init:{}", self.label));
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for RecordingPlugin {
    async fn on_start(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        tokio::time::sleep(self.start_delay).await;
        self.journal.record(format!("plugin:start:{}", self.label));
        Ok(())
    }

    async fn on_stop(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        tokio::time::sleep(self.stop_delay).await;
        self.journal.record(format!("plugin:stop:{}", self.label));
        Ok(())
    }
}

impl Plugin for RecordingPlugin {}

// ============================================================================
// Manual Trigger
// ============================================================================

/// Shared slot through which a [`ManualTrigger`] exposes its invoker.
#[derive(Debug, Clone, Default)]
pub struct TriggerSlot(Arc<Mutex<Option<Invoker>>>);

impl TriggerSlot {
    /// The invoker, while the trigger is started.
    pub fn invoker(&self) -> Option<Invoker> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, invoker: Option<Invoker>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = invoker;
    }
}

/// A trigger that produces nothing by itself; tests submit events through
/// its [`TriggerSlot`].
pub struct ManualTrigger {
    journal: Journal,
    slot: TriggerSlot,
}

impl ManualTrigger {
    /// Create a trigger publishing its invoker into `slot`.
    pub fn new(journal: Journal, slot: TriggerSlot) -> Self {
        Self { journal, slot }
    }
}

#[async_trait]
impl Initialize for ManualTrigger {}

#[async_trait]
impl Trigger for ManualTrigger {
    async fn on_start(&self, _ctx: &GeckoContext, invoker: Invoker) -> Result<(), BoxError> {
        self.slot.set(Some(invoker));
        self.journal.record("trigger:start");
        Ok(())
    }

    async fn on_stop(&self, _ctx: &GeckoContext, _invoker: Invoker) -> Result<(), BoxError> {
        self.slot.set(None);
        self.journal.record("trigger:stop");
        Ok(())
    }
}

// ============================================================================
// Null Device
// ============================================================================

/// A device that echoes every frame.
///
/// Journals `device:start:<address>` / `device:stop:<address>` when given a
/// journal.
pub struct NullDevice {
    protocol: String,
    address: String,
    journal: Option<Journal>,
}

impl NullDevice {
    /// Create a device at `address` for `protocol`.
    pub fn new(protocol: &str, address: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            address: address.to_string(),
            journal: None,
        }
    }

    /// Record lifecycle calls in `journal`.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[async_trait]
impl Initialize for NullDevice {
    async fn on_init(&mut self, config: &ComponentConfig, _ctx: &GeckoContext) -> Result<(), BoxError> {
        if let Some(protocol) = config.get_str("protocol") {
            self.protocol = protocol.to_string();
        }
        if let Some(address) = config.get_str("address") {
            self.address = address.to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for NullDevice {
    async fn on_start(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        if let Some(journal) = &self.journal {
            journal.record(format!("device:start:{}", self.address));
        }
        Ok(())
    }

    async fn on_stop(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        if let Some(journal) = &self.journal {
            journal.record(format!("device:stop:{}", self.address));
        }
        Ok(())
    }
}

#[async_trait]
impl Device for NullDevice {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn process(&self, frame: Frame, _ctx: &GeckoContext) -> Result<Frame, BoxError> {
        Ok(frame)
    }
}
