//! # Component Roles
//!
//! Every pluggable piece of an engine implements one role trait. Roles are
//! kept in homogeneous collections by the engine, so no runtime downcasts are
//! needed.
//!
//! | Role | Lifecycle | Routed | Purpose |
//! |------|-----------|--------|---------|
//! | [`Plugin`] | init/start/stop | no | cross-cutting services |
//! | [`Pipeline`] | init/start/stop | no | protocol adapter, owns devices |
//! | [`Device`] | init (start/stop via pipeline) | no | one physical endpoint |
//! | [`Interceptor`] | init | yes | ordered gatekeeping, may drop |
//! | [`Driver`] | init/start/stop | yes | fan-out business logic |
//! | [`Trigger`] | init/start/stop with [`Invoker`] | no | event source |
//!
//! All async methods use `async_trait` so the roles stay object safe.

use crate::{
    config::ComponentConfig,
    context::GeckoContext,
    error::{BoxError, InterceptError},
    invoker::Invoker,
    session::Session,
    topic::TopicExpr,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI32, Ordering},
    },
};

/// Raw bytes exchanged with a device.
pub type Frame = Vec<u8>;

/// Initialization contract shared by all roles.
#[async_trait]
pub trait Initialize: Send + Sync + 'static {
    /// Called once with the instance's configuration before registration.
    async fn on_init(&mut self, config: &ComponentConfig, ctx: &GeckoContext) -> Result<(), BoxError> {
        let _ = (config, ctx);
        Ok(())
    }
}

/// Start/stop contract.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Called when the engine starts.
    async fn on_start(&self, ctx: &GeckoContext) -> Result<(), BoxError> {
        let _ = ctx;
        Ok(())
    }

    /// Called when the engine stops.
    async fn on_stop(&self, ctx: &GeckoContext) -> Result<(), BoxError> {
        let _ = ctx;
        Ok(())
    }
}

/// A cross-cutting service started before and stopped after everything else.
pub trait Plugin: Initialize + Lifecycle {}

/// One physical endpoint reached through a [`Pipeline`].
#[async_trait]
pub trait Device: Initialize + Lifecycle {
    /// Protocol of the pipeline this device belongs to.
    fn protocol(&self) -> &str;

    /// Address unique within the pipeline.
    fn address(&self) -> &str;

    /// Send `frame` to the device and return its reply.
    async fn process(&self, frame: Frame, ctx: &GeckoContext) -> Result<Frame, BoxError>;
}

/// A protocol adapter looked up by drivers through a [`PipelineSelector`].
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a `Pipeline`",
    label = "missing `Pipeline` implementation",
    note = "Pipelines must name their protocol and route frames to devices."
)]
#[async_trait]
pub trait Pipeline: Initialize + Lifecycle {
    /// Protocol name; unique across an engine.
    fn protocol(&self) -> &str;

    /// Attach a device declared for this protocol.
    fn add_device(&self, device: Arc<dyn Device>) -> Result<(), BoxError>;

    /// Devices attached so far.
    fn devices(&self) -> Vec<Arc<dyn Device>>;

    /// Route `frame` to the device at `address`.
    async fn execute(&self, address: &str, frame: Frame, ctx: &GeckoContext) -> Result<Frame, BoxError>;
}

/// Ordered gatekeeper run before drivers.
///
/// Interceptors matching a session's topic run sequentially in ascending
/// priority order. Returning [`InterceptError::Dropped`] ends the chain and
/// sends the session straight to the output stage.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not an `Interceptor`",
    label = "missing `Interceptor` implementation",
    note = "Interceptors must expose a priority, topic expressions and `handle`."
)]
#[async_trait]
pub trait Interceptor: Initialize {
    /// Current priority; lower runs first.
    fn priority(&self) -> i32;

    /// Change the priority. Takes effect from the next dispatch.
    fn set_priority(&self, priority: i32);

    /// Topics this interceptor applies to.
    fn topic_exprs(&self) -> &[TopicExpr];

    /// Inspect (and possibly annotate) the session.
    async fn handle(&self, session: &Session, ctx: &GeckoContext) -> Result<(), InterceptError>;
}

/// Business logic run for every matching session.
///
/// Drivers never short-circuit each other: all matching drivers run.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a `Driver`",
    label = "missing `Driver` implementation",
    note = "Drivers must expose topic expressions and `handle`."
)]
#[async_trait]
pub trait Driver: Initialize + Lifecycle {
    /// Topics this driver applies to.
    fn topic_exprs(&self) -> &[TopicExpr];

    /// Process the session, reaching devices through `selector`.
    async fn handle(
        &self,
        session: &Session,
        selector: &PipelineSelector,
        ctx: &GeckoContext,
    ) -> Result<(), BoxError>;
}

/// An event source.
///
/// The trigger receives the [`Invoker`] on start and may submit events at
/// any point until it is stopped.
#[async_trait]
pub trait Trigger: Initialize {
    /// Begin producing events.
    async fn on_start(&self, ctx: &GeckoContext, invoker: Invoker) -> Result<(), BoxError>;

    /// Stop producing events.
    async fn on_stop(&self, ctx: &GeckoContext, invoker: Invoker) -> Result<(), BoxError> {
        let _ = (ctx, invoker);
        Ok(())
    }
}

/// Protocol-keyed, read-only lookup of pipelines.
#[derive(Clone, Default)]
pub struct PipelineSelector {
    pipelines: Arc<HashMap<String, Arc<dyn Pipeline>>>,
}

impl PipelineSelector {
    /// Wrap a protocol map.
    pub fn new(pipelines: HashMap<String, Arc<dyn Pipeline>>) -> Self {
        Self {
            pipelines: Arc::new(pipelines),
        }
    }

    /// Pipeline registered for `protocol`.
    pub fn select(&self, protocol: &str) -> Option<Arc<dyn Pipeline>> {
        self.pipelines.get(protocol).cloned()
    }

    /// Registered protocol names.
    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// Number of registered pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns `true` if no pipeline is registered.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl fmt::Debug for PipelineSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.pipelines.keys()).finish()
    }
}

/// Atomic priority cell for [`Interceptor`] implementations.
#[derive(Debug, Default)]
pub struct Priority(AtomicI32);

impl Priority {
    /// Create a cell holding `priority`.
    pub fn new(priority: i32) -> Self {
        Self(AtomicI32::new(priority))
    }

    /// Current value.
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    /// Replace the value.
    pub fn set(&self, priority: i32) {
        self.0.store(priority, Ordering::Release);
    }
}
