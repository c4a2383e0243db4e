//! The engine.
//!
//! [`Engine`] owns the component registry and the dispatcher. It is built
//! with an [`EngineBuilder`] that collects component factories, lifecycle
//! hooks and the fatal handler, then driven through
//! [`init`](Engine::init), [`start`](Engine::start) and
//! [`stop`](Engine::stop).
//!
//! ```rust,ignore
//! let mut engine = Engine::builder()
//!     .with_std_components()
//!     .driver("Relay", RelayDriver::default)
//!     .trigger("Http", HttpTrigger::default)
//!     .build();
//! engine.init(GeckoConfig::from_toml_str(&text)?).await?;
//! engine.start().await?;
//! engine.await_termination().await;
//! engine.stop().await?;
//! ```

use crate::{
    dispatcher::{
        DEFAULT_EVENTS_CAPACITY, Dispatcher, Forward, Stage, StageHandlers, StageSender,
        stage_handler,
    },
    factory::{Factories, Role},
    lifecycle::{DEFAULT_LIFECYCLE_TIMEOUT, Guarded, SoftTimeout},
    registry::{Registered, Registry},
    supervisor::{FatalHandler, Fault, Supervisor, exit_process},
};
use gecko_core::{
    BoxError, ComponentConfig, ConfigError, Device, Driver, GeckoConfig, GeckoContext, GeckoError,
    InterceptError, Interceptor, Invoker, Lifecycle, LifecycleError, OnCompleted, Pipeline, Plugin,
    Session, Trigger, TriggerEvent,
};
use gecko_std::Snowflake;
use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};

/// Outbound field set when an interceptor drops a session.
pub const DROPPED_FIELD: &str = "error";
/// Value of [`DROPPED_FIELD`] for dropped sessions.
pub const DROPPED_VALUE: &str = "InterceptorDropped";

/// A hook run around `start` and `stop`.
pub type Hook = Arc<dyn Fn(&GeckoContext) + Send + Sync>;

#[derive(Default, Clone)]
struct Hooks {
    before_start: Vec<Hook>,
    after_start: Vec<Hook>,
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
}

fn run_hooks(hooks: &[Hook], ctx: &GeckoContext) {
    for hook in hooks {
        hook(ctx);
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Engine tunables read from the `GECKO` section.
struct Settings {
    capacity: usize,
    ids: Snowflake,
    fail_fast: bool,
    verbose: bool,
    lifecycle_timeout: Duration,
}

impl Settings {
    fn from_config(gecko: &ComponentConfig) -> Result<Self, ConfigError> {
        let capacity = gecko.get_i64_or("eventsCapacity", DEFAULT_EVENTS_CAPACITY as i64)?;
        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|c| *c >= 1)
            .ok_or_else(|| invalid("eventsCapacity", format!("must be at least 1, got {capacity}")))?;

        let worker = gecko.get_i64_or("workerId", 0)?;
        let ids = Snowflake::new(worker).map_err(|e| invalid("workerId", e.to_string()))?;

        let timeout_ms = gecko.get_i64_or(
            "lifecycleTimeoutMs",
            DEFAULT_LIFECYCLE_TIMEOUT.as_millis() as i64,
        )?;
        let timeout_ms = u64::try_from(timeout_ms)
            .map_err(|_| invalid("lifecycleTimeoutMs", format!("must not be negative, got {timeout_ms}")))?;

        Ok(Self {
            capacity,
            ids,
            fail_fast: gecko.get_bool_or("failFastEnabled", false)?,
            verbose: gecko.get_bool_or("logVerbose", false)?,
            lifecycle_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

fn invalid(key: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects factories, hooks and the fatal handler for an [`Engine`].
#[must_use]
pub struct EngineBuilder {
    factories: Factories,
    hooks: Hooks,
    fatal: Option<FatalHandler>,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            factories: Factories::new(),
            hooks: Hooks::default(),
            fatal: None,
        }
    }

    /// Register the components shipped with `gecko-std`.
    pub fn with_std_components(mut self) -> Self {
        self.factories.with_std_components();
        self
    }

    /// Direct access to the factory tables.
    pub fn factories(mut self, configure: impl FnOnce(&mut Factories)) -> Self {
        configure(&mut self.factories);
        self
    }

    /// Register a plugin type.
    pub fn plugin<F, P>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Plugin,
    {
        self.factories.plugin(type_name, factory);
        self
    }

    /// Register a pipeline type.
    pub fn pipeline<F, P>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Pipeline,
    {
        self.factories.pipeline(type_name, factory);
        self
    }

    /// Register a device type.
    pub fn device<F, D>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Device,
    {
        self.factories.device(type_name, factory);
        self
    }

    /// Register an interceptor type.
    pub fn interceptor<F, I>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Interceptor,
    {
        self.factories.interceptor(type_name, factory);
        self
    }

    /// Register a driver type.
    pub fn driver<F, D>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Driver,
    {
        self.factories.driver(type_name, factory);
        self
    }

    /// Register a trigger type.
    pub fn trigger<F, T>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Trigger,
    {
        self.factories.trigger(type_name, factory);
        self
    }

    /// Run `hook` right before the first component is started.
    pub fn before_start(mut self, hook: impl Fn(&GeckoContext) + Send + Sync + 'static) -> Self {
        self.hooks.before_start.push(Arc::new(hook));
        self
    }

    /// Run `hook` right after the last component has started.
    pub fn after_start(mut self, hook: impl Fn(&GeckoContext) + Send + Sync + 'static) -> Self {
        self.hooks.after_start.push(Arc::new(hook));
        self
    }

    /// Run `hook` right before the first component is stopped.
    pub fn before_stop(mut self, hook: impl Fn(&GeckoContext) + Send + Sync + 'static) -> Self {
        self.hooks.before_stop.push(Arc::new(hook));
        self
    }

    /// Run `hook` right after the last component has stopped.
    pub fn after_stop(mut self, hook: impl Fn(&GeckoContext) + Send + Sync + 'static) -> Self {
        self.hooks.after_stop.push(Arc::new(hook));
        self
    }

    /// Replace the fail-fast escalation target.
    ///
    /// The default logs the fault and exits the process.
    pub fn on_fatal(mut self, handler: impl Fn(&Fault) + Send + Sync + 'static) -> Self {
        self.fatal = Some(Arc::new(handler));
        self
    }

    /// Build the engine.
    pub fn build(self) -> Engine {
        let (shutdown, _) = watch::channel(false);
        Engine {
            factories: self.factories,
            hooks: self.hooks,
            fatal: self.fatal.unwrap_or_else(exit_process),
            shutdown,
            running: None,
        }
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("factories", &self.factories)
            .field("custom_fatal", &self.fatal.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The event dispatch engine.
pub struct Engine {
    factories: Factories,
    hooks: Hooks,
    fatal: FatalHandler,
    shutdown: watch::Sender<bool>,
    running: Option<Running>,
}

/// State created by `init`.
struct Running {
    ctx: Arc<GeckoContext>,
    registry: Arc<Registry>,
    supervisor: Arc<Supervisor>,
    guard: SoftTimeout,
    invoker: Invoker,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Engine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Read the configuration, build and register every component and
    /// start the dispatch loop.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn init(&mut self, config: GeckoConfig) -> Result<(), GeckoError> {
        if self.running.is_some() {
            return Err(LifecycleError::AlreadyInitialized.into());
        }

        let settings = Settings::from_config(&config.gecko)?;
        tracing::info!(
            capacity = settings.capacity,
            worker_id = settings.ids.worker_id(),
            fail_fast = settings.fail_fast,
            verbose = settings.verbose,
            "engine initializing"
        );

        let ctx = Arc::new(GeckoContext::new(
            config.gecko.clone(),
            config.globals.clone(),
            settings.fail_fast,
            settings.verbose,
        ));
        let supervisor = Arc::new(Supervisor::new(settings.fail_fast, Arc::clone(&self.fatal)));
        let guard = SoftTimeout::new(settings.lifecycle_timeout);

        let registry = Arc::new(Registry::load(&config, &self.factories, &ctx, guard).await?);
        registry.log_summary();

        let dispatcher = Dispatcher::new(settings.capacity);
        let invoker = intake(
            dispatcher.sender(Stage::Interceptor),
            Arc::new(settings.ids),
            Arc::clone(&ctx),
        );
        let stages = Arc::new(Stages {
            registry: Arc::clone(&registry),
            ctx: Arc::clone(&ctx),
            supervisor: Arc::clone(&supervisor),
        });
        let server = tokio::spawn(dispatcher.serve(
            stages.handlers(),
            Arc::clone(&supervisor),
            self.shutdown.subscribe(),
        ));

        self.running = Some(Running {
            ctx,
            registry,
            supervisor,
            guard,
            invoker,
            server: Mutex::new(Some(server)),
        });
        tracing::info!("engine initialized");
        Ok(())
    }

    /// Returns `true` once `init` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    /// The invoker handed to triggers.
    pub fn invoker(&self) -> Result<Invoker, LifecycleError> {
        Ok(self.running()?.invoker.clone())
    }

    /// The engine context.
    pub fn context(&self) -> Result<&Arc<GeckoContext>, LifecycleError> {
        Ok(&self.running()?.ctx)
    }

    /// The component registry.
    pub fn registry(&self) -> Result<&Registry, LifecycleError> {
        Ok(&self.running()?.registry)
    }

    fn running(&self) -> Result<&Running, LifecycleError> {
        self.running.as_ref().ok_or(LifecycleError::NotInitialized)
    }

    /// Start components: Plugins, Pipelines, Drivers, then Triggers.
    ///
    /// Failures and overruns are reported but never stop the sequence.
    pub async fn start(&self) -> Result<(), GeckoError> {
        let running = self.running()?;
        tracing::info!("engine starting");
        run_hooks(&self.hooks.before_start, &running.ctx);

        running.start_all(Role::Plugin, running.registry.plugins()).await;
        running.start_all(Role::Pipeline, running.registry.pipelines()).await;
        running.start_all(Role::Driver, running.registry.drivers()).await;
        for trigger in running.registry.triggers() {
            let component = Arc::clone(trigger.component());
            let ctx = Arc::clone(&running.ctx);
            let invoker = running.invoker.clone();
            running
                .guarded(format!("Trigger.Start({})", trigger.name()), async move {
                    component.on_start(&ctx, invoker).await
                })
                .await;
        }

        run_hooks(&self.hooks.after_start, &running.ctx);
        tracing::info!("engine started");
        Ok(())
    }

    /// Stop components: Triggers, Drivers, Pipelines, then Plugins; then
    /// shut the dispatch loop down.
    pub async fn stop(&self) -> Result<(), GeckoError> {
        let running = self.running()?;
        tracing::info!("engine stopping");
        run_hooks(&self.hooks.before_stop, &running.ctx);

        for trigger in running.registry.triggers() {
            let component = Arc::clone(trigger.component());
            let ctx = Arc::clone(&running.ctx);
            let invoker = running.invoker.clone();
            running
                .guarded(format!("Trigger.Stop({})", trigger.name()), async move {
                    component.on_stop(&ctx, invoker).await
                })
                .await;
        }
        running.stop_all(Role::Driver, running.registry.drivers()).await;
        running.stop_all(Role::Pipeline, running.registry.pipelines()).await;
        running.stop_all(Role::Plugin, running.registry.plugins()).await;

        run_hooks(&self.hooks.after_stop, &running.ctx);

        self.shutdown.send_replace(true);
        let server = running
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(server) = server {
            if let Err(err) = server.await {
                tracing::warn!(%err, "dispatch loop ended abnormally");
            }
        }
        tracing::info!("engine stopped");
        Ok(())
    }

    /// Wait for SIGINT or SIGTERM.
    pub async fn await_termination(&self) {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "cannot listen for SIGTERM, waiting for ctrl-c only");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::warn!("termination signal received");
    }

    /// `init`, `start`, wait for a termination signal, then `stop`.
    pub async fn run(&mut self, config: GeckoConfig) -> Result<(), GeckoError> {
        self.init(config).await?;
        self.start().await?;
        self.await_termination().await;
        self.stop().await
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("initialized", &self.running.is_some())
            .field("stopped", &*self.shutdown.borrow())
            .finish_non_exhaustive()
    }
}

impl Running {
    async fn start_all<T>(&self, role: Role, items: &[Registered<T>])
    where
        T: Lifecycle + ?Sized,
    {
        for item in items {
            let component = Arc::clone(item.component());
            let ctx = Arc::clone(&self.ctx);
            self.guarded(format!("{role}.Start({})", item.name()), async move {
                component.on_start(&ctx).await
            })
            .await;
        }
    }

    async fn stop_all<T>(&self, role: Role, items: &[Registered<T>])
    where
        T: Lifecycle + ?Sized,
    {
        for item in items {
            let component = Arc::clone(item.component());
            let ctx = Arc::clone(&self.ctx);
            self.guarded(format!("{role}.Stop({})", item.name()), async move {
                component.on_stop(&ctx).await
            })
            .await;
        }
    }

    async fn guarded<F>(&self, action: String, call: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        match self.guard.guard(&action, call).await {
            Guarded::Completed(Ok(())) => tracing::debug!(action, "lifecycle call done"),
            Guarded::Completed(Err(error)) => self.supervisor.report(Fault::Lifecycle { action, error }),
            Guarded::Panicked(message) => self.supervisor.report(Fault::Lifecycle {
                action,
                error: message.into(),
            }),
            Guarded::TimedOut => {}
        }
    }
}

// ============================================================================
// Intake
// ============================================================================

fn intake(sender: StageSender, ids: Arc<Snowflake>, ctx: Arc<GeckoContext>) -> Invoker {
    Invoker::new(move |event: TriggerEvent, on_completed: OnCompleted| {
        let sender = sender.clone();
        let ctx = Arc::clone(&ctx);
        let id = ids.next_id();
        async move {
            let (topic, data) = event.into_parts();
            ctx.if_verbose(|| tracing::debug!(session = id, %topic, "event submitted"));
            sender
                .send(Arc::new(Session::new(id, topic, data, on_completed)))
                .await
        }
    })
}

// ============================================================================
// Stage handlers
// ============================================================================

struct Stages {
    registry: Arc<Registry>,
    ctx: Arc<GeckoContext>,
    supervisor: Arc<Supervisor>,
}

impl Stages {
    fn handlers(self: &Arc<Self>) -> StageHandlers {
        let stages = Arc::clone(self);
        let interceptor = stage_handler(move |session: Arc<Session>| {
            let stages = Arc::clone(&stages);
            async move { stages.intercept(&session).await }
        });
        let stages = Arc::clone(self);
        let driver = stage_handler(move |session: Arc<Session>| {
            let stages = Arc::clone(&stages);
            async move { stages.drive(&session).await }
        });
        let stages = Arc::clone(self);
        let output = stage_handler(move |session: Arc<Session>| {
            let stages = Arc::clone(&stages);
            async move { stages.output(&session) }
        });
        StageHandlers {
            interceptor,
            driver,
            output,
        }
    }

    async fn intercept(&self, session: &Session) -> Forward {
        let topic = session.topic();
        let matched = self.registry.matching_interceptors(topic);
        self.ctx.if_verbose(|| {
            let names: Vec<&str> = matched.iter().map(|i| i.name()).collect();
            tracing::debug!(session = session.id(), topic, interceptors = ?names, "interceptor stage");
        });

        for interceptor in matched {
            match interceptor.component().handle(session, &self.ctx).await {
                Ok(()) => {}
                Err(InterceptError::Dropped) => {
                    tracing::debug!(
                        session = session.id(),
                        topic,
                        interceptor = interceptor.name(),
                        "session dropped"
                    );
                    session.outbound().add_field(DROPPED_FIELD, DROPPED_VALUE);
                    return Forward::To(Stage::Output);
                }
                Err(InterceptError::Failed(error)) => self.supervisor.report(Fault::Handling {
                    stage: Stage::Interceptor,
                    component: interceptor.name().to_string(),
                    topic: topic.to_string(),
                    error,
                }),
            }
        }
        Forward::To(Stage::Driver)
    }

    async fn drive(&self, session: &Session) -> Forward {
        let topic = session.topic();
        let selector = self.registry.selector();
        for driver in self.registry.matching_drivers(topic) {
            self.ctx.if_verbose(|| {
                tracing::debug!(session = session.id(), topic, driver = driver.name(), "driver matched");
            });
            if let Err(error) = driver.component().handle(session, selector, &self.ctx).await {
                self.supervisor.report(Fault::Handling {
                    stage: Stage::Driver,
                    component: driver.name().to_string(),
                    topic: topic.to_string(),
                    error,
                });
            }
        }
        Forward::To(Stage::Output)
    }

    fn output(&self, session: &Session) -> Forward {
        self.ctx.if_verbose(|| {
            let attributes: Vec<String> = session
                .attributes()
                .snapshot()
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            tracing::debug!(session = session.id(), topic = session.topic(), ?attributes, "output stage");
        });
        if !session.complete() {
            tracing::warn!(session = session.id(), "completion callback already invoked");
        }
        Forward::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gecko(value: serde_json::Value) -> ComponentConfig {
        ComponentConfig::new(value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_config(&ComponentConfig::default()).unwrap();
        assert_eq!(settings.capacity, DEFAULT_EVENTS_CAPACITY);
        assert_eq!(settings.ids.worker_id(), 0);
        assert!(!settings.fail_fast);
        assert!(!settings.verbose);
        assert_eq!(settings.lifecycle_timeout, DEFAULT_LIFECYCLE_TIMEOUT);
    }

    #[test]
    fn test_settings_validation() {
        for bad in [
            json!({"eventsCapacity": 0}),
            json!({"eventsCapacity": "8"}),
            json!({"workerId": 1024}),
            json!({"workerId": -1}),
            json!({"lifecycleTimeoutMs": -5}),
            json!({"failFastEnabled": "yes"}),
        ] {
            assert!(Settings::from_config(&gecko(bad.clone())).is_err(), "{bad}");
        }
        let settings = Settings::from_config(&gecko(json!({
            "eventsCapacity": 2,
            "workerId": 1023,
            "failFastEnabled": true,
            "lifecycleTimeoutMs": 50,
        })))
        .unwrap();
        assert_eq!(settings.capacity, 2);
        assert!(settings.fail_fast);
        assert_eq!(settings.lifecycle_timeout, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_lifecycle_calls_require_init() {
        let engine = Engine::builder().on_fatal(|_| {}).build();
        assert!(matches!(engine.invoker(), Err(LifecycleError::NotInitialized)));
        assert!(matches!(
            engine.start().await,
            Err(GeckoError::Lifecycle(LifecycleError::NotInitialized))
        ));
        assert!(engine.stop().await.is_err());
    }
}
