//! Component registry.
//!
//! The registry is built once by [`Registry::load`] and shared read-only
//! afterwards. Each role keeps its instances in registration order, which is
//! the declaration order of the configuration. Pipelines are additionally
//! indexed by protocol in a [`PipelineSelector`].

use crate::{
    factory::{Factories, FactoryTable},
    lifecycle::SoftTimeout,
};
use gecko_core::{
    ConfigError, Device, Driver, GeckoConfig, GeckoContext, Initialize, InstanceConfig,
    Interceptor, Pipeline, PipelineSelector, Plugin, SECTION_DEVICES, SECTION_DRIVERS,
    SECTION_INTERCEPTORS, SECTION_PIPELINES, SECTION_PLUGINS, SECTION_TRIGGERS, Trigger,
    any_matches,
};
use std::{collections::HashMap, fmt, sync::Arc};

/// A named, initialized component.
pub struct Registered<T: ?Sized> {
    name: String,
    component: Arc<T>,
}

impl<T: ?Sized> Registered<T> {
    /// Wrap `component` under the instance name `name`.
    pub fn new(name: impl Into<String>, component: Arc<T>) -> Self {
        Self {
            name: name.into(),
            component,
        }
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The component.
    pub fn component(&self) -> &Arc<T> {
        &self.component
    }
}

impl<T: ?Sized> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            component: Arc::clone(&self.component),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Registered<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Registered").field(&self.name).finish()
    }
}

/// All registered components, by role.
#[derive(Debug, Default)]
pub struct Registry {
    plugins: Vec<Registered<dyn Plugin>>,
    pipelines: Vec<Registered<dyn Pipeline>>,
    selector: PipelineSelector,
    interceptors: Vec<Registered<dyn Interceptor>>,
    drivers: Vec<Registered<dyn Driver>>,
    triggers: Vec<Registered<dyn Trigger>>,
}

impl Registry {
    /// Build every configured component and register it.
    ///
    /// Components are created through `factories`, initialized with their
    /// own configuration and registered in the order Plugins, Pipelines,
    /// Devices, Interceptors, Drivers, Triggers. Instances with
    /// `disabled = true` are skipped.
    pub async fn load(
        config: &GeckoConfig,
        factories: &Factories,
        ctx: &Arc<GeckoContext>,
        guard: SoftTimeout,
    ) -> Result<Self, ConfigError> {
        let loader = Loader { ctx, guard };

        let plugins = loader
            .build(&factories.plugins, SECTION_PLUGINS, config.plugins.as_deref(), false)
            .await?
            .into_iter()
            .map(|(instance, plugin)| Registered::new(&instance.name, Arc::from(plugin)))
            .collect();

        let mut protocols: HashMap<String, Arc<dyn Pipeline>> = HashMap::new();
        let mut pipelines = Vec::new();
        for (instance, pipeline) in loader
            .build(&factories.pipelines, SECTION_PIPELINES, config.pipelines.as_deref(), true)
            .await?
        {
            let pipeline: Arc<dyn Pipeline> = Arc::from(pipeline);
            let protocol = pipeline.protocol().to_string();
            if protocols.contains_key(&protocol) {
                return Err(ConfigError::DuplicateProtocol(protocol));
            }
            protocols.insert(protocol, Arc::clone(&pipeline));
            pipelines.push(Registered::new(&instance.name, pipeline));
        }

        for (instance, device) in loader
            .build(&factories.devices, SECTION_DEVICES, config.devices.as_deref(), true)
            .await?
        {
            let device: Arc<dyn Device> = Arc::from(device);
            let Some(pipeline) = protocols.get(device.protocol()) else {
                return Err(ConfigError::UnknownProtocol {
                    device: instance.name.clone(),
                    protocol: device.protocol().to_string(),
                });
            };
            pipeline
                .add_device(device)
                .map_err(|source| ConfigError::Init {
                    name: instance.name.clone(),
                    source,
                })?;
        }

        let mut interceptors = Vec::new();
        for (instance, interceptor) in loader
            .build(
                &factories.interceptors,
                SECTION_INTERCEPTORS,
                config.interceptors.as_deref(),
                false,
            )
            .await?
        {
            if let Some(priority) = configured_priority(instance)? {
                interceptor.set_priority(priority);
            }
            interceptors.push(Registered::new(&instance.name, Arc::from(interceptor)));
        }

        let drivers = loader
            .build(&factories.drivers, SECTION_DRIVERS, config.drivers.as_deref(), false)
            .await?
            .into_iter()
            .map(|(instance, driver)| Registered::new(&instance.name, Arc::from(driver)))
            .collect();

        let triggers = loader
            .build(&factories.triggers, SECTION_TRIGGERS, config.triggers.as_deref(), true)
            .await?
            .into_iter()
            .map(|(instance, trigger)| Registered::new(&instance.name, Arc::from(trigger)))
            .collect();

        Ok(Self {
            plugins,
            pipelines,
            selector: PipelineSelector::new(protocols),
            interceptors,
            drivers,
            triggers,
        })
    }

    /// Plugins in registration order.
    pub fn plugins(&self) -> &[Registered<dyn Plugin>] {
        &self.plugins
    }

    /// Pipelines in registration order.
    pub fn pipelines(&self) -> &[Registered<dyn Pipeline>] {
        &self.pipelines
    }

    /// Protocol lookup handed to drivers.
    pub fn selector(&self) -> &PipelineSelector {
        &self.selector
    }

    /// Interceptors in registration order.
    pub fn interceptors(&self) -> &[Registered<dyn Interceptor>] {
        &self.interceptors
    }

    /// Drivers in registration order.
    pub fn drivers(&self) -> &[Registered<dyn Driver>] {
        &self.drivers
    }

    /// Triggers in registration order.
    pub fn triggers(&self) -> &[Registered<dyn Trigger>] {
        &self.triggers
    }

    /// Interceptors matching `topic`, in ascending priority.
    ///
    /// Priorities are read at call time; equal priorities keep registration
    /// order.
    pub fn matching_interceptors(&self, topic: &str) -> Vec<&Registered<dyn Interceptor>> {
        let mut matched: Vec<_> = self
            .interceptors
            .iter()
            .filter(|i| any_matches(i.component.topic_exprs(), topic))
            .collect();
        matched.sort_by_key(|i| i.component.priority());
        matched
    }

    /// Drivers matching `topic`, in registration order.
    pub fn matching_drivers<'a>(
        &'a self,
        topic: &'a str,
    ) -> impl Iterator<Item = &'a Registered<dyn Driver>> + 'a {
        self.drivers
            .iter()
            .filter(move |d| any_matches(d.component.topic_exprs(), topic))
    }

    /// Log what has been registered.
    pub fn log_summary(&self) {
        tracing::info!(
            plugins = self.plugins.len(),
            pipelines = self.pipelines.len(),
            interceptors = self.interceptors.len(),
            drivers = self.drivers.len(),
            triggers = self.triggers.len(),
            "components registered"
        );
        for pipeline in &self.pipelines {
            tracing::info!(
                name = %pipeline.name,
                protocol = %pipeline.component.protocol(),
                devices = pipeline.component.devices().len(),
                "pipeline"
            );
        }
        for interceptor in &self.interceptors {
            tracing::info!(
                name = %interceptor.name,
                priority = interceptor.component.priority(),
                topics = ?topic_list(interceptor.component.topic_exprs()),
                "interceptor"
            );
        }
        for driver in &self.drivers {
            tracing::info!(
                name = %driver.name,
                topics = ?topic_list(driver.component.topic_exprs()),
                "driver"
            );
        }
    }
}

fn topic_list(exprs: &[gecko_core::TopicExpr]) -> Vec<&str> {
    exprs.iter().map(|e| e.as_str()).collect()
}

fn configured_priority(instance: &InstanceConfig) -> Result<Option<i32>, ConfigError> {
    if !instance.config.contains("priority") {
        return Ok(None);
    }
    let key = format!("{}.priority", instance.name);
    let raw = instance
        .config
        .get_i64_or("priority", 0)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.clone(),
            reason: "expected an integer".to_string(),
        })?;
    i32::try_from(raw)
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key,
            reason: format!("{raw} is out of range"),
        })
}

// ============================================================================
// Loading
// ============================================================================

struct Loader<'a> {
    ctx: &'a Arc<GeckoContext>,
    guard: SoftTimeout,
}

impl Loader<'_> {
    /// Create and initialize every enabled instance of one section.
    async fn build<'c, T>(
        &self,
        table: &FactoryTable<T>,
        section_name: &'static str,
        section: Option<&'c [InstanceConfig]>,
        required: bool,
    ) -> Result<Vec<(&'c InstanceConfig, Box<T>)>, ConfigError>
    where
        T: Initialize + ?Sized,
    {
        let enabled: Vec<&InstanceConfig> = section
            .unwrap_or_default()
            .iter()
            .filter(|instance| {
                if instance.is_disabled() {
                    tracing::info!(section = section_name, name = %instance.name, "instance disabled, skipping");
                }
                !instance.is_disabled()
            })
            .collect();

        if enabled.is_empty() {
            if required {
                return Err(ConfigError::MissingSection(section_name));
            }
            tracing::warn!(section = section_name, "no components configured");
            return Ok(Vec::new());
        }

        let mut built = Vec::with_capacity(enabled.len());
        for instance in enabled {
            let type_name = instance.type_name();
            let component = table
                .create(type_name)
                .ok_or_else(|| ConfigError::UnknownType {
                    role: table.role().as_str(),
                    type_name: type_name.to_string(),
                })?;
            let action = format!("{}.Init({})", table.role(), instance.name);
            let component = self.init(&action, instance, component).await?;
            tracing::debug!(role = %table.role(), name = %instance.name, type_name, "initialized");
            built.push((instance, component));
        }
        Ok(built)
    }

    async fn init<T>(
        &self,
        action: &str,
        instance: &InstanceConfig,
        mut component: Box<T>,
    ) -> Result<Box<T>, ConfigError>
    where
        T: Initialize + ?Sized,
    {
        let config = instance.config.clone();
        let ctx = Arc::clone(self.ctx);
        let outcome = self
            .guard
            .watch(action, async move {
                let result = component.on_init(&config, &ctx).await;
                (component, result)
            })
            .await;

        match outcome {
            Ok((component, Ok(()))) => Ok(component),
            Ok((_, Err(source))) => Err(ConfigError::Init {
                name: instance.name.clone(),
                source,
            }),
            Err(message) => Err(ConfigError::Init {
                name: instance.name.clone(),
                source: format!("panicked during init: {message}").into(),
            }),
        }
    }
}
