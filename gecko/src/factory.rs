//! Component factories.
//!
//! Configuration names component types by string (`type = "DevicePipeline"`).
//! Factories map those names to constructors, one table per role.

use gecko_core::{Device, Driver, Interceptor, Pipeline, Plugin, Trigger};
use gecko_std::{DevicePipeline, net::SocketDevice};
use std::{collections::HashMap, fmt};

/// Component role, as used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// [`Plugin`]
    Plugin,
    /// [`Pipeline`]
    Pipeline,
    /// [`Device`]
    Device,
    /// [`Interceptor`]
    Interceptor,
    /// [`Driver`]
    Driver,
    /// [`Trigger`]
    Trigger,
}

impl Role {
    /// Role name.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Plugin => "Plugin",
            Role::Pipeline => "Pipeline",
            Role::Device => "Device",
            Role::Interceptor => "Interceptor",
            Role::Driver => "Driver",
            Role::Trigger => "Trigger",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constructor for one component type.
pub type Factory<T> = Box<dyn Fn() -> Box<T> + Send + Sync>;

/// Name-keyed constructor table for one role.
pub struct FactoryTable<T: ?Sized> {
    role: Role,
    factories: HashMap<String, Factory<T>>,
}

impl<T: ?Sized> FactoryTable<T> {
    fn new(role: Role) -> Self {
        Self {
            role,
            factories: HashMap::new(),
        }
    }

    /// The role this table builds.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Register a boxed constructor, replacing any previous one.
    pub fn insert(&mut self, type_name: impl Into<String>, factory: Factory<T>) {
        let type_name = type_name.into();
        if self.factories.insert(type_name.clone(), factory).is_some() {
            tracing::warn!(role = %self.role, type_name, "factory replaced");
        }
    }

    /// Build a fresh instance of `type_name`.
    pub fn create(&self, type_name: &str) -> Option<Box<T>> {
        self.factories.get(type_name).map(|factory| factory())
    }

    /// Returns `true` if `type_name` is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl<T: ?Sized> fmt::Debug for FactoryTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryTable")
            .field("role", &self.role)
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Constructor tables for every role.
#[derive(Debug)]
pub struct Factories {
    /// Plugin constructors.
    pub plugins: FactoryTable<dyn Plugin>,
    /// Pipeline constructors.
    pub pipelines: FactoryTable<dyn Pipeline>,
    /// Device constructors.
    pub devices: FactoryTable<dyn Device>,
    /// Interceptor constructors.
    pub interceptors: FactoryTable<dyn Interceptor>,
    /// Driver constructors.
    pub drivers: FactoryTable<dyn Driver>,
    /// Trigger constructors.
    pub triggers: FactoryTable<dyn Trigger>,
}

impl Default for Factories {
    fn default() -> Self {
        Self {
            plugins: FactoryTable::new(Role::Plugin),
            pipelines: FactoryTable::new(Role::Pipeline),
            devices: FactoryTable::new(Role::Device),
            interceptors: FactoryTable::new(Role::Interceptor),
            drivers: FactoryTable::new(Role::Driver),
            triggers: FactoryTable::new(Role::Trigger),
        }
    }
}

impl Factories {
    /// Empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin type.
    pub fn plugin<F, P>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Plugin,
    {
        self.plugins
            .insert(type_name, Box::new(move || Box::new(factory()) as Box<dyn Plugin>));
        self
    }

    /// Register a pipeline type.
    pub fn pipeline<F, P>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Pipeline,
    {
        self.pipelines
            .insert(type_name, Box::new(move || Box::new(factory()) as Box<dyn Pipeline>));
        self
    }

    /// Register a device type.
    pub fn device<F, D>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Device,
    {
        self.devices
            .insert(type_name, Box::new(move || Box::new(factory()) as Box<dyn Device>));
        self
    }

    /// Register an interceptor type.
    pub fn interceptor<F, I>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Interceptor,
    {
        self.interceptors
            .insert(type_name, Box::new(move || Box::new(factory()) as Box<dyn Interceptor>));
        self
    }

    /// Register a driver type.
    pub fn driver<F, D>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Driver,
    {
        self.drivers
            .insert(type_name, Box::new(move || Box::new(factory()) as Box<dyn Driver>));
        self
    }

    /// Register a trigger type.
    pub fn trigger<F, T>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Trigger,
    {
        self.triggers
            .insert(type_name, Box::new(move || Box::new(factory()) as Box<dyn Trigger>));
        self
    }

    /// Register the components shipped with `gecko-std`:
    /// `DevicePipeline` and `SocketDevice`. Test doubles from
    /// `gecko_std::testing` are registered by the caller.
    pub fn with_std_components(&mut self) -> &mut Self {
        self.pipeline("DevicePipeline", DevicePipeline::default)
            .device("SocketDevice", SocketDevice::unconfigured)
    }
}
