//! # gecko - Staged Event Dispatch Engine
//!
//! `gecko` moves events from triggers through a fixed, three-stage pipeline:
//!
//! ```text
//! Trigger --Invoker--> [Interceptor] --> [Driver] --> [Output] --> callback
//!                           |                            ^
//!                           +----------- drop -----------+
//! ```
//!
//! - **Interceptors** matching the event's topic run in ascending priority.
//!   Any of them may drop the session, which skips the drivers.
//! - **Drivers** matching the topic all run, reaching devices through
//!   protocol-keyed pipelines.
//! - **Output** hands the accumulated outbound payload to the completion
//!   callback, exactly once.
//!
//! Every stage has a bounded queue, so a slow engine pushes back on its
//! triggers. Each session runs in its own task per stage; a panic in one
//! session is contained to that session.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gecko::prelude::*;
//!
//! let mut engine = Engine::builder()
//!     .with_std_components()
//!     .interceptor("Auth", AuthInterceptor::default)
//!     .driver("Relay", RelayDriver::default)
//!     .trigger("Http", HttpTrigger::default)
//!     .build();
//!
//! engine.run(GeckoConfig::from_toml_str(CONFIG)?).await?;
//! ```
//!
//! ## Crates
//!
//! - `gecko-core`: component traits, session, topics, configuration
//! - `gecko-std`: id generation, device pipelines, sockets, testing helpers
//! - `gecko`: the engine (this crate)

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod engine;
pub mod factory;
pub mod lifecycle;
pub mod registry;
pub mod supervisor;

pub use gecko_core::{
    AttrValue, Attributes, BoxError, ComponentConfig, ConfigError, Device, DispatchError, Driver,
    Frame, GeckoConfig, GeckoContext, GeckoError, Inbound, Initialize, InstanceConfig,
    InterceptError, Interceptor, Invoker, Lifecycle, LifecycleError, OnCompleted, Outbound,
    Payload, Pipeline, PipelineSelector, Plugin, Priority, Session, TopicError, TopicExpr, Trigger,
    TriggerEvent, any_matches, async_trait,
};

pub use dispatcher::{Dispatcher, Forward, Stage};
pub use engine::{Engine, EngineBuilder};
pub use factory::{Factories, Role};
pub use lifecycle::{Guarded, SoftTimeout};
pub use registry::{Registered, Registry};
pub use supervisor::{FatalHandler, Fault, Supervisor};

/// Standard components.
pub mod std_components {
    pub use gecko_std::{
        DevicePipeline, PipelineError, Snowflake, SnowflakeError,
        net::{Network, SocketClient, SocketConfig, SocketDevice, SocketError},
    };
}

/// Testing utilities.
pub mod testing {
    pub use gecko_std::testing::{
        Journal, ManualTrigger, NullDevice, Outcome, RecordingDriver, RecordingInterceptor,
        RecordingPlugin, TriggerSlot,
    };
}

/// Prelude module - common imports for Gecko.
///
/// # Usage
///
/// ```rust,ignore
/// use gecko::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Errors
        BoxError,
        ConfigError,
        // Components
        Device,
        Driver,
        // Engine
        Engine,
        GeckoConfig,
        GeckoContext,
        GeckoError,
        Initialize,
        InterceptError,
        Interceptor,
        Invoker,
        Lifecycle,
        Payload,
        Pipeline,
        PipelineSelector,
        Plugin,
        Session,
        TopicExpr,
        Trigger,
        TriggerEvent,
        async_trait,
    };
}
