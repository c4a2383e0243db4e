//! # gecko-core
//!
//! Core contracts for the Gecko event dispatch engine.
//!
//! This crate has minimal dependencies and is designed to be imported by
//! component crates (pipelines, drivers, triggers) that don't need the
//! engine itself.
//!
//! # Event Flow
//!
//! A [`Trigger`] submits a [`TriggerEvent`] through its [`Invoker`]. The
//! engine wraps it in a [`Session`] and moves it through three stages:
//!
//! 1. **Interceptor** - matching [`Interceptor`]s run in priority order and
//!    may drop the session.
//! 2. **Driver** - every matching [`Driver`] runs; drivers reach devices
//!    through the [`PipelineSelector`].
//! 3. **Output** - the session's completion callback receives the outbound
//!    payload.
//!
//! Routing is done with compiled [`TopicExpr`] patterns.
//!
//! # Error Types
//!
//! - [`GeckoError`] - Top-level error type
//! - [`ConfigError`] - Configuration errors
//! - [`InterceptError`] - Drop sentinel and handling failures

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod component;
mod config;
mod context;
mod error;
mod invoker;
mod session;
mod topic;

// Re-exports
pub use component::{
    Device, Driver, Frame, Initialize, Interceptor, Lifecycle, Pipeline, PipelineSelector, Plugin,
    Priority, Trigger,
};
pub use config::{
    ComponentConfig, GeckoConfig, InstanceConfig, SECTION_DEVICES, SECTION_DRIVERS, SECTION_GECKO,
    SECTION_GLOBALS, SECTION_INTERCEPTORS, SECTION_PIPELINES, SECTION_PLUGINS, SECTION_TRIGGERS,
    TopicExprConfigError,
};
pub use context::GeckoContext;
pub use error::{
    BoxError, ConfigError, DispatchError, GeckoError, InterceptError, LifecycleError, TopicError,
};
pub use invoker::{Invoker, TriggerEvent};
pub use session::{AttrValue, Attributes, Inbound, OnCompleted, Outbound, Payload, Session};
pub use topic::{TopicExpr, any_matches};

pub use async_trait::async_trait;
