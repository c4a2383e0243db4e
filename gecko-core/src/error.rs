//! Error types for Gecko.
//!
//! This module provides a structured error hierarchy using `thiserror`:
//!
//! - [`GeckoError`] - Top-level error type for engine operations
//! - [`ConfigError`] - Configuration and registration errors
//! - [`TopicError`] - Topic expression compilation errors
//! - [`DispatchError`] - Errors while submitting events
//! - [`InterceptError`] - Outcome of an interceptor that did not pass

use thiserror::Error;

/// A boxed error type for component-originated errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all engine operations.
#[derive(Error, Debug)]
pub enum GeckoError {
    /// The configuration is invalid or incomplete.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A topic expression failed to compile.
    #[error("topic error: {0}")]
    Topic(#[from] TopicError),

    /// The engine is in the wrong lifecycle state for the requested operation.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// An event could not be submitted.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Errors raised while reading configuration or registering components.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A mandatory section is absent or declares no components.
    #[error("mandatory section [{0}] is missing or empty")]
    MissingSection(&'static str),

    /// A value has the wrong shape.
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue {
        /// Key of the offending value.
        key: String,
        /// Human readable reason.
        reason: String,
    },

    /// No factory is registered for the requested component type.
    #[error("no {role} factory registered for type '{type_name}'")]
    UnknownType {
        /// Component role (Plugin, Pipeline, ...).
        role: &'static str,
        /// Requested factory name.
        type_name: String,
    },

    /// Two pipelines claim the same protocol.
    #[error("pipeline for protocol '{0}' is already registered")]
    DuplicateProtocol(String),

    /// A device refers to a protocol without a pipeline.
    #[error("device '{device}' requires unknown protocol '{protocol}'")]
    UnknownProtocol {
        /// Instance name of the device.
        device: String,
        /// Protocol the device asked for.
        protocol: String,
    },

    /// A component rejected its configuration in `on_init`.
    #[error("component '{name}' failed to initialize")]
    Init {
        /// Instance name.
        name: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// The configuration text could not be parsed.
    #[error("malformed configuration: {0}")]
    Parse(String),
}

/// Errors raised when compiling a topic expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The expression is empty.
    #[error("topic expression is empty")]
    Empty,

    /// `#` appears somewhere other than the final level.
    #[error("multi-level wildcard must be the last level in '{0}'")]
    MisplacedMultiLevel(String),

    /// A wildcard shares a level with other characters.
    #[error("wildcard must occupy a whole level in '{0}'")]
    PartialWildcard(String),
}

/// Errors raised by the engine's lifecycle entry points.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start`/`stop`/`invoker` was called before `init`.
    #[error("engine has not been initialized")]
    NotInitialized,

    /// `init` was called twice.
    #[error("engine is already initialized")]
    AlreadyInitialized,
}

/// Errors that can occur while submitting an event.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher has shut down and no longer accepts sessions.
    #[error("dispatcher has been shut down")]
    Closed,

    /// The session was discarded before its completion callback ran.
    #[error("session was abandoned before reaching the output stage")]
    Abandoned,
}

/// Result of an interceptor that did not let the session pass.
#[derive(Error, Debug)]
pub enum InterceptError {
    /// Intentionally terminate processing of this session.
    #[error("interceptor dropped the event")]
    Dropped,

    /// A handling failure. Logged, and the chain continues.
    #[error(transparent)]
    Failed(BoxError),
}

impl InterceptError {
    /// Wraps any error as a handling failure.
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        InterceptError::Failed(err.into())
    }

    /// Returns `true` for the drop sentinel.
    pub fn is_dropped(&self) -> bool {
        matches!(self, InterceptError::Dropped)
    }
}

// Convenience conversions
impl From<BoxError> for InterceptError {
    fn from(err: BoxError) -> Self {
        InterceptError::Failed(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intercept_error_sentinel() {
        assert!(InterceptError::Dropped.is_dropped());
        assert!(!InterceptError::failed("boom").is_dropped());
    }

    #[test]
    fn test_failed_is_transparent() {
        let err = InterceptError::failed("device offline");
        assert_eq!(err.to_string(), "device offline");
    }

    #[test]
    fn test_gecko_error_wraps_config() {
        let err: GeckoError = ConfigError::MissingSection("TRIGGERS").into();
        assert!(err.to_string().contains("TRIGGERS"));
    }
}
