//! # gecko-std
//!
//! Standard implementations for the Gecko event dispatch engine.
//!
//! This crate provides:
//! - **Id generation**: [`Snowflake`] session ids
//! - **Pipelines**: [`DevicePipeline`], routing frames to devices by address
//! - **Transport**: [`net::SocketClient`] and [`net::SocketDevice`]
//! - **Testing**: recording components in [`testing`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core contracts
pub use gecko_core;

pub mod id;
pub mod net;
pub mod pipeline;
pub mod testing;

pub use id::{Snowflake, SnowflakeError};
pub use pipeline::{DevicePipeline, PipelineError};
