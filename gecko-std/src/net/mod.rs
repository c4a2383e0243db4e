//! Socket transport for device adapters.
//!
//! - [`SocketClient`]: TCP/UDP dial, read/write with per-operation deadlines,
//!   explicit close.
//! - [`SocketDevice`]: a [`Device`](gecko_core::Device) backed by a
//!   `SocketClient`.

mod client;
mod device;

pub use client::{Network, SocketClient, SocketConfig, SocketError};
pub use device::SocketDevice;
