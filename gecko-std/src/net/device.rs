//! [`SocketDevice`]: a device backed by a [`SocketClient`].

use super::client::{SocketClient, SocketConfig};
use gecko_core::{
    BoxError, ComponentConfig, Device, Frame, GeckoContext, Initialize, Lifecycle, async_trait,
};
use tokio::sync::Mutex;

/// A device reached over a TCP or UDP socket.
///
/// The connection is opened on start and closed on stop. `process` writes
/// the frame and, unless the device is output-only, reads one reply of at
/// most `bufferSize` bytes.
///
/// Configuration: `protocol`, `address` (both required), `outputOnly`
/// (default `false`) and the [`SocketConfig`] keys.
pub struct SocketDevice {
    protocol: String,
    address: String,
    output_only: bool,
    client: Mutex<Option<SocketClient>>,
}

impl SocketDevice {
    /// Create a device for an already known socket configuration.
    pub fn new(protocol: impl Into<String>, address: impl Into<String>, config: SocketConfig) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
            output_only: false,
            client: Mutex::new(Some(SocketClient::new(config))),
        }
    }

    /// Unconfigured device; settings come from `on_init`.
    pub fn unconfigured() -> Self {
        Self {
            protocol: String::new(),
            address: String::new(),
            output_only: false,
            client: Mutex::new(None),
        }
    }

    /// Only write frames, never wait for replies.
    pub fn output_only(mut self) -> Self {
        self.output_only = true;
        self
    }
}

#[async_trait]
impl Initialize for SocketDevice {
    async fn on_init(&mut self, config: &ComponentConfig, _ctx: &GeckoContext) -> Result<(), BoxError> {
        self.protocol = config.must_str("protocol")?.to_string();
        self.address = config.must_str("address")?.to_string();
        self.output_only = config.get_bool_or("outputOnly", false)?;
        let socket = SocketConfig::from_config(config)?;
        *self.client.get_mut() = Some(SocketClient::new(socket));
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for SocketDevice {
    async fn on_start(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        if let Some(client) = self.client.lock().await.as_mut() {
            client.open().await?;
            tracing::info!(address = %self.address, remote = %client.config().addr, "socket device connected");
        }
        Ok(())
    }

    async fn on_stop(&self, _ctx: &GeckoContext) -> Result<(), BoxError> {
        if let Some(client) = self.client.lock().await.as_mut() {
            client.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Device for SocketDevice {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn process(&self, frame: Frame, _ctx: &GeckoContext) -> Result<Frame, BoxError> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(super::SocketError::NotConnected)?;
        client.send(&frame).await?;
        if self.output_only {
            return Ok(Frame::new());
        }
        let mut buf = vec![0u8; client.buffer_size()];
        let n = client.receive(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }
}
