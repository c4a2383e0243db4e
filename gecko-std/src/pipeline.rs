//! Generic address-routed pipeline.

use gecko_core::{
    BoxError, ComponentConfig, Device, Frame, GeckoContext, Initialize, Lifecycle, Pipeline,
    async_trait,
};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors raised by [`DevicePipeline`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// No device is attached at the address.
    #[error("no device at address '{0}'")]
    UnknownAddress(String),

    /// A device is already attached at the address.
    #[error("address '{0}' is already taken")]
    DuplicateAddress(String),

    /// The device speaks another protocol.
    #[error("device protocol '{device}' does not match pipeline protocol '{pipeline}'")]
    ProtocolMismatch {
        /// Pipeline protocol.
        pipeline: String,
        /// Device protocol.
        device: String,
    },
}

/// A pipeline that forwards frames to its devices by address.
///
/// Starting the pipeline starts its devices in attachment order; stopping
/// it stops them in reverse. A device failing to start or stop is logged
/// and does not affect the others.
///
/// Configuration:
///
/// | key | meaning |
/// |-----|---------|
/// | `protocol` | protocol name (required unless set with [`DevicePipeline::new`]) |
#[derive(Default)]
pub struct DevicePipeline {
    protocol: String,
    devices: RwLock<Vec<Arc<dyn Device>>>,
}

impl DevicePipeline {
    /// Create a pipeline for `protocol`.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            devices: RwLock::default(),
        }
    }

    fn find(&self, address: &str) -> Option<Arc<dyn Device>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| d.address() == address)
            .cloned()
    }
}

#[async_trait]
impl Initialize for DevicePipeline {
    async fn on_init(&mut self, config: &ComponentConfig, _ctx: &GeckoContext) -> Result<(), BoxError> {
        if let Some(protocol) = config.get_str("protocol") {
            self.protocol = protocol.to_string();
        }
        if self.protocol.is_empty() {
            config.must_str("protocol")?;
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for DevicePipeline {
    async fn on_start(&self, ctx: &GeckoContext) -> Result<(), BoxError> {
        for device in self.devices() {
            if let Err(err) = device.on_start(ctx).await {
                tracing::error!(protocol = %self.protocol, address = %device.address(), %err, "device failed to start");
            }
        }
        Ok(())
    }

    async fn on_stop(&self, ctx: &GeckoContext) -> Result<(), BoxError> {
        for device in self.devices().into_iter().rev() {
            if let Err(err) = device.on_stop(ctx).await {
                tracing::error!(protocol = %self.protocol, address = %device.address(), %err, "device failed to stop");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Pipeline for DevicePipeline {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn add_device(&self, device: Arc<dyn Device>) -> Result<(), BoxError> {
        if device.protocol() != self.protocol {
            return Err(PipelineError::ProtocolMismatch {
                pipeline: self.protocol.clone(),
                device: device.protocol().to_string(),
            }
            .into());
        }
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if devices.iter().any(|d| d.address() == device.address()) {
            return Err(PipelineError::DuplicateAddress(device.address().to_string()).into());
        }
        devices.push(device);
        Ok(())
    }

    fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn execute(&self, address: &str, frame: Frame, ctx: &GeckoContext) -> Result<Frame, BoxError> {
        let device = self
            .find(address)
            .ok_or_else(|| PipelineError::UnknownAddress(address.to_string()))?;
        device.process(frame, ctx).await
    }
}
