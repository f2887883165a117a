//! Platform → device factory lookup used to build the device pool.

use std::sync::Arc;

use anyhow::{Context, Result};
use testbay_common::{DeviceRef, Platform};

use crate::application::ports::{DeviceFactory, DeviceHandle, DeviceParam, DevicePool};
use crate::domain::error::DeviceError;

/// Ordered list of factories; the first one supporting a platform wins.
#[derive(Default, Clone)]
pub struct DeviceFactoryRegistry {
    factories: Vec<Arc<dyn DeviceFactory>>,
}

impl DeviceFactoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn DeviceFactory>) {
        tracing::debug!(factory = factory.name(), "device factory registered");
        self.factories.push(factory);
    }

    #[must_use]
    pub fn supports(&self, platform: Platform) -> bool {
        self.factory_for(platform).is_some()
    }

    fn factory_for(&self, platform: Platform) -> Option<&Arc<dyn DeviceFactory>> {
        self.factories
            .iter()
            .find(|f| f.can_support_platform(platform))
    }

    /// Platforms with at least one registered factory.
    #[must_use]
    pub fn supported_platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.supports(*p))
            .collect()
    }

    pub fn create_device(
        &self,
        reference: &DeviceRef,
        param: &DeviceParam,
    ) -> Result<DeviceHandle, DeviceError> {
        let factory = self
            .factory_for(reference.platform)
            .ok_or(DeviceError::UnsupportedPlatform(reference.platform))?;
        factory.create_device(reference, param)
    }

    /// Create and register one device per seed entry.
    pub fn populate(
        &self,
        pool: &DevicePool,
        refs: &[DeviceRef],
        param: &DeviceParam,
    ) -> Result<usize> {
        for reference in refs {
            let device = self
                .create_device(reference, param)
                .with_context(|| format!("cannot create device '{reference}'"))?;
            tracing::info!(device = device.name(), platform = %reference.platform, "device registered");
            pool.register(device)
                .with_context(|| format!("cannot register device '{reference}'"))?;
        }
        Ok(refs.len())
    }
}
