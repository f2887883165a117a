//! Platform backends behind the `TargetDevice` port.

pub mod android;
pub mod local;
pub mod null;

use std::sync::Arc;

use crate::application::ports::CommandRunner;
use crate::application::registry::DeviceFactoryRegistry;

pub use android::{AndroidDevice, AndroidDeviceFactory};
pub use local::{LocalDevice, LocalDeviceFactory};
pub use null::{NullDevice, NullDeviceFactory, NullScript};

/// Registry with every built-in backend.
#[must_use]
pub fn default_registry(runner: Arc<dyn CommandRunner>) -> DeviceFactoryRegistry {
    let mut registry = DeviceFactoryRegistry::new();
    registry.register(Arc::new(NullDeviceFactory));
    registry.register(Arc::new(LocalDeviceFactory::new(Arc::clone(&runner))));
    registry.register(Arc::new(AndroidDeviceFactory::new(runner)));
    registry
}
