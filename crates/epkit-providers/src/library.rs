//! Library entry points.
//!
//! A host registers [`CpuEpLibrary`] under a name of its choosing and receives
//! one [`CpuProviderFactory`] per registration. The free functions mirror the
//! two module-level entry points for hosts that do not hold a library value.

use std::sync::Arc;

use epkit_core::{EpContext, EpError, EpFactory, EpLibrary, HostApi, Logger, Result};
use tracing::{debug, info};

use crate::cpu::{CpuProviderConfig, CpuProviderFactory};

/// The CPU plugin library.
#[derive(Debug, Clone, Default)]
pub struct CpuEpLibrary {
    config: CpuProviderConfig,
}

impl CpuEpLibrary {
    /// Create the library with default provider configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the library with custom provider defaults.
    pub fn with_config(config: CpuProviderConfig) -> Self {
        Self { config }
    }

    /// Provider defaults handed to every factory.
    pub fn config(&self) -> &CpuProviderConfig {
        &self.config
    }
}

impl EpLibrary for CpuEpLibrary {
    fn create_ep_factories(
        &self,
        registration_name: &str,
        host: Arc<dyn HostApi>,
        default_logger: &Logger,
        max_factories: usize,
    ) -> Result<Vec<Box<dyn EpFactory>>> {
        if max_factories < 1 {
            return Err(EpError::InvalidArgument(
                "Need space for at least 1 factory".to_string(),
            ));
        }

        let context = EpContext::new(host, default_logger.clone());
        let factory = CpuProviderFactory::new(registration_name, context, self.config.clone());
        info!(
            "Created factory '{}' (host API v{})",
            factory.ep_name(),
            factory.context().host.api_version()
        );
        Ok(vec![Box::new(factory)])
    }

    fn release_ep_factory(&self, factory: Box<dyn EpFactory>) -> Result<()> {
        debug!("Released factory '{}'", factory.name());
        Ok(())
    }
}

/// Create the factories of a default [`CpuEpLibrary`].
pub fn create_ep_factories(
    registration_name: &str,
    host: Arc<dyn HostApi>,
    default_logger: &Logger,
    max_factories: usize,
) -> Result<Vec<Box<dyn EpFactory>>> {
    CpuEpLibrary::new().create_ep_factories(registration_name, host, default_logger, max_factories)
}

/// Release a factory from [`create_ep_factories`].
pub fn release_ep_factory(factory: Box<dyn EpFactory>) -> Result<()> {
    CpuEpLibrary::new().release_ep_factory(factory)
}
