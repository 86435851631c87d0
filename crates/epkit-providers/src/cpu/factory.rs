//! CPU provider factory.

use epkit_core::{
    EpContext, EpDevice, EpFactory, ExecutionProvider, HardwareDevice, KeyValuePairs, Logger,
    Result, SessionConfig,
};
use tracing::{debug, info};

use super::config::CpuProviderConfig;
use super::provider::CpuExecutionProvider;

/// Vendor reported by the CPU provider.
pub const CPU_EP_VENDOR: &str = "epkit";

/// Vendor id reported by the CPU provider.
pub const CPU_EP_VENDOR_ID: u32 = 0x1234;

/// Suffix appended to the registration name to form the provider name.
pub const EP_NAME_SUFFIX: &str = "PluginExecutionProvider";

/// Factory created once per library registration.
#[derive(Debug)]
pub struct CpuProviderFactory {
    ep_name: String,
    context: EpContext,
    config: CpuProviderConfig,
}

impl CpuProviderFactory {
    /// Create the factory registered as `registration_name`.
    pub fn new(registration_name: &str, context: EpContext, config: CpuProviderConfig) -> Self {
        Self {
            ep_name: format!("{}{}", registration_name, EP_NAME_SUFFIX),
            context,
            config,
        }
    }

    /// Provider name.
    pub fn ep_name(&self) -> &str {
        &self.ep_name
    }

    /// Host services and default logger.
    pub fn context(&self) -> &EpContext {
        &self.context
    }

    /// Library-level defaults applied to every provider.
    pub fn config(&self) -> &CpuProviderConfig {
        &self.config
    }

    /// Create a concrete provider, keeping its type.
    pub fn create_cpu_ep<'a>(
        &'a self,
        session_config: &SessionConfig,
        logger: &'a Logger,
    ) -> Result<CpuExecutionProvider<'a>> {
        let config = self.config.clone().with_session_overrides(session_config)?;
        Ok(CpuExecutionProvider::new(self, logger, config))
    }
}

impl EpFactory for CpuProviderFactory {
    fn name(&self) -> &str {
        &self.ep_name
    }

    fn vendor(&self) -> &str {
        CPU_EP_VENDOR
    }

    fn vendor_id(&self) -> u32 {
        CPU_EP_VENDOR_ID
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn get_supported_devices(
        &self,
        devices: &[HardwareDevice],
        max_ep_devices: usize,
    ) -> Result<Vec<EpDevice>> {
        let mut claimed = Vec::new();
        for device in devices
            .iter()
            .filter(|device| self.config.supports_device(device.device_type))
            .take(max_ep_devices)
        {
            let ep_device = self.context.host.create_ep_device(
                &self.ep_name,
                CPU_EP_VENDOR,
                device,
                None,
                None,
            )?;
            claimed.push(ep_device);
        }

        info!(
            "{} claimed {} of {} devices",
            self.ep_name,
            claimed.len(),
            devices.len()
        );
        Ok(claimed)
    }

    fn create_ep<'a>(
        &'a self,
        devices: &[&HardwareDevice],
        _ep_metadata: &[Option<&KeyValuePairs>],
        session_config: &SessionConfig,
        logger: &'a Logger,
    ) -> Result<Box<dyn ExecutionProvider + 'a>> {
        let provider = self.create_cpu_ep(session_config, logger)?;
        debug!(
            "Created {} for {} devices",
            self.ep_name,
            devices.len()
        );
        Ok(Box::new(provider))
    }

    fn release_ep(&self, ep: Box<dyn ExecutionProvider + '_>) {
        debug!("Released {}", ep.name());
    }
}
