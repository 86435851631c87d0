//! CPU execution provider module.
//!
//! Factory, provider and elementwise compute units of the reference plugin.

pub mod config;
pub mod factory;
pub mod kernels;
pub mod provider;

pub use config::{CpuProviderConfig, CONFIG_PREFIX};
pub use factory::{CpuProviderFactory, CPU_EP_VENDOR, CPU_EP_VENDOR_ID, EP_NAME_SUFFIX};
pub use kernels::{ElementwiseComputeUnit, ElementwiseOp, ElementwiseState};
pub use provider::CpuExecutionProvider;
