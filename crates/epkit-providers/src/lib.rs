//! epkit reference CPU execution provider
//!
//! This crate implements the plugin side of the epkit execution provider
//! interface:
//! - Library entry points creating and releasing factories
//! - A factory claiming CPU devices and creating providers
//! - A provider claiming `Add` / `Mul` nodes and compiling them
//! - Elementwise compute units running against host tensors
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use epkit_core::{DeviceType, Environment, HardwareDevice};
//! use epkit_providers::CpuEpLibrary;
//!
//! let mut env = Environment::new(vec![HardwareDevice::new(DeviceType::Cpu, 0x8086, 0, "Intel")]);
//! let claimed = env.register_library("Cpu", Arc::new(CpuEpLibrary::new()))?;
//! assert_eq!(claimed, 1);
//! assert_eq!(env.ep_devices()[0].ep_name, "CpuPluginExecutionProvider");
//!
//! env.unregister_library("Cpu")?;
//! # Ok::<(), epkit_core::EpError>(())
//! ```

#![deny(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all)]

pub mod cpu;
pub mod library;

pub use cpu::{
    CpuExecutionProvider, CpuProviderConfig, CpuProviderFactory, ElementwiseComputeUnit,
    ElementwiseOp, ElementwiseState,
};
pub use library::{create_ep_factories, release_ep_factory, CpuEpLibrary};

// Re-export the interface plugins implement
pub use epkit_core::{EpFactory, EpLibrary, ExecutionProvider, NodeComputeUnit};
