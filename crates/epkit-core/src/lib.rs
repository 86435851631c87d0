//! Execution provider plugin interface
//!
//! This crate defines the contract between an inference host and execution
//! provider (EP) plugins, together with a small in-process host used to drive
//! plugins end to end.
//!
//! ## Architecture
//!
//! - **Plugin**: library entry points, factories, providers and compute units
//! - **Graph**: read-only graph views, capability claims and fused nodes
//! - **Tensor**: host tensors and the per-call kernel context
//! - **Session**: environment, device registration and inference sessions
//! - **Logging**: subscriber setup and the rate-limited plugin logger
//!
//! ## Example
//!
//! ```rust
//! use epkit_core::{GraphBuilder, Tensor};
//!
//! let graph = GraphBuilder::new("sum")
//!     .inputs(&["a", "b"])
//!     .outputs(&["y"])
//!     .op("Add", "add", &["a", "b"], &["y"])
//!     .build()?;
//! assert_eq!(graph.nodes.len(), 1);
//!
//! let tensor = Tensor::from_f32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3])?;
//! assert_eq!(tensor.numel(), 6);
//! # Ok::<(), epkit_core::EpError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

/// Error types and host status codes
pub mod error;
pub mod graph;
pub mod logging;
pub mod plugin;
pub mod session;
pub mod tensor;
pub mod types;

pub use error::{EpError, ErrorCode, Result, Status};
pub use graph::{
    FusedNode, GraphBuilder, GraphNode, GraphSupportInfo, GraphView, ModelGraph, NodeGroups,
    NodeView,
};
pub use logging::{init_default_logging, init_logging, Logger, LoggingConfig, RateLimiter, Severity};
pub use plugin::{
    CompileOutput, ComputeState, DataTransfer, DeviceAllocator, EpContext, EpContextNode,
    EpFactory, EpLibrary, ExecutionProvider, HostApi, NodeComputeContext, NodeComputeUnit,
    SyncStream,
};
pub use session::{Environment, HostServices, InferenceSession, SessionId, HOST_API_VERSION};
pub use tensor::{element_count, HostKernelContext, KernelContext, KernelIo, Tensor, TensorData};
pub use types::{
    CompiledModelCompatibility, DataLayout, DataType, DeviceType, EpDevice, EpDeviceId,
    HardwareDevice, KeyValuePairs, LayoutConversion, MemoryDevice, MemoryInfo, MemoryType, NodeId,
    RunOptions, SessionConfig,
};
