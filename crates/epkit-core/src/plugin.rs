//! The execution provider plugin interface.
//!
//! A host loads an [`EpLibrary`], asks it for [`EpFactory`] instances, lets the
//! factories claim hardware, creates an [`ExecutionProvider`] per session, runs
//! the capability pass, compiles the claimed groups into [`NodeComputeUnit`]s
//! and finally invokes those units during inference.
//!
//! Every required callback is a trait method. Optional callbacks are trait
//! methods with a default implementation that reports "not supported" or
//! "use the host default"; a plugin overrides only what it needs.
//!
//! Releases take ownership (`Box<...>`), so each create is matched by exactly
//! one release and a double release does not type-check.

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::{GraphSupportInfo, GraphView, NodeView};
use crate::logging::Logger;
use crate::tensor::KernelContext;
use crate::types::{
    CompiledModelCompatibility, DataLayout, EpDevice, HardwareDevice, KeyValuePairs,
    LayoutConversion, MemoryDevice, MemoryInfo, RunOptions, SessionConfig,
};

/// Host services available to plugins.
pub trait HostApi: Send + Sync {
    /// Version of the interface the host implements.
    fn api_version(&self) -> u32;

    /// Register a device claimed by factory `ep_name`.
    fn create_ep_device(
        &self,
        ep_name: &str,
        ep_vendor: &str,
        device: &HardwareDevice,
        ep_metadata: Option<KeyValuePairs>,
        ep_options: Option<KeyValuePairs>,
    ) -> Result<EpDevice>;
}

/// State shared by a factory and everything it creates.
///
/// Created once per library registration and handed to everything the
/// factory creates.
#[derive(Clone)]
pub struct EpContext {
    /// Host services.
    pub host: Arc<dyn HostApi>,
    /// Default logger supplied at registration.
    pub logger: Logger,
}

impl EpContext {
    /// Bundle host services and the default logger.
    pub fn new(host: Arc<dyn HostApi>, logger: Logger) -> Self {
        Self { host, logger }
    }
}

impl std::fmt::Debug for EpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpContext")
            .field("api_version", &self.host.api_version())
            .field("logger", &self.logger.name())
            .finish()
    }
}

/// Module-level entry points of a plugin library.
pub trait EpLibrary: Send + Sync {
    /// Create up to `max_factories` factories.
    ///
    /// Fails with `InvalidArgument` if `max_factories` is zero.
    fn create_ep_factories(
        &self,
        registration_name: &str,
        host: Arc<dyn HostApi>,
        default_logger: &Logger,
        max_factories: usize,
    ) -> Result<Vec<Box<dyn EpFactory>>>;

    /// Release a factory created by this library.
    fn release_ep_factory(&self, factory: Box<dyn EpFactory>) -> Result<()>;
}

/// Host allocator override supplied by a plugin.
pub trait DeviceAllocator: Send + Sync {
    /// Memory this allocator serves.
    fn memory_info(&self) -> &MemoryInfo;

    /// Allocate `size` bytes.
    fn allocate(&self, size: usize) -> Result<Vec<u8>>;
}

/// Copies tensors between host and device memory.
pub trait DataTransfer: Send + Sync {
    /// Whether this implementation can copy from `src` to `dst`.
    fn can_copy(&self, src: &MemoryDevice, dst: &MemoryDevice) -> bool;
}

/// An ordered queue of device work.
pub trait SyncStream: Send + Sync {
    /// Block until all queued work completed.
    fn synchronize(&self) -> Result<()>;
}

/// Registrar that claims devices and creates providers.
pub trait EpFactory: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Vendor name.
    fn vendor(&self) -> &str;

    /// Vendor id.
    fn vendor_id(&self) -> u32;

    /// Provider version.
    fn version(&self) -> &str;

    /// Claim the candidates this provider can serve, at most `max_ep_devices`.
    fn get_supported_devices(
        &self,
        devices: &[HardwareDevice],
        max_ep_devices: usize,
    ) -> Result<Vec<EpDevice>>;

    /// Create a provider for a session.
    ///
    /// The provider borrows the factory and the session logger and cannot
    /// outlive either.
    fn create_ep<'a>(
        &'a self,
        devices: &[&HardwareDevice],
        ep_metadata: &[Option<&KeyValuePairs>],
        session_config: &SessionConfig,
        logger: &'a Logger,
    ) -> Result<Box<dyn ExecutionProvider + 'a>>;

    /// Destroy a provider created by this factory.
    fn release_ep(&self, ep: Box<dyn ExecutionProvider + '_>);

    /// Check whether a previously compiled model can run on `devices`.
    fn validate_compiled_model_compatibility(
        &self,
        _devices: &[&HardwareDevice],
        _compatibility_info: &str,
    ) -> Result<CompiledModelCompatibility> {
        Ok(CompiledModelCompatibility::NotApplicable)
    }

    /// Custom allocator for `memory_info`; `None` means use the host's.
    fn create_allocator(
        &self,
        _memory_info: &MemoryInfo,
        _options: Option<&KeyValuePairs>,
    ) -> Result<Option<Box<dyn DeviceAllocator>>> {
        Ok(None)
    }

    /// Release an allocator from [`EpFactory::create_allocator`].
    fn release_allocator(&self, allocator: Box<dyn DeviceAllocator>) {
        drop(allocator);
    }

    /// Custom data transfer; `None` means use the host's.
    fn create_data_transfer(&self) -> Result<Option<Box<dyn DataTransfer>>> {
        Ok(None)
    }

    /// Whether this factory creates synchronization streams.
    fn is_stream_aware(&self) -> bool {
        false
    }

    /// Stream for `memory_device`; `None` means use the host's.
    fn create_sync_stream_for_device(
        &self,
        _memory_device: &MemoryDevice,
        _options: Option<&KeyValuePairs>,
    ) -> Result<Option<Box<dyn SyncStream>>> {
        Ok(None)
    }
}

/// Replacement node describing a cached compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpContextNode {
    /// Node name.
    pub name: String,
    /// Serialized artifact.
    pub payload: Vec<u8>,
}

/// Result of [`ExecutionProvider::compile`].
pub struct CompileOutput {
    /// One unit per input subgraph, in input order.
    pub compute_units: Vec<Box<dyn NodeComputeUnit>>,
    /// Optional replacement node per input subgraph, in input order.
    pub context_nodes: Vec<Option<EpContextNode>>,
}

/// A provider bound to one session.
pub trait ExecutionProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Claim the nodes of `graph` this provider can execute.
    fn get_capability(
        &self,
        graph: &dyn GraphView,
        support_info: &mut dyn GraphSupportInfo,
    ) -> Result<()>;

    /// Compile each fused subgraph into a compute unit.
    ///
    /// `graphs[i]` is the subgraph behind `fused_nodes[i]`.
    fn compile(
        &self,
        graphs: &[&dyn GraphView],
        fused_nodes: &[&dyn NodeView],
    ) -> Result<CompileOutput>;

    /// Release compute units returned by [`ExecutionProvider::compile`].
    fn release_compute_units(&self, units: Vec<Box<dyn NodeComputeUnit>>);

    /// Preferred tensor layout.
    fn preferred_data_layout(&self) -> DataLayout {
        DataLayout::Nchw
    }

    /// Whether `op_type` should be converted to `target` layout.
    fn should_convert_data_layout_for_op(
        &self,
        _domain: &str,
        _op_type: &str,
        _target: DataLayout,
    ) -> LayoutConversion {
        LayoutConversion::Defer
    }

    /// Update options at run time. Unknown options are accepted and ignored.
    fn set_dynamic_options(&self, _options: &[(&str, &str)]) -> Result<()> {
        Ok(())
    }

    /// Called before every inference run.
    fn on_run_start(&self, _run_options: &RunOptions) -> Result<()> {
        Ok(())
    }

    /// Called after every inference run.
    fn on_run_end(&self, _run_options: &RunOptions, _sync_stream: bool) -> Result<()> {
        Ok(())
    }

    /// Provider-level allocator; `None` defers to the factory or host.
    fn create_allocator(
        &self,
        _memory_info: &MemoryInfo,
    ) -> Result<Option<Box<dyn DeviceAllocator>>> {
        Ok(None)
    }

    /// Provider-level stream; `None` defers to the factory or host.
    fn create_sync_stream_for_device(
        &self,
        _memory_device: &MemoryDevice,
    ) -> Result<Option<Box<dyn SyncStream>>> {
        Ok(None)
    }

    /// Fingerprint stored with compiled models.
    fn compiled_model_compatibility_info(&self, _graph: &dyn GraphView) -> Option<String> {
        None
    }
}

/// Private per-context execution state of a compute unit.
pub type ComputeState = Box<dyn Any + Send>;

/// Host information available when creating compute state.
#[derive(Debug, Clone, Default)]
pub struct NodeComputeContext {
    /// Name of the fused node the unit was compiled for.
    pub fused_node_name: String,
}

/// Runtime callable for one compiled subgraph.
///
/// A host creates one state per execution context, calls
/// [`NodeComputeUnit::compute`] any number of times with it, then releases it.
/// States are never shared between concurrent calls.
pub trait NodeComputeUnit: Send + Sync {
    /// Allocate private state for one execution context.
    fn create_state(&self, context: &NodeComputeContext) -> Result<ComputeState>;

    /// Execute against the tensors in `kernel`.
    fn compute(&self, state: &mut ComputeState, kernel: &mut dyn KernelContext) -> Result<()>;

    /// Free state created by [`NodeComputeUnit::create_state`].
    fn release_state(&self, state: ComputeState);
}
