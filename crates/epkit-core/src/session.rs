//! A minimal in-process host that drives execution provider plugins.
//!
//! [`Environment`] registers plugin libraries and keeps the devices their
//! factories claimed. [`InferenceSession`] runs the capability pass, partitions
//! the graph, compiles the claimed groups and executes them, falling back to
//! built-in f32 kernels for nodes no provider claimed.
//!
//! Sessions borrow their environment, so a library cannot be unregistered
//! while a session created from one of its devices is alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EpError, ErrorCode, Result, Status};
use crate::graph::{
    FusedNode, GraphNode, GraphSupportInfo, GraphView, ModelGraph, NodeGroups, NodeView,
};
use crate::logging::Logger;
use crate::plugin::{
    ComputeState, EpFactory, EpLibrary, ExecutionProvider, HostApi, NodeComputeContext,
    NodeComputeUnit,
};
use crate::tensor::{HostKernelContext, Tensor};
use crate::types::{
    EpDevice, EpDeviceId, HardwareDevice, KeyValuePairs, NodeId, RunOptions, SessionConfig,
};

/// Interface version implemented by [`HostServices`].
pub const HOST_API_VERSION: u32 = 1;

/// Unique session identifier.
pub type SessionId = Uuid;

/// Host services handed to plugins, with an EP device handle table.
#[derive(Debug, Default)]
pub struct HostServices {
    next_device_id: AtomicU64,
    ep_devices: DashMap<EpDeviceId, EpDevice>,
    reject_device_registration: AtomicBool,
}

impl HostServices {
    /// Create empty host services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_ep_device` call fail.
    pub fn set_reject_device_registration(&self, reject: bool) {
        self.reject_device_registration.store(reject, Ordering::SeqCst);
    }

    /// Look up a registered EP device.
    pub fn ep_device(&self, id: EpDeviceId) -> Option<EpDevice> {
        self.ep_devices.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of registered EP devices.
    pub fn ep_device_count(&self) -> usize {
        self.ep_devices.len()
    }

    fn remove_ep_device(&self, id: EpDeviceId) {
        self.ep_devices.remove(&id);
    }
}

impl HostApi for HostServices {
    fn api_version(&self) -> u32 {
        HOST_API_VERSION
    }

    fn create_ep_device(
        &self,
        ep_name: &str,
        ep_vendor: &str,
        device: &HardwareDevice,
        ep_metadata: Option<KeyValuePairs>,
        ep_options: Option<KeyValuePairs>,
    ) -> Result<EpDevice> {
        if self.reject_device_registration.load(Ordering::SeqCst) {
            return Err(
                Status::new(ErrorCode::Fail, "EP device registration rejected by host").into(),
            );
        }

        let id = EpDeviceId(self.next_device_id.fetch_add(1, Ordering::Relaxed));
        let ep_device = EpDevice {
            id,
            ep_name: ep_name.to_string(),
            ep_vendor: ep_vendor.to_string(),
            device: device.clone(),
            ep_metadata,
            ep_options,
        };
        self.ep_devices.insert(id, ep_device.clone());
        Ok(ep_device)
    }
}

struct RegisteredLibrary {
    name: String,
    library: Arc<dyn EpLibrary>,
    factories: Vec<Box<dyn EpFactory>>,
    /// Claimed devices with the index of the factory that claimed them.
    devices: Vec<(usize, EpDevice)>,
}

/// Process-level host state: hardware, logger, and registered libraries.
pub struct Environment {
    hardware: Vec<HardwareDevice>,
    host: Arc<HostServices>,
    logger: Logger,
    factory_capacity: usize,
    device_capacity: usize,
    libraries: Vec<RegisteredLibrary>,
}

impl Environment {
    /// Create an environment exposing `hardware` to plugins.
    pub fn new(hardware: Vec<HardwareDevice>) -> Self {
        Self {
            hardware,
            host: Arc::new(HostServices::new()),
            logger: Logger::new("environment"),
            factory_capacity: 4,
            device_capacity: 8,
            libraries: Vec::new(),
        }
    }

    /// Use `logger` as the default and session logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Maximum factories requested from each library.
    pub fn with_factory_capacity(mut self, capacity: usize) -> Self {
        self.factory_capacity = capacity;
        self
    }

    /// Maximum devices each factory may claim.
    pub fn with_device_capacity(mut self, capacity: usize) -> Self {
        self.device_capacity = capacity;
        self
    }

    /// Host services shared with plugins.
    pub fn host(&self) -> &Arc<HostServices> {
        &self.host
    }

    /// Hardware visible to plugins.
    pub fn hardware(&self) -> &[HardwareDevice] {
        &self.hardware
    }

    /// Register a library and let its factories claim devices.
    ///
    /// Returns the number of EP devices claimed.
    pub fn register_library(&mut self, name: &str, library: Arc<dyn EpLibrary>) -> Result<usize> {
        if self.libraries.iter().any(|lib| lib.name == name) {
            return Err(EpError::InvalidArgument(format!(
                "library '{}' is already registered",
                name
            )));
        }

        let host: Arc<dyn HostApi> = self.host.clone();
        let factories =
            library.create_ep_factories(name, host, &self.logger, self.factory_capacity)?;

        if factories.len() > self.factory_capacity {
            let count = factories.len();
            release_factories(name, library.as_ref(), factories);
            return Err(EpError::EpFailure(format!(
                "library '{}' returned {} factories, capacity is {}",
                name, count, self.factory_capacity
            )));
        }

        let devices = match self.claim_devices(&factories) {
            Ok(devices) => devices,
            Err(e) => {
                release_factories(name, library.as_ref(), factories);
                return Err(e);
            }
        };

        let claimed = devices.len();
        info!(
            "Registered library '{}' with {} factories and {} EP devices",
            name,
            factories.len(),
            claimed
        );

        self.libraries.push(RegisteredLibrary {
            name: name.to_string(),
            library,
            factories,
            devices,
        });
        Ok(claimed)
    }

    fn claim_devices(&self, factories: &[Box<dyn EpFactory>]) -> Result<Vec<(usize, EpDevice)>> {
        let mut devices = Vec::new();
        for (index, factory) in factories.iter().enumerate() {
            let claimed = factory
                .get_supported_devices(&self.hardware, self.device_capacity)
                .and_then(|claimed| {
                    if claimed.len() > self.device_capacity {
                        for device in &claimed {
                            self.host.remove_ep_device(device.id);
                        }
                        return Err(EpError::EpFailure(format!(
                            "factory '{}' claimed {} devices, capacity is {}",
                            factory.name(),
                            claimed.len(),
                            self.device_capacity
                        )));
                    }
                    Ok(claimed)
                });

            match claimed {
                Ok(claimed) => {
                    debug!(
                        "Factory '{}' claimed {} of {} devices",
                        factory.name(),
                        claimed.len(),
                        self.hardware.len()
                    );
                    devices.extend(claimed.into_iter().map(|device| (index, device)));
                }
                Err(e) => {
                    for (_, device) in &devices {
                        self.host.remove_ep_device(device.id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(devices)
    }

    /// Release a library's factories and forget its devices.
    pub fn unregister_library(&mut self, name: &str) -> Result<()> {
        let position = self
            .libraries
            .iter()
            .position(|lib| lib.name == name)
            .ok_or_else(|| {
                EpError::InvalidArgument(format!("library '{}' is not registered", name))
            })?;

        let registered = self.libraries.remove(position);
        for (_, device) in &registered.devices {
            self.host.remove_ep_device(device.id);
        }

        let mut first_error = None;
        for factory in registered.factories {
            if let Err(e) = registered.library.release_ep_factory(factory) {
                warn!("Failed to release factory of library '{}': {}", name, e);
                first_error.get_or_insert(e);
            }
        }

        info!("Unregistered library '{}'", name);
        first_error.map_or(Ok(()), Err)
    }

    /// All EP devices claimed by registered libraries.
    pub fn ep_devices(&self) -> Vec<&EpDevice> {
        self.libraries
            .iter()
            .flat_map(|lib| lib.devices.iter().map(|(_, device)| device))
            .collect()
    }

    /// Names of registered libraries.
    pub fn library_names(&self) -> Vec<&str> {
        self.libraries.iter().map(|lib| lib.name.as_str()).collect()
    }

    fn resolve_devices(&self, ids: &[EpDeviceId]) -> Result<(&dyn EpFactory, Vec<&EpDevice>)> {
        let mut owner: Option<(usize, usize)> = None;
        let mut devices = Vec::with_capacity(ids.len());

        for id in ids {
            let (lib_index, factory_index, device) = self
                .libraries
                .iter()
                .enumerate()
                .find_map(|(lib_index, lib)| {
                    lib.devices
                        .iter()
                        .find(|(_, device)| device.id == *id)
                        .map(|(factory_index, device)| (lib_index, *factory_index, device))
                })
                .ok_or_else(|| EpError::InvalidArgument(format!("unknown EP device {}", id)))?;

            match owner {
                None => owner = Some((lib_index, factory_index)),
                Some(current) if current != (lib_index, factory_index) => {
                    return Err(EpError::InvalidArgument(
                        "selected EP devices belong to different providers".to_string(),
                    ));
                }
                Some(_) => {}
            }
            devices.push(device);
        }

        let (lib_index, factory_index) =
            owner.ok_or_else(|| EpError::InvalidArgument("no EP device selected".to_string()))?;
        let factory = self.libraries[lib_index].factories[factory_index].as_ref();
        Ok((factory, devices))
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        for registered in self.libraries.drain(..) {
            release_factories(&registered.name, registered.library.as_ref(), registered.factories);
        }
    }
}

fn release_factories(name: &str, library: &dyn EpLibrary, factories: Vec<Box<dyn EpFactory>>) {
    for factory in factories {
        if let Err(e) = library.release_ep_factory(factory) {
            warn!("Failed to release factory of library '{}': {}", name, e);
        }
    }
}

/// One compiled partition of a session graph.
struct Partition {
    node_ids: Vec<NodeId>,
    fused: FusedNode,
    unit: Box<dyn NodeComputeUnit>,
    state: Option<ComputeState>,
}

/// Work items of one run.
enum Step {
    Partition(usize),
    Fallback(NodeId),
}

/// A graph bound to one execution provider.
pub struct InferenceSession<'env> {
    id: SessionId,
    graph: ModelGraph,
    factory: &'env dyn EpFactory,
    provider: Option<Box<dyn ExecutionProvider + 'env>>,
    claims: NodeGroups,
    partitions: Vec<Partition>,
}

impl<'env> InferenceSession<'env> {
    /// Create a session running `graph` on the provider behind `devices`.
    pub fn new(
        env: &'env Environment,
        graph: ModelGraph,
        devices: &[EpDeviceId],
        config: &SessionConfig,
    ) -> Result<Self> {
        graph.validate()?;
        let (factory, ep_devices) = env.resolve_devices(devices)?;

        let hardware: Vec<&HardwareDevice> = ep_devices.iter().map(|d| &d.device).collect();
        let metadata: Vec<Option<&KeyValuePairs>> =
            ep_devices.iter().map(|d| d.ep_metadata.as_ref()).collect();
        let provider = factory.create_ep(&hardware, &metadata, config, &env.logger)?;

        let mut session = Self {
            id: Uuid::new_v4(),
            graph,
            factory,
            provider: Some(provider),
            claims: NodeGroups::new(),
            partitions: Vec::new(),
        };
        session.partition_and_compile()?;

        info!(
            "Created session {} on '{}': {} of {} nodes claimed in {} partitions",
            session.id,
            session.provider_name(),
            session.claims.claimed_count(),
            session.graph.nodes.len(),
            session.partitions.len()
        );
        Ok(session)
    }

    fn provider(&self) -> Result<&(dyn ExecutionProvider + 'env)> {
        self.provider
            .as_deref()
            .ok_or_else(|| EpError::EpFailure("session provider already released".to_string()))
    }

    fn partition_and_compile(&mut self) -> Result<()> {
        let provider = self
            .provider
            .as_deref()
            .ok_or_else(|| EpError::EpFailure("session provider already released".to_string()))?;

        let mut claims = NodeGroups::new();
        provider.get_capability(&self.graph, &mut claims as &mut dyn GraphSupportInfo)?;

        let ep_name = provider.name().to_string();
        let mut subgraphs = Vec::with_capacity(claims.groups().len());
        let mut fused_nodes = Vec::with_capacity(claims.groups().len());
        for (index, group) in claims.groups().iter().enumerate() {
            let name = format!("{}_{}_{}", ep_name, self.graph.name, index);
            let subgraph = self.graph.extract_subgraph(group, &name)?;
            fused_nodes.push(FusedNode::for_subgraph(index, &ep_name, &subgraph));
            subgraphs.push(subgraph);
        }

        let graph_views: Vec<&dyn GraphView> =
            subgraphs.iter().map(|g| g as &dyn GraphView).collect();
        let node_views: Vec<&dyn NodeView> =
            fused_nodes.iter().map(|n| n as &dyn NodeView).collect();
        let output = provider.compile(&graph_views, &node_views)?;

        let expected = fused_nodes.len();
        if output.compute_units.len() != expected || output.context_nodes.len() != expected {
            let returned = output.compute_units.len();
            provider.release_compute_units(output.compute_units);
            return Err(EpError::EpFailure(format!(
                "provider '{}' returned {} compute units for {} subgraphs",
                ep_name, returned, expected
            )));
        }

        let context_nodes = output
            .context_nodes
            .iter()
            .filter(|node| node.is_some())
            .count();
        if context_nodes > 0 {
            debug!("Provider '{}' emitted {} EP context nodes", ep_name, context_nodes);
        }

        let groups = claims.groups().to_vec();
        self.partitions = groups
            .into_iter()
            .zip(fused_nodes)
            .zip(output.compute_units)
            .map(|((node_ids, fused), unit)| Partition {
                node_ids,
                fused,
                unit,
                state: None,
            })
            .collect();
        self.claims = claims;

        for partition in &mut self.partitions {
            let context = NodeComputeContext {
                fused_node_name: partition.fused.name.clone(),
            };
            partition.state = Some(partition.unit.create_state(&context)?);
        }
        Ok(())
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Name of the bound provider.
    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().map_or("", |p| p.name())
    }

    /// Ids of claimed nodes, ascending.
    pub fn claimed_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.claims.groups().iter().flatten().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Operator types of claimed nodes, in graph order.
    pub fn claimed_op_types(&self) -> Vec<&str> {
        self.claimed_nodes()
            .into_iter()
            .filter_map(|id| self.graph.get_node(id))
            .map(|node| node.op_type.as_str())
            .collect()
    }

    /// Number of compute units.
    pub fn compute_unit_count(&self) -> usize {
        self.partitions.len()
    }

    /// Forward run-time options to the provider.
    pub fn set_dynamic_options(&self, options: &[(&str, &str)]) -> Result<()> {
        self.provider()?.set_dynamic_options(options)
    }

    /// Run the graph on `inputs`, returning the graph outputs.
    pub fn run(
        &mut self,
        inputs: &HashMap<String, Tensor>,
        run_options: &RunOptions,
    ) -> Result<HashMap<String, Tensor>> {
        self.provider()?.on_run_start(run_options)?;
        let result = self.execute(inputs);
        let end = self.provider()?.on_run_end(run_options, result.is_ok());

        let values = result?;
        end?;

        let mut outputs = HashMap::with_capacity(self.graph.outputs.len());
        for name in &self.graph.outputs {
            let value = values
                .get(name)
                .cloned()
                .ok_or_else(|| {
                    EpError::InvalidGraph(format!("graph output '{}' was not produced", name))
                })?;
            outputs.insert(name.clone(), value);
        }
        Ok(outputs)
    }

    fn execute(&mut self, inputs: &HashMap<String, Tensor>) -> Result<HashMap<String, Tensor>> {
        let mut values: HashMap<String, Tensor> = HashMap::new();
        for name in &self.graph.inputs {
            let tensor = inputs
                .get(name)
                .ok_or_else(|| {
                    EpError::InvalidArgument(format!("missing graph input '{}'", name))
                })?;
            values.insert(name.clone(), tensor.clone());
        }

        let mut pending: Vec<Step> = (0..self.partitions.len()).map(Step::Partition).collect();
        pending.extend(
            self.graph
                .nodes
                .iter()
                .filter(|node| !self.claims.is_claimed(node.id))
                .map(|node| Step::Fallback(node.id)),
        );
        pending.sort_by_key(|step| self.first_node(step));

        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|step| {
                    self.step_inputs(step)
                        .iter()
                        .all(|name| values.contains_key(*name))
                })
                .ok_or_else(|| {
                    EpError::InvalidGraph("partitioning left no executable step".to_string())
                })?;

            match pending.remove(ready) {
                Step::Partition(index) => self.run_partition(index, &mut values)?,
                Step::Fallback(node_id) => self.run_fallback(node_id, &mut values)?,
            }
        }

        Ok(values)
    }

    fn first_node(&self, step: &Step) -> NodeId {
        match step {
            Step::Partition(index) => self.partitions[*index]
                .node_ids
                .iter()
                .copied()
                .min()
                .unwrap_or(0),
            Step::Fallback(node_id) => *node_id,
        }
    }

    fn step_inputs(&self, step: &Step) -> Vec<&str> {
        match step {
            Step::Partition(index) => self.partitions[*index]
                .fused
                .inputs
                .iter()
                .map(String::as_str)
                .collect(),
            Step::Fallback(node_id) => self
                .graph
                .get_node(*node_id)
                .map(|node| node.inputs.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }

    fn run_partition(&mut self, index: usize, values: &mut HashMap<String, Tensor>) -> Result<()> {
        let partition = &mut self.partitions[index];
        let inputs: Vec<Option<&Tensor>> = partition
            .fused
            .inputs
            .iter()
            .map(|name| values.get(name))
            .collect();
        let mut kernel = HostKernelContext::new(inputs, partition.fused.outputs.len());

        let state = partition
            .state
            .as_mut()
            .ok_or_else(|| EpError::EpFailure("compute state was not created".to_string()))?;
        partition.unit.compute(state, &mut kernel)?;

        let produced = kernel.into_outputs();
        for (name, tensor) in partition.fused.outputs.iter().zip(produced) {
            let tensor = tensor.ok_or_else(|| {
                EpError::EpFailure(format!(
                    "compute unit '{}' did not produce '{}'",
                    partition.fused.name, name
                ))
            })?;
            values.insert(name.clone(), tensor);
        }
        Ok(())
    }

    fn run_fallback(&self, node_id: NodeId, values: &mut HashMap<String, Tensor>) -> Result<()> {
        let node = self
            .graph
            .get_node(node_id)
            .ok_or_else(|| EpError::InvalidGraph(format!("unknown node {}", node_id)))?;
        let op: fn(f32, f32) -> f32 = match node.op_type.as_str() {
            "Add" => |a, b| a + b,
            "Sub" => |a, b| a - b,
            "Mul" => |a, b| a * b,
            "Div" => |a, b| a / b,
            other => {
                return Err(EpError::Unsupported(format!(
                    "no fallback kernel for operator '{}'",
                    other
                )))
            }
        };

        let (a, b) = (f32_operand(node, values, 0)?, f32_operand(node, values, 1)?);
        if a.len() != b.len() {
            return Err(EpError::InvalidArgument(format!(
                "fallback '{}' needs equal-sized inputs ({} vs {})",
                node.name,
                a.len(),
                b.len()
            )));
        }

        let shape = values[&node.inputs[0]].shape().to_vec();
        let result: Vec<f32> = a.iter().zip(b).map(|(&x, &y)| op(x, y)).collect();
        let output = node
            .outputs
            .first()
            .ok_or_else(|| EpError::InvalidGraph(format!("node '{}' has no output", node.name)))?;
        values.insert(output.clone(), Tensor::from_f32(result, shape)?);
        Ok(())
    }
}

fn f32_operand<'v>(
    node: &GraphNode,
    values: &'v HashMap<String, Tensor>,
    index: usize,
) -> Result<&'v [f32]> {
    node.inputs
        .get(index)
        .and_then(|name| values.get(name))
        .and_then(Tensor::as_f32)
        .ok_or_else(|| {
            EpError::Unsupported(format!(
                "fallback for '{}' needs two f32 inputs",
                node.name
            ))
        })
}

impl Drop for InferenceSession<'_> {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };

        let mut units = Vec::with_capacity(self.partitions.len());
        for mut partition in self.partitions.drain(..) {
            if let Some(state) = partition.state.take() {
                partition.unit.release_state(state);
            }
            units.push(partition.unit);
        }

        provider.release_compute_units(units);
        self.factory.release_ep(provider);
        debug!("Released session {}", self.id);
    }
}
