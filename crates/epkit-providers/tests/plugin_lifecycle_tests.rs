//! End-to-end tests driving the CPU plugin through the in-process host.
//!
//! This module covers:
//! - Library registration, device claiming and unregistration
//! - Sessions mixing claimed nodes with host fallback execution
//! - Properties of claiming, compilation and compute

use anyhow::Result;
use epkit_core::{
    DeviceType, EpContext, Environment, ErrorCode, ExecutionProvider, FusedNode, GraphBuilder,
    GraphView, HardwareDevice, HostKernelContext, HostServices, InferenceSession, Logger,
    ModelGraph, NodeComputeContext, NodeGroups, NodeView, RunOptions, SessionConfig, Tensor,
};
use epkit_providers::{CpuEpLibrary, CpuProviderConfig, CpuProviderFactory, ElementwiseOp};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn mixed_devices() -> Vec<HardwareDevice> {
    vec![
        HardwareDevice::new(DeviceType::Gpu, 0x10de, 0, "NVIDIA"),
        HardwareDevice::new(DeviceType::Cpu, 0x8086, 1, "Intel"),
        HardwareDevice::new(DeviceType::Npu, 0x1e52, 2, "Vendor"),
        HardwareDevice::new(DeviceType::Cpu, 0x8086, 3, "Intel"),
    ]
}

fn add_sub_graph() -> Result<ModelGraph> {
    Ok(GraphBuilder::new("add_sub")
        .inputs(&["a", "b", "c"])
        .outputs(&["y"])
        .op("Add", "add", &["a", "b"], &["sum"])
        .op("Sub", "sub", &["sum", "c"], &["y"])
        .build()?)
}

fn tensor(values: &[f32]) -> Result<Tensor> {
    Ok(Tensor::from_f32(values.to_vec(), vec![values.len()])?)
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_end_to_end_add_sub() -> Result<()> {
    let mut env = Environment::new(mixed_devices()).with_device_capacity(1);
    let claimed = env.register_library("Cpu", Arc::new(CpuEpLibrary::new()))?;
    assert_eq!(claimed, 1);

    let device = env.ep_devices()[0].clone();
    assert_eq!(device.ep_name, "CpuPluginExecutionProvider");
    assert_eq!(device.ep_vendor, "epkit");
    assert_eq!(device.device.device_type, DeviceType::Cpu);

    {
        let mut session =
            InferenceSession::new(&env, add_sub_graph()?, &[device.id], &SessionConfig::new())?;
        assert_eq!(session.provider_name(), "CpuPluginExecutionProvider");
        assert_eq!(session.claimed_op_types(), vec!["Add"]);
        assert_eq!(session.compute_unit_count(), 1);

        let mut inputs = HashMap::new();
        inputs.insert("a".to_string(), tensor(&[1.0, 2.0, 3.0, 4.0])?);
        inputs.insert("b".to_string(), tensor(&[10.0, 20.0, 30.0, 40.0])?);
        inputs.insert("c".to_string(), tensor(&[1.0, 1.0, 1.0, 1.0])?);

        for _ in 0..3 {
            let outputs = session.run(&inputs, &RunOptions::default())?;
            assert_eq!(outputs["y"].as_f32(), Some(&[10.0, 21.0, 32.0, 43.0][..]));
        }
    }

    env.unregister_library("Cpu")?;
    assert!(env.ep_devices().is_empty());
    Ok(())
}

#[test]
fn test_repeated_operand_matches_fallback() -> Result<()> {
    let mut env = Environment::new(mixed_devices());
    env.register_library("Cpu", Arc::new(CpuEpLibrary::new()))?;
    let device = env.ep_devices()[0].id;

    let square = || {
        GraphBuilder::new("square")
            .inputs(&["x"])
            .outputs(&["y"])
            .op("Add", "add", &["x", "x"], &["y"])
            .build()
    };
    let mut inputs = HashMap::new();
    inputs.insert("x".to_string(), tensor(&[1.0, 2.5, -3.0])?);

    let mut claimed = InferenceSession::new(&env, square()?, &[device], &SessionConfig::new())?;
    assert_eq!(claimed.claimed_op_types(), vec!["Add"]);
    let from_unit = claimed.run(&inputs, &RunOptions::default())?;

    let mul_only = SessionConfig::new().with_entry("ep.cpu.supported_ops", "Mul");
    let mut fallback = InferenceSession::new(&env, square()?, &[device], &mul_only)?;
    assert!(fallback.claimed_nodes().is_empty());
    let from_host = fallback.run(&inputs, &RunOptions::default())?;

    assert_eq!(from_unit["y"].as_f32(), Some(&[2.0, 5.0, -6.0][..]));
    assert_eq!(from_unit["y"], from_host["y"]);
    Ok(())
}

#[test]
fn test_claimed_node_with_unused_output() -> Result<()> {
    let mut env = Environment::new(mixed_devices());
    env.register_library("Cpu", Arc::new(CpuEpLibrary::new()))?;
    let device = env.ep_devices()[0].id;

    let graph = GraphBuilder::new("dangling")
        .inputs(&["a", "b"])
        .outputs(&["y"])
        .op("Mul", "mul", &["a", "b"], &["t"])
        .op("Sub", "sub", &["a", "b"], &["y"])
        .build()?;
    let mut session = InferenceSession::new(&env, graph, &[device], &SessionConfig::new())?;
    assert_eq!(session.claimed_op_types(), vec!["Mul"]);

    let mut inputs = HashMap::new();
    inputs.insert("a".to_string(), tensor(&[5.0, 7.0])?);
    inputs.insert("b".to_string(), tensor(&[2.0, 3.0])?);
    let outputs = session.run(&inputs, &RunOptions::default())?;

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs["y"].as_f32(), Some(&[3.0, 4.0][..]));
    Ok(())
}

#[test]
fn test_units_compute_on_separate_threads() -> Result<()> {
    let factory = cpu_factory();
    let logger = Logger::new("session");
    let provider = factory.create_cpu_ep(&SessionConfig::new(), &logger)?;

    let graph = parallel_graph(&["Add", "Mul"]);
    let subgraphs = vec![
        graph.extract_subgraph(&[0], "fused_0")?,
        graph.extract_subgraph(&[1], "fused_1")?,
    ];
    let fused: Vec<FusedNode> = subgraphs
        .iter()
        .enumerate()
        .map(|(i, sub)| FusedNode::for_subgraph(i, provider.name(), sub))
        .collect();
    let graphs: Vec<&dyn GraphView> = subgraphs.iter().map(|g| g as &dyn GraphView).collect();
    let nodes: Vec<&dyn NodeView> = fused.iter().map(|n| n as &dyn NodeView).collect();
    let output = provider.compile(&graphs, &nodes)?;

    let x = tensor(&[3.0, 4.0])?;
    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = output
            .compute_units
            .iter()
            .map(|unit| {
                let x = &x;
                scope.spawn(move || -> epkit_core::Result<Tensor> {
                    let mut state = unit.create_state(&NodeComputeContext::default())?;
                    let mut last = None;
                    for _ in 0..50 {
                        let mut ctx = HostKernelContext::new(vec![Some(x), Some(x)], 1);
                        unit.compute(&mut state, &mut ctx)?;
                        last = ctx.into_outputs().pop().flatten();
                    }
                    unit.release_state(state);
                    last.ok_or_else(|| epkit_core::EpError::EpFailure("no output".to_string()))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("compute thread panicked"))
            .collect::<epkit_core::Result<Vec<Tensor>>>()
    })?;

    assert_eq!(results[0].as_f32(), Some(&[6.0, 8.0][..]));
    assert_eq!(results[1].as_f32(), Some(&[9.0, 16.0][..]));
    provider.release_compute_units(output.compute_units);
    Ok(())
}

#[test]
fn test_zero_factory_capacity() {
    let mut env = Environment::new(mixed_devices()).with_factory_capacity(0);

    let err = env
        .register_library("Cpu", Arc::new(CpuEpLibrary::new()))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(env.library_names().is_empty());
}

#[test]
fn test_host_rejects_device_registration() {
    let mut env = Environment::new(mixed_devices());
    env.host().set_reject_device_registration(true);

    let err = env
        .register_library("Cpu", Arc::new(CpuEpLibrary::new()))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Fail);
}

#[test]
fn test_no_matching_devices() -> Result<()> {
    let mut env = Environment::new(vec![HardwareDevice::new(DeviceType::Gpu, 1, 0, "gpu")]);

    let claimed = env.register_library("Cpu", Arc::new(CpuEpLibrary::new()))?;
    assert_eq!(claimed, 0);
    env.unregister_library("Cpu")?;
    Ok(())
}

#[test]
fn test_session_config_reaches_provider() -> Result<()> {
    let mut env = Environment::new(mixed_devices());
    env.register_library("Cpu", Arc::new(CpuEpLibrary::new()))?;
    let device = env.ep_devices()[0].id;

    let graph = GraphBuilder::new("add_mul")
        .inputs(&["a", "b"])
        .outputs(&["z"])
        .op("Add", "add", &["a", "b"], &["x"])
        .op("Mul", "mul", &["x", "b"], &["z"])
        .build()?;
    let config = SessionConfig::new().with_entry("ep.cpu.supported_ops", "Mul");

    let mut session = InferenceSession::new(&env, graph, &[device], &config)?;
    assert_eq!(session.claimed_op_types(), vec!["Mul"]);
    session.set_dynamic_options(&[("ep.dynamic.workload_type", "Default")])?;

    let mut inputs = HashMap::new();
    inputs.insert("a".to_string(), tensor(&[1.0, 2.0])?);
    inputs.insert("b".to_string(), tensor(&[3.0, 4.0])?);
    let outputs = session.run(&inputs, &RunOptions::default())?;
    assert_eq!(outputs["z"].as_f32(), Some(&[12.0, 24.0][..]));
    Ok(())
}

#[test]
fn test_compute_errors_reach_caller() -> Result<()> {
    let mut env = Environment::new(mixed_devices());
    env.register_library("Cpu", Arc::new(CpuEpLibrary::new()))?;
    let device = env.ep_devices()[0].id;

    let mut session =
        InferenceSession::new(&env, add_sub_graph()?, &[device], &SessionConfig::new())?;

    let mut inputs = HashMap::new();
    inputs.insert("a".to_string(), tensor(&[1.0, 2.0, 3.0, 4.0])?);
    inputs.insert("b".to_string(), tensor(&[1.0, 2.0])?);
    inputs.insert("c".to_string(), tensor(&[1.0, 2.0, 3.0, 4.0])?);

    let err = session.run(&inputs, &RunOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    Ok(())
}

#[test]
fn test_custom_library_config() -> Result<()> {
    let config =
        CpuProviderConfig::default().with_device_types(&[DeviceType::Cpu, DeviceType::Npu]);
    let mut env = Environment::new(mixed_devices());

    let claimed = env.register_library("Edge", Arc::new(CpuEpLibrary::with_config(config)))?;
    assert_eq!(claimed, 3);
    assert!(env
        .ep_devices()
        .iter()
        .all(|d| d.ep_name == "EdgePluginExecutionProvider"));
    Ok(())
}

// ============================================================================
// Properties
// ============================================================================

fn device_type_strategy() -> impl Strategy<Value = DeviceType> {
    prop_oneof![
        Just(DeviceType::Cpu),
        Just(DeviceType::Gpu),
        Just(DeviceType::Npu),
        Just(DeviceType::Other),
    ]
}

fn op_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("Add"), Just("Mul"), Just("Sub"), Just("Div"), Just("Relu")]
}

fn cpu_factory() -> CpuProviderFactory {
    let context = EpContext::new(Arc::new(HostServices::new()), Logger::new("default"));
    CpuProviderFactory::new("Cpu", context, CpuProviderConfig::default())
}

// Each node reads the graph input and writes its own value.
fn parallel_graph(ops: &[&str]) -> ModelGraph {
    let mut builder = GraphBuilder::new("parallel").inputs(&["x"]);
    let outputs: Vec<String> = (0..ops.len()).map(|i| format!("y{}", i)).collect();
    for (i, op) in ops.iter().enumerate() {
        builder = builder.op(op, &format!("n{}", i), &["x", "x"], &[outputs[i].as_str()]);
    }
    let names: Vec<&str> = outputs.iter().map(String::as_str).collect();
    builder.outputs(&names).build().unwrap()
}

proptest! {
    #[test]
    fn test_claims_bounded_by_capacity_and_kind(
        kinds in prop::collection::vec(device_type_strategy(), 0..10),
        capacity in 0usize..6
    ) {
        use epkit_core::EpFactory;

        let factory = cpu_factory();
        let devices: Vec<HardwareDevice> = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| HardwareDevice::new(*kind, 1, i as u32, "vendor"))
            .collect();

        let claimed = factory.get_supported_devices(&devices, capacity).unwrap();
        let cpus = kinds.iter().filter(|k| **k == DeviceType::Cpu).count();

        prop_assert_eq!(claimed.len(), cpus.min(capacity));
        prop_assert!(claimed.iter().all(|d| d.device.device_type == DeviceType::Cpu));
    }

    #[test]
    fn test_claiming_depends_only_on_op_type(ops in prop::collection::vec(op_strategy(), 0..16)) {
        let factory = cpu_factory();
        let logger = Logger::new("session");
        let provider = factory.create_cpu_ep(&SessionConfig::new(), &logger).unwrap();

        let graph = parallel_graph(&ops);
        let mut groups = NodeGroups::new();
        provider.get_capability(&graph, &mut groups).unwrap();

        let expected: Vec<Vec<usize>> = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| **op == "Add" || **op == "Mul")
            .map(|(i, _)| vec![i])
            .collect();
        prop_assert_eq!(groups.groups().to_vec(), expected);
    }

    #[test]
    fn test_compile_preserves_count_and_order(
        ops in prop::collection::vec(prop_oneof![Just("Add"), Just("Mul")], 0..8)
    ) {
        let factory = cpu_factory();
        let logger = Logger::new("session");
        let provider = factory.create_cpu_ep(&SessionConfig::new(), &logger).unwrap();

        let graph = parallel_graph(&ops);
        let subgraphs: Vec<ModelGraph> = (0..ops.len())
            .map(|i| graph.extract_subgraph(&[i], &format!("fused_{}", i)).unwrap())
            .collect();
        let fused: Vec<FusedNode> = subgraphs
            .iter()
            .enumerate()
            .map(|(i, sub)| FusedNode::for_subgraph(i, provider.name(), sub))
            .collect();
        let graphs: Vec<&dyn GraphView> = subgraphs.iter().map(|g| g as &dyn GraphView).collect();
        let nodes: Vec<&dyn NodeView> = fused.iter().map(|n| n as &dyn NodeView).collect();

        let output = provider.compile(&graphs, &nodes).unwrap();
        prop_assert_eq!(output.compute_units.len(), ops.len());
        prop_assert_eq!(output.context_nodes.len(), ops.len());

        // Unit i must compute op i.
        let x = Tensor::from_f32(vec![3.0], vec![1]).unwrap();
        for (unit, op) in output.compute_units.iter().zip(&ops) {
            let mut state = unit.create_state(&NodeComputeContext::default()).unwrap();
            let mut ctx = HostKernelContext::new(vec![Some(&x), Some(&x)], 1);
            unit.compute(&mut state, &mut ctx).unwrap();
            unit.release_state(state);

            let want = if *op == "Add" { 6.0 } else { 9.0 };
            prop_assert_eq!(ctx.output(0).unwrap().as_f32(), Some(&[want][..]));
        }
        provider.release_compute_units(output.compute_units);
    }

    #[test]
    fn test_elementwise_matches_scalar_math(
        pairs in prop::collection::vec((-1.0e3f32..1.0e3, -1.0e3f32..1.0e3), 0..64)
    ) {
        let a: Vec<f32> = pairs.iter().map(|p| p.0).collect();
        let b: Vec<f32> = pairs.iter().map(|p| p.1).collect();
        let mut out = vec![0.0; pairs.len()];

        ElementwiseOp::Add.apply(&a, &b, &mut out);
        for (i, (x, y)) in pairs.iter().enumerate() {
            prop_assert_eq!(out[i], x + y);
        }

        ElementwiseOp::Mul.apply(&a, &b, &mut out);
        for (i, (x, y)) in pairs.iter().enumerate() {
            prop_assert_eq!(out[i], x * y);
        }
    }
}
