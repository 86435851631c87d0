//! Property-based tests for tensors, graphs and the logger.
//!
//! These use proptest to check invariants that must hold for any shape,
//! graph size or event burst.

use std::time::Duration;

use epkit_core::{
    element_count, DataType, ErrorCode, GraphBuilder, GraphSupportInfo, GraphView,
    HostKernelContext, KernelContext, ModelGraph, NodeGroups, NodeView, RateLimiter, Tensor,
};
use proptest::prelude::*;

// Strategy for generating valid tensor shapes
fn tensor_shape_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..8, 0..4)
}

// A linear chain of binary ops: v0 = x op x, v1 = v0 op x, ...
fn chain_graph(ops: &[&str]) -> ModelGraph {
    let mut builder = GraphBuilder::new("chain").inputs(&["x"]);
    let mut prev = "x".to_string();
    for (i, op) in ops.iter().enumerate() {
        let out = format!("v{}", i);
        builder = builder.op(op, &format!("n{}", i), &[prev.as_str(), "x"], &[out.as_str()]);
        prev = out;
    }
    builder.outputs(&[prev.as_str()]).build().unwrap()
}

fn op_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("Add"), Just("Mul"), Just("Sub"), Just("Relu")]
}

proptest! {
    #[test]
    fn test_tensor_accepts_exact_storage(shape in tensor_shape_strategy()) {
        let size = element_count(&shape);
        let tensor = Tensor::from_f32(vec![1.0; size], shape.clone()).unwrap();

        prop_assert_eq!(tensor.numel(), size);
        prop_assert_eq!(tensor.shape(), &shape[..]);
    }

    #[test]
    fn test_tensor_rejects_wrong_storage(
        shape in tensor_shape_strategy(),
        extra in 1usize..5
    ) {
        let size = element_count(&shape);
        let err = Tensor::from_f32(vec![0.0; size + extra], shape).unwrap_err();
        prop_assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_bound_output_matches_request(shape in tensor_shape_strategy()) {
        let mut ctx = HostKernelContext::new(vec![], 1);
        {
            let io = ctx.bind_output(0, DataType::F32, &shape).unwrap().unwrap();
            prop_assert_eq!(io.output.shape(), &shape[..]);
            prop_assert_eq!(io.output.dtype(), DataType::F32);
        }
        prop_assert_eq!(ctx.output(0).unwrap().numel(), element_count(&shape));
    }

    #[test]
    fn test_claims_are_disjoint(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let graph = chain_graph(&ops);
        let mut groups = NodeGroups::new();

        let nodes = graph.nodes().unwrap();
        for node in &nodes {
            if node.op_type().unwrap() == "Add" {
                groups.add_nodes_to_fuse(&[*node]).unwrap();
            }
        }
        // Claiming everything again must fail for any node already taken.
        for node in &nodes {
            let again = groups.add_nodes_to_fuse(&[*node]);
            prop_assert_eq!(again.is_err(), node.op_type().unwrap() == "Add");
        }

        let adds = ops.iter().filter(|op| **op == "Add").count();
        prop_assert_eq!(graph.find_nodes_by_op("Add").len(), adds);
        prop_assert_eq!(groups.claimed_count(), ops.len());
    }

    #[test]
    fn test_single_node_subgraph_boundary(
        ops in prop::collection::vec(op_strategy(), 1..12),
        pick in any::<prop::sample::Index>()
    ) {
        let graph = chain_graph(&ops);
        let id = pick.index(ops.len());
        let sub = graph.extract_subgraph(&[id], "part").unwrap();

        prop_assert_eq!(sub.node_count().unwrap(), 1);
        prop_assert_eq!(&sub.outputs, &graph.nodes[id].outputs);
        for input in &sub.inputs {
            prop_assert!(graph.nodes[id].inputs.contains(input));
        }
    }

    #[test]
    fn test_rate_limiter_never_exceeds_budget(
        max_events in 1u32..20,
        attempts in 0usize..100
    ) {
        let limiter = RateLimiter::new(max_events, Duration::from_secs(3600));
        let allowed = (0..attempts).filter(|_| limiter.allow("key")).count();

        prop_assert_eq!(allowed, attempts.min(max_events as usize));
        prop_assert_eq!(limiter.suppressed() as usize, attempts - allowed);
    }
}
