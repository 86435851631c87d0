//! Read-only graph views handed to providers, and the host's graph model.
//!
//! Providers only see graphs through [`GraphView`] and [`NodeView`]; every
//! metadata read is fallible so a host can surface its own failures. Claims
//! are recorded through [`GraphSupportInfo`].

use std::collections::HashSet;

use crate::error::{EpError, ErrorCode, Result, Status};
use crate::types::NodeId;

/// Read-only view of one node.
pub trait NodeView {
    /// Identity within the owning graph.
    fn id(&self) -> NodeId;

    /// Node name.
    fn name(&self) -> &str;

    /// Operator type, e.g. `"Add"`.
    fn op_type(&self) -> Result<&str>;

    /// Operator domain; empty for the default domain.
    fn domain(&self) -> &str;

    /// Names of consumed values.
    fn input_names(&self) -> &[String];

    /// Names of produced values.
    fn output_names(&self) -> &[String];
}

/// Read-only view of a graph.
pub trait GraphView {
    /// Graph name.
    fn name(&self) -> &str;

    /// Number of nodes.
    fn node_count(&self) -> Result<usize>;

    /// All nodes in host order.
    fn nodes(&self) -> Result<Vec<&dyn NodeView>>;
}

/// Sink for the nodes a provider claims during the capability pass.
pub trait GraphSupportInfo {
    /// Claim `nodes` as one group to be fused into a single compiled unit.
    fn add_nodes_to_fuse(&mut self, nodes: &[&dyn NodeView]) -> Result<()>;
}

/// A node of a [`ModelGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Node identifier; assigned by [`ModelGraph::add_node`].
    pub id: NodeId,
    /// Operator type.
    pub op_type: String,
    /// Operator domain.
    pub domain: String,
    /// Node name.
    pub name: String,
    /// Consumed value names.
    pub inputs: Vec<String>,
    /// Produced value names.
    pub outputs: Vec<String>,
}

impl GraphNode {
    /// Create a default-domain node.
    pub fn new(
        op_type: impl Into<String>,
        name: impl Into<String>,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        Self {
            id: 0,
            op_type: op_type.into(),
            domain: String::new(),
            name: name.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Set the operator domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

impl NodeView for GraphNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn op_type(&self) -> Result<&str> {
        Ok(&self.op_type)
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }
}

/// A graph owned by the host. Nodes are kept in topological order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelGraph {
    /// Graph name.
    pub name: String,
    /// Nodes in execution order.
    pub nodes: Vec<GraphNode>,
    /// Graph input value names.
    pub inputs: Vec<String>,
    /// Graph output value names.
    pub outputs: Vec<String>,
}

impl ModelGraph {
    /// Create a new empty model graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append a node, returning its assigned id.
    pub fn add_node(&mut self, mut node: GraphNode) -> NodeId {
        let node_id = self.nodes.len();
        node.id = node_id;
        self.nodes.push(node);
        node_id
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    /// Find nodes by operation type.
    pub fn find_nodes_by_op(&self, op_type: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.op_type == op_type)
            .map(|node| node.id)
            .collect()
    }

    /// Check that every value has one producer and is defined before use.
    pub fn validate(&self) -> Result<()> {
        let mut defined: HashSet<&str> = self.inputs.iter().map(String::as_str).collect();

        for node in &self.nodes {
            for input in &node.inputs {
                if !defined.contains(input.as_str()) {
                    return Err(EpError::InvalidGraph(format!(
                        "node '{}' consumes '{}' before it is produced",
                        node.name, input
                    )));
                }
            }
            for output in &node.outputs {
                if !defined.insert(output.as_str()) {
                    return Err(EpError::InvalidGraph(format!(
                        "value '{}' has more than one producer",
                        output
                    )));
                }
            }
        }

        for output in &self.outputs {
            if !defined.contains(output.as_str()) {
                return Err(EpError::InvalidGraph(format!(
                    "graph output '{}' is never produced",
                    output
                )));
            }
        }

        Ok(())
    }

    /// Extract the nodes in `node_ids` as a standalone graph.
    ///
    /// Inputs are the uses of values not produced inside the group, in node
    /// order and positional, so `Add(x, x)` keeps both operands. Outputs are
    /// values produced inside and either used outside the group, listed as
    /// graph outputs, or consumed by nothing in the group.
    pub fn extract_subgraph(&self, node_ids: &[NodeId], name: &str) -> Result<ModelGraph> {
        let mut nodes = Vec::with_capacity(node_ids.len());
        for &node_id in node_ids {
            let node = self.get_node(node_id).ok_or_else(|| {
                EpError::InvalidGraph(format!("node {} does not exist", node_id))
            })?;
            nodes.push(node.clone());
        }

        let produced: HashSet<&str> = nodes
            .iter()
            .flat_map(|node| node.outputs.iter().map(String::as_str))
            .collect();
        let group: HashSet<NodeId> = node_ids.iter().copied().collect();

        let inputs: Vec<String> = nodes
            .iter()
            .flat_map(|node| &node.inputs)
            .filter(|input| !produced.contains(input.as_str()))
            .cloned()
            .collect();

        let mut outputs = Vec::new();
        for output in nodes.iter().flat_map(|node| &node.outputs) {
            let used_outside = self
                .nodes
                .iter()
                .filter(|node| !group.contains(&node.id))
                .any(|node| node.inputs.contains(output));
            let used_inside = nodes.iter().any(|node| node.inputs.contains(output));
            if used_outside || !used_inside || self.outputs.contains(output) {
                outputs.push(output.clone());
            }
        }

        Ok(ModelGraph {
            name: name.to_string(),
            nodes,
            inputs,
            outputs,
        })
    }
}

impl GraphView for ModelGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_count(&self) -> Result<usize> {
        Ok(self.nodes.len())
    }

    fn nodes(&self) -> Result<Vec<&dyn NodeView>> {
        Ok(self.nodes.iter().map(|node| node as &dyn NodeView).collect())
    }
}

/// Graph builder for convenient graph construction.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: ModelGraph,
}

impl GraphBuilder {
    /// Create a new graph builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: ModelGraph::new(name),
        }
    }

    /// Declare graph inputs.
    pub fn inputs(mut self, names: &[&str]) -> Self {
        self.graph.inputs = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Declare graph outputs.
    pub fn outputs(mut self, names: &[&str]) -> Self {
        self.graph.outputs = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Append a default-domain node.
    pub fn op(mut self, op_type: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        self.graph
            .add_node(GraphNode::new(op_type, name, inputs, outputs));
        self
    }

    /// Validate and return the graph.
    pub fn build(self) -> Result<ModelGraph> {
        self.graph.validate()?;
        Ok(self.graph)
    }
}

/// Claimed node groups collected during a capability pass.
#[derive(Debug, Clone, Default)]
pub struct NodeGroups {
    groups: Vec<Vec<NodeId>>,
    claimed: HashSet<NodeId>,
}

impl NodeGroups {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claimed groups in claim order.
    pub fn groups(&self) -> &[Vec<NodeId>] {
        &self.groups
    }

    /// Whether `node_id` belongs to any group.
    pub fn is_claimed(&self, node_id: NodeId) -> bool {
        self.claimed.contains(&node_id)
    }

    /// Total number of claimed nodes.
    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }
}

impl GraphSupportInfo for NodeGroups {
    fn add_nodes_to_fuse(&mut self, nodes: &[&dyn NodeView]) -> Result<()> {
        if nodes.is_empty() {
            return Err(Status::new(ErrorCode::InvalidArgument, "empty node group").into());
        }

        let ids: Vec<NodeId> = nodes.iter().map(|node| node.id()).collect();
        if let Some(id) = ids.iter().find(|id| self.claimed.contains(*id)) {
            return Err(Status::new(
                ErrorCode::InvalidGraph,
                format!("node {} was already claimed", id),
            )
            .into());
        }

        self.claimed.extend(ids.iter().copied());
        self.groups.push(ids);
        Ok(())
    }
}

/// Host-built node standing in for one claimed group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusedNode {
    /// Synthetic node id (position in the compile batch).
    pub id: NodeId,
    /// Name of the fused node.
    pub name: String,
    /// Operator type; the claiming provider's name.
    pub op_type: String,
    /// Boundary inputs.
    pub inputs: Vec<String>,
    /// Boundary outputs.
    pub outputs: Vec<String>,
}

impl FusedNode {
    /// Build the fused node for `subgraph` at position `index`.
    pub fn for_subgraph(index: usize, ep_name: &str, subgraph: &ModelGraph) -> Self {
        Self {
            id: index,
            name: subgraph.name.clone(),
            op_type: ep_name.to_string(),
            inputs: subgraph.inputs.clone(),
            outputs: subgraph.outputs.clone(),
        }
    }
}

impl NodeView for FusedNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn op_type(&self) -> Result<&str> {
        Ok(&self.op_type)
    }

    fn domain(&self) -> &str {
        ""
    }

    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }
}
