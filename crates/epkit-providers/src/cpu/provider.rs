//! CPU execution provider.
//!
//! Claims `Add` and `Mul` nodes by operator type alone, one node per
//! group, and compiles each claimed group into an [`ElementwiseComputeUnit`].

use epkit_core::{
    CompileOutput, DataLayout, EpError, ExecutionProvider, GraphSupportInfo, GraphView, Logger,
    NodeComputeUnit, NodeView, Result, Severity,
};
use tracing::debug;

use super::config::CpuProviderConfig;
use super::factory::CpuProviderFactory;
use super::kernels::{ElementwiseComputeUnit, ElementwiseOp};

/// CPU execution provider bound to one session.
///
/// Borrows its factory and the session logger, so it cannot outlive either.
pub struct CpuExecutionProvider<'a> {
    factory: &'a CpuProviderFactory,
    logger: &'a Logger,
    config: CpuProviderConfig,
}

impl<'a> CpuExecutionProvider<'a> {
    /// Create a provider for one session.
    pub fn new(
        factory: &'a CpuProviderFactory,
        logger: &'a Logger,
        config: CpuProviderConfig,
    ) -> Self {
        Self {
            factory,
            logger,
            config,
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &CpuProviderConfig {
        &self.config
    }

    /// Factory that created this provider.
    pub fn factory(&self) -> &'a CpuProviderFactory {
        self.factory
    }

    fn claims(&self, node: &dyn NodeView) -> Result<bool> {
        Ok(self.config.supports_op(node.op_type()?))
    }

    fn compile_one(
        &self,
        graph: &dyn GraphView,
        fused_node: &dyn NodeView,
    ) -> Result<ElementwiseComputeUnit> {
        let nodes = graph.nodes()?;
        let node = match nodes.as_slice() {
            [node] => *node,
            _ => {
                return Err(EpError::Unsupported(format!(
                    "'{}' has {} nodes; only single-node subgraphs compile",
                    fused_node.name(),
                    nodes.len()
                )))
            }
        };

        let op_type = node.op_type()?;
        let supported = self.claims(node)?;
        let op = ElementwiseOp::from_op_type(op_type)
            .filter(|_| supported)
            .ok_or_else(|| {
                EpError::Unsupported(format!(
                    "operator '{}' in '{}' is not supported by {}",
                    op_type,
                    fused_node.name(),
                    self.name()
                ))
            })?;

        Ok(ElementwiseComputeUnit::new(
            self.factory.context().clone(),
            op,
            fused_node.name(),
        ))
    }
}

impl ExecutionProvider for CpuExecutionProvider<'_> {
    fn name(&self) -> &str {
        self.factory.ep_name()
    }

    fn get_capability(
        &self,
        graph: &dyn GraphView,
        support_info: &mut dyn GraphSupportInfo,
    ) -> Result<()> {
        let mut claimed = 0usize;
        for node in graph.nodes()? {
            if !self.claims(node)? {
                continue;
            }

            support_info.add_nodes_to_fuse(&[node])?;
            claimed += 1;

            if self.config.log_claims {
                self.logger.log_limited(
                    "claim",
                    Severity::Debug,
                    &format!(
                        "{} claimed node '{}' ({})",
                        self.name(),
                        node.name(),
                        node.op_type()?
                    ),
                );
            }
        }

        debug!(
            "{} claimed {} nodes of graph '{}'",
            self.name(),
            claimed,
            graph.name()
        );
        Ok(())
    }

    fn compile(
        &self,
        graphs: &[&dyn GraphView],
        fused_nodes: &[&dyn NodeView],
    ) -> Result<CompileOutput> {
        if graphs.len() != fused_nodes.len() {
            return Err(EpError::InvalidArgument(format!(
                "{} subgraphs but {} fused nodes",
                graphs.len(),
                fused_nodes.len()
            )));
        }

        let mut compute_units: Vec<Box<dyn NodeComputeUnit>> = Vec::with_capacity(graphs.len());
        for (graph, fused_node) in graphs.iter().zip(fused_nodes) {
            compute_units.push(Box::new(self.compile_one(*graph, *fused_node)?));
        }

        debug!("{} compiled {} subgraphs", self.name(), compute_units.len());
        Ok(CompileOutput {
            context_nodes: vec![None; compute_units.len()],
            compute_units,
        })
    }

    fn release_compute_units(&self, units: Vec<Box<dyn NodeComputeUnit>>) {
        if !units.is_empty() {
            debug!("{} released {} compute units", self.name(), units.len());
        }
    }

    fn preferred_data_layout(&self) -> DataLayout {
        self.config.preferred_layout
    }

    fn set_dynamic_options(&self, options: &[(&str, &str)]) -> Result<()> {
        for (key, _) in options {
            debug!("{} ignoring dynamic option '{}'", self.name(), key);
        }
        Ok(())
    }
}
