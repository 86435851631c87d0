//! CPU compute units for compiled single-node subgraphs.
//!
//! A unit resolves its operator once at compile time. At run time it reads two
//! f32 inputs of the same element count and writes one output shaped like
//! input 0. There is no broadcasting.

use epkit_core::{
    element_count, ComputeState, DataType, EpContext, EpError, KernelContext, NodeComputeContext,
    NodeComputeUnit, Result, Severity, Tensor,
};
use tracing::trace;

/// Binary elementwise operators with a CPU kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementwiseOp {
    /// Elementwise sum.
    Add,
    /// Elementwise product.
    Mul,
}

impl ElementwiseOp {
    /// Map an operator type to its kernel.
    pub fn from_op_type(op_type: &str) -> Option<Self> {
        match op_type {
            "Add" => Some(Self::Add),
            "Mul" => Some(Self::Mul),
            _ => None,
        }
    }

    /// Operator type name.
    pub fn op_type(self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Mul => "Mul",
        }
    }

    /// Write `a[i] op b[i]` into `out[i]`. All slices have the same length.
    pub fn apply(self, a: &[f32], b: &[f32], out: &mut [f32]) {
        let pairs = a.iter().zip(b);
        match self {
            Self::Add => {
                for (o, (x, y)) in out.iter_mut().zip(pairs) {
                    *o = x + y;
                }
            }
            Self::Mul => {
                for (o, (x, y)) in out.iter_mut().zip(pairs) {
                    *o = x * y;
                }
            }
        }
    }
}

/// Per-context state of an [`ElementwiseComputeUnit`].
#[derive(Debug, Default)]
pub struct ElementwiseState {
    /// Name of the fused node the state was created for.
    pub fused_node_name: String,
    /// Completed compute calls.
    pub computes: u64,
}

/// Compute unit for one `Add` or `Mul` node.
#[derive(Debug)]
pub struct ElementwiseComputeUnit {
    context: EpContext,
    op: ElementwiseOp,
    fused_node_name: String,
}

impl ElementwiseComputeUnit {
    /// Create a unit for `op`.
    pub fn new(context: EpContext, op: ElementwiseOp, fused_node_name: impl Into<String>) -> Self {
        Self {
            context,
            op,
            fused_node_name: fused_node_name.into(),
        }
    }

    /// Resolved operator.
    pub fn op(&self) -> ElementwiseOp {
        self.op
    }

    /// Name of the fused node this unit was compiled for.
    pub fn fused_node_name(&self) -> &str {
        &self.fused_node_name
    }
}

fn f32_input(tensor: Option<&Tensor>, index: usize) -> Result<&Tensor> {
    let tensor =
        tensor.ok_or_else(|| EpError::InvalidArgument(format!("input {} is missing", index)))?;
    if tensor.dtype() != DataType::F32 {
        return Err(EpError::Unsupported(format!(
            "input {} has element type {:?}, expected F32",
            index,
            tensor.dtype()
        )));
    }
    Ok(tensor)
}

fn check_len(what: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(EpError::InvalidArgument(format!(
            "{} holds {} elements, expected {}",
            what, len, expected
        )));
    }
    Ok(())
}

impl NodeComputeUnit for ElementwiseComputeUnit {
    fn create_state(&self, context: &NodeComputeContext) -> Result<ComputeState> {
        Ok(Box::new(ElementwiseState {
            fused_node_name: context.fused_node_name.clone(),
            computes: 0,
        }))
    }

    fn compute(&self, state: &mut ComputeState, kernel: &mut dyn KernelContext) -> Result<()> {
        let state = state.downcast_mut::<ElementwiseState>().ok_or_else(|| {
            EpError::InvalidArgument("compute state was not created by this unit".to_string())
        })?;

        // Inputs are checked before the host is asked for output memory.
        let shape = {
            let a = f32_input(kernel.input(0)?, 0)?;
            f32_input(kernel.input(1)?, 1)?;
            a.shape().to_vec()
        };
        let expected = element_count(&shape);

        let io = kernel
            .bind_output(0, DataType::F32, &shape)?
            .ok_or_else(|| {
                EpError::AllocationFailure(format!(
                    "host could not allocate output of shape {:?}",
                    shape
                ))
            })?;

        let a = f32_input(io.inputs.first().copied().flatten(), 0)?.as_f32();
        let b = f32_input(io.inputs.get(1).copied().flatten(), 1)?.as_f32();
        let out = io.output.as_f32_mut();
        let (Some(a), Some(b), Some(out)) = (a, b, out) else {
            return Err(EpError::Unsupported("kernel needs f32 buffers".to_string()));
        };

        check_len("input 0", a.len(), expected)?;
        check_len("input 1", b.len(), expected)?;
        check_len("output 0", out.len(), expected)?;

        self.op.apply(a, b, out);
        state.computes += 1;

        trace!(
            "{} computed {} elements for '{}'",
            self.op.op_type(),
            expected,
            state.fused_node_name
        );
        Ok(())
    }

    fn release_state(&self, state: ComputeState) {
        if let Ok(state) = state.downcast::<ElementwiseState>() {
            self.context.logger.log_limited(
                "release_state",
                Severity::Trace,
                &format!(
                    "Released state of '{}' after {} computes",
                    state.fused_node_name, state.computes
                ),
            );
        }
    }
}
