//! Host-owned tensors and the kernel context compute units read them through.
//!
//! Shapes are `usize` dimensions, so a negative extent cannot be represented.
//! The element count of a tensor is the product of its dimensions; a rank-0
//! tensor holds one element.

use crate::error::{EpError, ErrorCode, Result, Status};
use crate::types::DataType;

/// Typed tensor storage.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// 32-bit floats.
    F32(Vec<f32>),
    /// 64-bit floats.
    F64(Vec<f64>),
    /// 32-bit integers.
    I32(Vec<i32>),
    /// 64-bit integers.
    I64(Vec<i64>),
    /// Bytes.
    U8(Vec<u8>),
    /// Booleans.
    Bool(Vec<bool>),
}

impl TensorData {
    /// Element type of this storage.
    pub fn dtype(&self) -> DataType {
        match self {
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::U8(_) => DataType::U8,
            Self::Bool(_) => DataType::Bool,
        }
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    /// Whether the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::F32 => Self::F32(vec![0.0; len]),
            DataType::F64 => Self::F64(vec![0.0; len]),
            DataType::I32 => Self::I32(vec![0; len]),
            DataType::I64 => Self::I64(vec![0; len]),
            DataType::U8 => Self::U8(vec![0; len]),
            DataType::Bool => Self::Bool(vec![false; len]),
        }
    }
}

/// Number of elements described by `shape`.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// A dense, row-major tensor owned by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    /// Create a tensor, checking that storage matches the shape.
    pub fn from_data(data: TensorData, shape: Vec<usize>) -> Result<Self> {
        let expected = element_count(&shape);
        if data.len() != expected {
            return Err(EpError::InvalidArgument(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Create an f32 tensor.
    pub fn from_f32(values: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        Self::from_data(TensorData::F32(values), shape)
    }

    /// Create a zero-filled tensor.
    pub fn zeros(dtype: DataType, shape: Vec<usize>) -> Self {
        let data = TensorData::zeros(dtype, element_count(&shape));
        Self { shape, data }
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    /// Dimensions.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Product of the dimensions.
    pub fn numel(&self) -> usize {
        element_count(&self.shape)
    }

    /// Underlying storage.
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Borrow f32 elements, if this is an f32 tensor.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(values) => Some(values),
            _ => None,
        }
    }

    /// Mutably borrow f32 elements, if this is an f32 tensor.
    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.data {
            TensorData::F32(values) => Some(values),
            _ => None,
        }
    }
}

/// Inputs of a kernel call together with one bound output.
#[derive(Debug)]
pub struct KernelIo<'c> {
    /// Inputs by position; `None` for absent optional inputs.
    pub inputs: Vec<Option<&'c Tensor>>,
    /// The freshly allocated output tensor.
    pub output: &'c mut Tensor,
}

/// Per-call access to a compute unit's inputs and outputs.
///
/// Implemented by the host. Tensors are only valid for the duration of the
/// compute call that received the context.
pub trait KernelContext {
    /// Number of inputs of the fused node.
    fn input_count(&self) -> usize;

    /// Number of outputs of the fused node.
    fn output_count(&self) -> usize;

    /// Input at `index`, or `None` if it is absent.
    fn input(&self, index: usize) -> Result<Option<&Tensor>>;

    /// Allocate output `index` and return it alongside the inputs.
    ///
    /// Returns `Ok(None)` when the host cannot provide the buffer.
    fn bind_output(
        &mut self,
        index: usize,
        dtype: DataType,
        shape: &[usize],
    ) -> Result<Option<KernelIo<'_>>>;
}

/// Kernel context backed by host tensors.
#[derive(Debug)]
pub struct HostKernelContext<'a> {
    inputs: Vec<Option<&'a Tensor>>,
    outputs: Vec<Option<Tensor>>,
    allocation_limit: Option<usize>,
}

impl<'a> HostKernelContext<'a> {
    /// Create a context with `output_count` unbound outputs.
    pub fn new(inputs: Vec<Option<&'a Tensor>>, output_count: usize) -> Self {
        Self {
            inputs,
            outputs: vec![None; output_count],
            allocation_limit: None,
        }
    }

    /// Refuse output allocations larger than `max_elements`.
    pub fn with_allocation_limit(mut self, max_elements: usize) -> Self {
        self.allocation_limit = Some(max_elements);
        self
    }

    /// Output at `index`, if it was bound.
    pub fn output(&self, index: usize) -> Option<&Tensor> {
        self.outputs.get(index).and_then(Option::as_ref)
    }

    /// Consume the context and return the outputs.
    pub fn into_outputs(self) -> Vec<Option<Tensor>> {
        self.outputs
    }
}

impl KernelContext for HostKernelContext<'_> {
    fn input_count(&self) -> usize {
        self.inputs.len()
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn input(&self, index: usize) -> Result<Option<&Tensor>> {
        Ok(self.inputs.get(index).copied().flatten())
    }

    fn bind_output(
        &mut self,
        index: usize,
        dtype: DataType,
        shape: &[usize],
    ) -> Result<Option<KernelIo<'_>>> {
        if index >= self.outputs.len() {
            return Err(Status::new(
                ErrorCode::InvalidArgument,
                format!(
                    "output index {} out of range ({} outputs)",
                    index,
                    self.outputs.len()
                ),
            )
            .into());
        }

        if let Some(limit) = self.allocation_limit {
            if element_count(shape) > limit {
                return Ok(None);
            }
        }

        let inputs = self.inputs.clone();
        let output = self.outputs[index].insert(Tensor::zeros(dtype, shape.to_vec()));
        Ok(Some(KernelIo { inputs, output }))
    }
}
