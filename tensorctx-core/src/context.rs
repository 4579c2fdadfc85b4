//! The arena: one fixed-size buffer that every tensor payload, tensor header
//! and graph reservation is bump-allocated from.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    graph::{BinaryOpType, Graph, OpId, OpKind, OpNode, UnaryOpType, DEFAULT_GRAPH_SIZE},
    tensor::{checked_nbytes, contiguous_strides},
    DType, Error, Kernel, Result, TensorId, TensorMeta, WithDType,
};

/// Alignment of every arena allocation, in bytes.
pub const ARENA_ALIGN: usize = 16;

/// Bytes reserved in the arena for each tensor header.
pub const TENSOR_HEADER_SIZE: usize = 256;

/// Bytes reserved for a graph before its per-node slots.
pub const GRAPH_HEADER_SIZE: usize = 128;

/// Per-slot graph reservation: node, leaf and visited mark.
const GRAPH_SLOT_SIZE: usize = 3 * std::mem::size_of::<usize>();

/// Fixed slack added to every capacity estimate.
pub const CONTEXT_SLACK: usize = 1024;

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(0);

const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Arena bytes charged for one tensor on top of its payload, including the
/// worst-case alignment padding of the payload.
pub const fn tensor_overhead() -> usize {
    TENSOR_HEADER_SIZE + ARENA_ALIGN
}

/// Arena bytes charged for a graph of `size` nodes.
pub const fn graph_overhead_custom(size: usize) -> usize {
    align_up(GRAPH_HEADER_SIZE + size * GRAPH_SLOT_SIZE, ARENA_ALIGN)
}

/// Arena bytes charged for a graph of [`DEFAULT_GRAPH_SIZE`] nodes.
pub const fn graph_overhead() -> usize {
    graph_overhead_custom(DEFAULT_GRAPH_SIZE)
}

/// Accumulates the arena capacity needed for a planned sequence of
/// allocations:
///
/// `sum(payload bytes) + tensor_overhead() * tensors + graph overheads + CONTEXT_SLACK`
///
/// Views and operation outputs are tensors too and must be planned.
#[derive(Debug, Clone, Default)]
pub struct CapacityPlanner {
    payload_bytes: usize,
    n_tensors: usize,
    graph_bytes: usize,
}

impl CapacityPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tensor(&mut self, dtype: DType, shape: &[usize]) -> &mut Self {
        let nbytes = shape
            .iter()
            .fold(dtype.size_in_bytes(), |acc, &dim| acc.saturating_mul(dim));
        self.payload_bytes = self.payload_bytes.saturating_add(nbytes);
        self.n_tensors += 1;
        self
    }

    /// A reshaped view: a header without payload.
    pub fn view(&mut self) -> &mut Self {
        self.n_tensors += 1;
        self
    }

    /// A graph of [`DEFAULT_GRAPH_SIZE`] node slots, as reserved by
    /// [`Context::build_forward`].
    pub fn graph(&mut self) -> &mut Self {
        self.graph_custom(DEFAULT_GRAPH_SIZE)
    }

    /// A graph with room for `size` node slots (and as many leaf slots), as
    /// reserved by [`Context::new_graph_custom`].
    pub fn graph_custom(&mut self, size: usize) -> &mut Self {
        self.graph_bytes = self.graph_bytes.saturating_add(graph_overhead_custom(size));
        self
    }

    /// Tensors planned so far, views included.
    pub fn n_tensors(&self) -> usize {
        self.n_tensors
    }

    pub fn mem_size(&self) -> usize {
        self.payload_bytes
            .saturating_add(self.n_tensors.saturating_mul(tensor_overhead()))
            .saturating_add(self.graph_bytes)
            .saturating_add(CONTEXT_SLACK)
    }
}

/// Parameters for [`Context::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Arena capacity in bytes. Fixed for the lifetime of the context.
    pub mem_size: usize,
}

impl ContextParams {
    pub fn new(mem_size: usize) -> Self {
        Self { mem_size }
    }

    pub fn from_plan(plan: &CapacityPlanner) -> Self {
        Self::new(plan.mem_size())
    }
}

/// Owner of the arena buffer and of every tensor and operation allocated
/// from it.
///
/// Tensors and operations are addressed by [`TensorId`] and [`OpId`]
/// handles. Dropping the context (or calling [`Context::free`]) releases
/// everything at once.
pub struct Context {
    pub(crate) id: usize,
    // u128 words keep the base aligned for every supported dtype
    pub(crate) buffer: Vec<u128>,
    pub(crate) capacity: usize,
    pub(crate) offset: usize,
    pub(crate) tensors: Vec<TensorMeta>,
    pub(crate) ops: Vec<OpNode>,
}

impl Context {
    /// Reserve the arena. The buffer is allocated once and never resized.
    pub fn new(params: ContextParams) -> Result<Self> {
        if params.mem_size == 0 {
            return Err(Error::InvalidParams(
                "mem_size must be greater than zero".to_string(),
            ));
        }
        let words = params.mem_size.div_ceil(std::mem::size_of::<u128>());
        tracing::debug!("reserving arena of {} bytes", params.mem_size);
        Ok(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            buffer: vec![0u128; words],
            capacity: params.mem_size,
            offset: 0,
            tensors: Vec::new(),
            ops: Vec::new(),
        })
    }

    /// Release the arena. Every handle issued by this context becomes
    /// meaningless.
    pub fn free(self) {
        tracing::debug!(
            "freeing arena: {} of {} bytes used by {} tensors",
            self.offset,
            self.capacity,
            self.tensors.len()
        );
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.offset
    }

    pub fn n_tensors(&self) -> usize {
        self.tensors.len()
    }

    pub fn n_ops(&self) -> usize {
        self.ops.len()
    }

    /// Bump-allocate `nbytes` (rounded up to [`ARENA_ALIGN`]) and return the
    /// offset of the block. On failure the offset is left untouched.
    fn bump(&mut self, nbytes: usize) -> Result<usize> {
        let available = self.remaining();
        let padded = nbytes
            .checked_add(ARENA_ALIGN - 1)
            .map(|n| n & !(ARENA_ALIGN - 1))
            .filter(|&n| n <= available)
            .ok_or(Error::OutOfMemory {
                requested: nbytes,
                available,
                capacity: self.capacity,
            })?;
        let start = self.offset;
        self.offset += padded;
        Ok(start)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u128, u8>(&self.buffer)[..self.capacity]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u128, u8>(&mut self.buffer)[..self.capacity]
    }

    /// Allocate an uninitialised (zeroed) tensor.
    ///
    /// Fails with [`Error::OutOfMemory`] if the header and payload do not fit;
    /// previously allocated tensors are not affected.
    pub fn new_tensor(&mut self, dtype: DType, shape: &[usize]) -> Result<TensorId> {
        self.push_tensor(dtype, shape, None)
    }

    pub fn new_tensor_1d(&mut self, dtype: DType, n0: usize) -> Result<TensorId> {
        self.new_tensor(dtype, &[n0])
    }

    /// A `rows × cols` matrix.
    pub fn new_tensor_2d(&mut self, dtype: DType, rows: usize, cols: usize) -> Result<TensorId> {
        self.new_tensor(dtype, &[rows, cols])
    }

    pub fn new_tensor_3d(
        &mut self,
        dtype: DType,
        n0: usize,
        n1: usize,
        n2: usize,
    ) -> Result<TensorId> {
        self.new_tensor(dtype, &[n0, n1, n2])
    }

    pub fn new_tensor_4d(
        &mut self,
        dtype: DType,
        n0: usize,
        n1: usize,
        n2: usize,
        n3: usize,
    ) -> Result<TensorId> {
        self.new_tensor(dtype, &[n0, n1, n2, n3])
    }

    fn push_tensor(
        &mut self,
        dtype: DType,
        shape: &[usize],
        producer: Option<OpId>,
    ) -> Result<TensorId> {
        let nbytes = checked_nbytes(dtype, shape)?;
        let total = nbytes
            .checked_add(TENSOR_HEADER_SIZE)
            .ok_or(Error::OutOfMemory {
                requested: nbytes,
                available: self.remaining(),
                capacity: self.capacity,
            })?;
        // header slot, then payload
        let header = self.bump(total)?;
        let offset = header + TENSOR_HEADER_SIZE;

        let id = self.next_tensor_id();
        self.tensors.push(TensorMeta {
            id,
            dtype,
            shape: shape.to_vec(),
            strides: contiguous_strides(shape),
            offset,
            nbytes,
            producer,
            view_src: None,
            name: None,
        });
        tracing::trace!("allocated {id}: {dtype} {shape:?}, {nbytes} bytes at {offset}");
        Ok(id)
    }

    fn next_tensor_id(&self) -> TensorId {
        TensorId {
            ctx: self.id,
            idx: self.tensors.len(),
        }
    }

    /// Fails with [`Error::UnknownTensor`] for handles issued by another
    /// context.
    pub fn meta(&self, id: TensorId) -> Result<&TensorMeta> {
        if id.ctx != self.id {
            return Err(Error::UnknownTensor(id));
        }
        self.tensors.get(id.idx).ok_or(Error::UnknownTensor(id))
    }

    pub fn op(&self, id: OpId) -> Result<&OpNode> {
        if id.ctx != self.id {
            return Err(Error::UnknownOp(id));
        }
        self.ops.get(id.idx).ok_or(Error::UnknownOp(id))
    }

    pub fn set_name(&mut self, id: TensorId, name: impl Into<String>) -> Result<()> {
        self.meta(id)?;
        self.tensors[id.idx].name = Some(name.into());
        Ok(())
    }

    pub fn name(&self, id: TensorId) -> Result<Option<&str>> {
        Ok(self.meta(id)?.name())
    }

    /// Tensors that must be materialised before `id`.
    pub(crate) fn dependencies(&self, id: TensorId) -> Result<Vec<TensorId>> {
        let meta = self.meta(id)?;
        if let Some(op) = meta.producer {
            Ok(self.op(op)?.inputs.clone())
        } else {
            Ok(meta.view_src.into_iter().collect())
        }
    }

    /// The tensor owning the payload that `id` refers to.
    pub(crate) fn resolve_view(&self, mut id: TensorId) -> Result<TensorId> {
        while let Some(src) = self.meta(id)?.view_src {
            id = src;
        }
        Ok(id)
    }

    /// Copy raw bytes into a tensor's payload.
    ///
    /// `src` must be exactly as long as the tensor's byte size; otherwise
    /// nothing is written.
    pub fn load_bytes(&mut self, id: TensorId, src: &[u8]) -> Result<()> {
        let meta = self.meta(id)?;
        let (offset, nbytes) = (meta.offset, meta.nbytes);
        if src.len() != nbytes {
            return Err(Error::SizeMismatch {
                tensor: id,
                expected: nbytes,
                got: src.len(),
            });
        }
        self.bytes_mut()[offset..offset + nbytes].copy_from_slice(src);
        Ok(())
    }

    /// Copy typed values into a tensor. The element type must match.
    pub fn load<T: WithDType>(&mut self, id: TensorId, src: &[T]) -> Result<()> {
        let meta = self.meta(id)?;
        if meta.dtype != T::DTYPE {
            return Err(Error::DTypeMismatch {
                op: format!("load into {id}"),
                expected: meta.dtype,
                got: T::DTYPE,
            });
        }
        self.load_bytes(id, bytemuck::cast_slice(src))
    }

    /// Borrow a tensor's payload as a typed slice.
    pub fn data<T: WithDType>(&self, id: TensorId) -> Result<&[T]> {
        let meta = self.meta(id)?;
        let bytes = &self.bytes()[meta.offset..meta.offset + meta.nbytes];
        crate::TensorView::new(meta, bytes).as_slice()
    }

    /// Copy a matrix out row by row.
    pub fn to_vec2<T: WithDType>(&self, id: TensorId) -> Result<Vec<Vec<T>>> {
        let meta = self.meta(id)?;
        if meta.rank() != 2 {
            return Err(Error::InvalidShape {
                shape: meta.shape.clone(),
                reason: "expected a matrix",
            });
        }
        let cols = meta.shape[1];
        Ok(self
            .data::<T>(id)?
            .chunks_exact(cols)
            .map(|row| row.to_vec())
            .collect())
    }

    /// A view of `id` with a different shape over the same payload.
    ///
    /// The element count must match and the source must be contiguous. Only
    /// a header is allocated.
    pub fn reshape(&mut self, id: TensorId, shape: &[usize]) -> Result<TensorId> {
        let src = self.meta(id)?;
        let nbytes = checked_nbytes(src.dtype, shape)?;
        if nbytes != src.nbytes || !src.is_contiguous() {
            return Err(Error::ShapeMismatch {
                op: "reshape".to_string(),
                lhs: src.shape.clone(),
                rhs: shape.to_vec(),
            });
        }
        let (dtype, offset) = (src.dtype, src.offset);

        self.bump(TENSOR_HEADER_SIZE)?;
        let view = self.next_tensor_id();
        self.tensors.push(TensorMeta {
            id: view,
            dtype,
            shape: shape.to_vec(),
            strides: contiguous_strides(shape),
            offset,
            nbytes,
            producer: None,
            view_src: Some(id),
            name: None,
        });
        tracing::trace!("viewed {id} as {view}: {shape:?}");
        Ok(view)
    }

    /// Record an operation and allocate its output.
    fn new_op(&mut self, kind: OpKind, inputs: &[TensorId]) -> Result<TensorId> {
        let metas = inputs
            .iter()
            .map(|&id| self.meta(id))
            .collect::<Result<Vec<_>>>()?;
        let (dtype, shape) = kind.kernel().output_layout(&metas)?;

        let op = OpId {
            ctx: self.id,
            idx: self.ops.len(),
        };
        let output = self.push_tensor(dtype, &shape, Some(op))?;
        tracing::trace!("{op}: {} {inputs:?} -> {output}", kind.name());
        self.ops.push(OpNode {
            kind,
            inputs: inputs.to_vec(),
            output,
        });
        Ok(output)
    }

    /// `a · bᵗ`: `a` is `[.., m, k]`, `b` is `[.., n, k]`, the result is
    /// `[.., m, n]`.
    pub fn mul_mat(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.new_op(OpKind::MulMat, &[a, b])
    }

    pub fn add(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.new_op(OpKind::Binary(BinaryOpType::Add), &[a, b])
    }

    pub fn sub(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.new_op(OpKind::Binary(BinaryOpType::Sub), &[a, b])
    }

    pub fn mul(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.new_op(OpKind::Binary(BinaryOpType::Mul), &[a, b])
    }

    pub fn div(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.new_op(OpKind::Binary(BinaryOpType::Div), &[a, b])
    }

    pub fn neg(&mut self, a: TensorId) -> Result<TensorId> {
        self.new_op(OpKind::Unary(UnaryOpType::Neg), &[a])
    }

    pub fn sqrt(&mut self, a: TensorId) -> Result<TensorId> {
        self.new_op(OpKind::Unary(UnaryOpType::Sqrt), &[a])
    }

    /// Apply a caller-supplied kernel.
    pub fn custom(&mut self, kernel: Arc<dyn Kernel>, inputs: &[TensorId]) -> Result<TensorId> {
        self.new_op(OpKind::Custom(kernel), inputs)
    }

    /// Reserve an empty graph of [`DEFAULT_GRAPH_SIZE`] nodes.
    pub fn new_graph(&mut self) -> Result<Graph> {
        self.new_graph_custom(DEFAULT_GRAPH_SIZE)
    }

    pub fn new_graph_custom(&mut self, size: usize) -> Result<Graph> {
        self.bump(graph_overhead_custom(size))?;
        Ok(Graph::with_size(self.id, size))
    }

    /// Build the forward graph computing `output`.
    pub fn build_forward(&mut self, output: TensorId) -> Result<Graph> {
        let mut graph = self.new_graph()?;
        graph.expand(self, output)?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_ordered() {
        let mut ctx = Context::new(ContextParams::new(4096)).unwrap();
        let a = ctx.new_tensor_1d(DType::U8, 3).unwrap();
        let b = ctx.new_tensor_1d(DType::F64, 2).unwrap();
        let (a, b) = (ctx.meta(a).unwrap(), ctx.meta(b).unwrap());
        assert_eq!(a.offset() % ARENA_ALIGN, 0);
        assert_eq!(b.offset() % ARENA_ALIGN, 0);
        assert!(b.offset() >= a.offset() + a.nbytes());
    }

    #[test]
    fn used_never_exceeds_overhead_formula() {
        let mut ctx = Context::new(ContextParams::new(1 << 16)).unwrap();
        ctx.new_tensor_1d(DType::U8, 1).unwrap();
        assert!(ctx.used() <= 1 + tensor_overhead());
        assert_eq!(ctx.used() % ARENA_ALIGN, 0);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            Context::new(ContextParams::new(0)),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn failed_op_allocates_nothing() {
        let mut ctx = Context::new(ContextParams::new(1 << 16)).unwrap();
        let a = ctx.new_tensor_2d(DType::F32, 2, 3).unwrap();
        let b = ctx.new_tensor_2d(DType::F32, 3, 2).unwrap();
        let used = ctx.used();
        assert!(matches!(ctx.add(a, b), Err(Error::ShapeMismatch { .. })));
        assert_eq!(ctx.used(), used);
        assert_eq!(ctx.n_ops(), 0);
        assert_eq!(ctx.n_tensors(), 2);
    }
}
