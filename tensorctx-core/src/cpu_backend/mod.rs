use crate::{
    error::ErrorContext, graph::OpId, ComputeParams, Context, Error, Graph, Result, TensorId,
    TensorView, TensorViewMut,
};

mod elementwise;
mod matmul;

pub use matmul::MulMat;

/// Upper bound on worker threads per compute call.
pub const MAX_THREADS: usize = 512;

/// One worker per logical CPU, capped at [`MAX_THREADS`].
pub fn default_n_threads() -> usize {
    num_cpus::get().clamp(1, MAX_THREADS)
}

/// Resolved execution settings for one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphPlan {
    n_threads: usize,
    n_nodes: usize,
}

impl GraphPlan {
    /// Requests of `n_threads <= 0` or above [`MAX_THREADS`] run on a single
    /// thread.
    pub fn new(graph: &Graph, n_threads: i32) -> Self {
        let n_threads = usize::try_from(n_threads)
            .ok()
            .filter(|n| (1..=MAX_THREADS).contains(n))
            .unwrap_or(1);
        Self {
            n_threads,
            n_nodes: graph.len(),
        }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }
}

impl Context {
    pub fn plan(&self, graph: &Graph, n_threads: i32) -> GraphPlan {
        GraphPlan::new(graph, n_threads)
    }

    /// Execute `graph` and return the tensor holding the result: the output
    /// of the last node, or the last requested output if the graph has no
    /// nodes. No data is copied; the result lives in the arena.
    pub fn compute(&mut self, graph: &Graph, n_threads: i32) -> Result<TensorId> {
        let plan = self.plan(graph, n_threads);
        self.compute_with_plan(graph, &plan)
    }

    /// Nodes run one at a time in graph order. Each node may fan out over the
    /// plan's worker pool, and all of its workers finish before the next node
    /// starts. The first failing node aborts the run; outputs of nodes that
    /// already ran stay valid.
    pub fn compute_with_plan(&mut self, graph: &Graph, plan: &GraphPlan) -> Result<TensorId> {
        graph.check_owner(self)?;
        let _span = tracing::debug_span!(
            "compute",
            nodes = graph.len(),
            n_threads = plan.n_threads
        )
        .entered();

        let result = match graph.nodes().last() {
            Some(&op) => self.op(op)?.output,
            None => *graph
                .outputs()
                .last()
                .context("cannot compute an empty graph")?,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(plan.n_threads)
            .thread_name(|i| format!("tensorctx-worker-{i}"))
            .build()
            .map_err(Error::wrap)?;
        let params = ComputeParams::new(plan.n_threads, &pool);

        for &op in graph.nodes() {
            self.compute_node(op, &params)?;
        }
        tracing::debug!("computed {} nodes, result in {result}", graph.len());
        Ok(result)
    }

    fn compute_node(&mut self, op: OpId, params: &ComputeParams<'_>) -> Result<()> {
        let Context {
            buffer,
            capacity,
            tensors,
            ops,
            ..
        } = self;
        let node = ops.get(op.idx).ok_or(Error::UnknownOp(op))?;
        let out_meta = tensors
            .get(node.output.idx)
            .ok_or(Error::UnknownTensor(node.output))?;
        tracing::trace!("{op}: {} -> {}", node.kind.name(), node.output);

        // Every input was allocated before the output, so splitting the
        // buffer at the output offset separates what is read from what is
        // written.
        let bytes = &mut bytemuck::cast_slice_mut::<u128, u8>(buffer)[..*capacity];
        let (before, after) = bytes.split_at_mut(out_meta.offset);
        let output = TensorViewMut::new(out_meta, &mut after[..out_meta.nbytes]);

        let mut inputs = Vec::with_capacity(node.inputs.len());
        for &id in &node.inputs {
            let meta = tensors.get(id.idx).ok_or(Error::UnknownTensor(id))?;
            let end = meta.offset + meta.nbytes;
            if end > before.len() {
                crate::bail!(
                    "{op} ({}) reads {id}, which overlaps its output {}",
                    node.kind.name(),
                    node.output
                );
            }
            inputs.push(TensorView::new(meta, &before[meta.offset..end]));
        }

        node.kind.kernel().compute(params, &inputs, output)
    }
}
