use std::{fmt::Display, sync::Arc};

use petgraph::Graph as PetGraph;
use petgraph::{
    dot::{Config, Dot},
    graph::NodeIndex,
};

use crate::{cpu_backend::MulMat, Context, Error, Kernel, Result, TensorId, TensorMeta};

/// Handle to an operation owned by a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId {
    pub(crate) ctx: usize,
    pub(crate) idx: usize,
}

impl OpId {
    pub fn index(&self) -> usize {
        self.idx
    }
}

impl Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op#{}", self.idx)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum BinaryOpType {
    Add,
    Div,
    Sub,
    Mul,
}

impl BinaryOpType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Div => "div",
            Self::Sub => "sub",
            Self::Mul => "mul",
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum UnaryOpType {
    Neg,
    Sqrt,
}

impl UnaryOpType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Neg => "neg",
            Self::Sqrt => "sqrt",
        }
    }
}

/// What an operation computes.
#[derive(Clone)]
pub enum OpKind {
    /// `a · bᵗ` over the last two dimensions.
    MulMat,
    Binary(BinaryOpType),
    Unary(UnaryOpType),
    Custom(Arc<dyn Kernel>),
}

impl OpKind {
    pub fn name(&self) -> &str {
        match self {
            Self::MulMat => "mul_mat",
            Self::Binary(op) => op.name(),
            Self::Unary(op) => op.name(),
            Self::Custom(kernel) => kernel.name(),
        }
    }

    pub fn kernel(&self) -> &dyn Kernel {
        match self {
            Self::MulMat => &MulMat,
            Self::Binary(op) => op,
            Self::Unary(op) => op,
            Self::Custom(kernel) => kernel.as_ref(),
        }
    }
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MulMat => write!(f, "MulMat"),
            Self::Binary(op) => write!(f, "Binary({op:?})"),
            Self::Unary(op) => write!(f, "Unary({op:?})"),
            Self::Custom(kernel) => write!(f, "Custom({})", kernel.name()),
        }
    }
}

/// One node of the computation: a kernel applied to inputs, producing
/// exactly one output tensor.
#[derive(Debug, Clone)]
pub struct OpNode {
    pub(crate) kind: OpKind,
    pub(crate) inputs: Vec<TensorId>,
    pub(crate) output: TensorId,
}

impl OpNode {
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

/// Default node capacity of a graph.
pub const DEFAULT_GRAPH_SIZE: usize = 2048;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

enum Visit {
    Enter(TensorId),
    Exit(TensorId),
}

/// A forward computation graph: operations in dependency order plus the
/// leaf tensors they read.
///
/// A graph is tied to the context that reserved it and is rejected by any
/// other.
#[derive(Debug, Clone)]
pub struct Graph {
    ctx: usize,
    size: usize,
    nodes: Vec<OpId>,
    leafs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    visited: Vec<bool>,
}

impl Graph {
    pub(crate) fn with_size(ctx: usize, size: usize) -> Self {
        Self {
            ctx,
            size,
            nodes: Vec::new(),
            leafs: Vec::new(),
            outputs: Vec::new(),
            visited: Vec::new(),
        }
    }

    pub(crate) fn check_owner(&self, ctx: &Context) -> Result<()> {
        if self.ctx != ctx.id {
            return Err(Error::ForeignGraph);
        }
        Ok(())
    }

    /// Operations in execution order.
    pub fn nodes(&self) -> &[OpId] {
        &self.nodes
    }

    pub fn leafs(&self) -> &[TensorId] {
        &self.leafs
    }

    /// Tensors passed to [`Graph::expand`], in request order.
    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add everything needed to compute `output` to this graph.
    ///
    /// Walks producer links depth-first and appends operations in
    /// post-order, so every operation comes after the operations producing
    /// its inputs. Tensors already in the graph are skipped, which keeps
    /// shared subgraphs to a single copy across calls.
    ///
    /// On error the graph is left exactly as it was before the call.
    pub fn expand(&mut self, ctx: &Context, output: TensorId) -> Result<()> {
        self.check_owner(ctx)?;
        ctx.meta(output)?;
        self.visited.resize(ctx.n_tensors(), false);
        let mut marks: Vec<Mark> = self
            .visited
            .iter()
            .map(|&done| if done { Mark::Done } else { Mark::Unvisited })
            .collect();

        // Collected apart from the graph and only committed once the walk
        // has succeeded.
        let mut done = Vec::new();
        let mut nodes = Vec::new();
        let mut leafs = Vec::new();

        let mut stack = vec![Visit::Enter(output)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => match marks[id.idx] {
                    Mark::Done => {}
                    Mark::InProgress => return Err(Error::CyclicGraph { tensor: id }),
                    Mark::Unvisited => {
                        marks[id.idx] = Mark::InProgress;
                        stack.push(Visit::Exit(id));
                        let deps = ctx.dependencies(id)?;
                        // Reversed so the first input is visited first.
                        for dep in deps.into_iter().rev() {
                            stack.push(Visit::Enter(dep));
                        }
                    }
                },
                Visit::Exit(id) => {
                    marks[id.idx] = Mark::Done;
                    done.push(id.idx);
                    let meta = ctx.meta(id)?;
                    if let Some(op) = meta.producer {
                        if self.nodes.len() + nodes.len() >= self.size {
                            return Err(Error::GraphOverflow { size: self.size });
                        }
                        nodes.push(op);
                    } else if meta.is_leaf() {
                        if self.leafs.len() + leafs.len() >= self.size {
                            return Err(Error::GraphOverflow { size: self.size });
                        }
                        leafs.push(id);
                    }
                }
            }
        }

        for idx in done {
            self.visited[idx] = true;
        }
        let n_new = nodes.len();
        self.nodes.extend(nodes);
        self.leafs.extend(leafs);
        self.outputs.push(output);

        tracing::debug!(
            "expanded graph from {output}: {n_new} new nodes, {} total, {} leafs",
            self.nodes.len(),
            self.leafs.len()
        );
        Ok(())
    }

    pub fn to_petgraph(&self, ctx: &Context) -> Result<PetGraph<String, ()>> {
        self.check_owner(ctx)?;
        let mut g = PetGraph::<String, ()>::new();
        // tensor index → node for every leaf and operation output in the graph
        let mut idx_map: Vec<Option<NodeIndex>> = vec![None; ctx.n_tensors()];

        let label = |meta: &TensorMeta| match meta.name() {
            Some(name) => format!("{name} {:?}", meta.shape()),
            None => format!("{} {:?}", meta.id(), meta.shape()),
        };

        for &leaf in &self.leafs {
            let meta = ctx.meta(leaf)?;
            idx_map[leaf.idx] = Some(g.add_node(format!("leaf {}", label(meta))));
        }
        for &op in &self.nodes {
            let node = ctx.op(op)?;
            let meta = ctx.meta(node.output)?;
            let dst = g.add_node(format!("{} -> {}", node.kind.name(), label(meta)));
            idx_map[node.output.idx] = Some(dst);
            for &input in &node.inputs {
                // views are drawn as edges from the tensor they alias
                let src = ctx.resolve_view(input)?;
                if let Some(src) = idx_map[src.idx] {
                    g.add_edge(src, dst, ());
                }
            }
        }

        Ok(g)
    }

    /// Produce a DOT format string of this graph.
    pub fn to_dot(&self, ctx: &Context) -> Result<String> {
        let g = self.to_petgraph(ctx)?;
        Ok(format!("{:?}", Dot::with_config(&g, &[Config::EdgeNoLabel])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextParams, DType};

    fn ctx() -> Context {
        Context::new(ContextParams::new(1 << 20)).unwrap()
    }

    #[test]
    fn shared_input_is_visited_once() {
        let mut ctx = ctx();
        let a = ctx.new_tensor_2d(DType::F32, 2, 2).unwrap();
        let b = ctx.add(a, a).unwrap();
        let c = ctx.mul(b, a).unwrap();
        let graph = ctx.build_forward(c).unwrap();
        assert_eq!(graph.leafs(), &[a]);
        assert_eq!(graph.len(), 2);
        let indices: Vec<usize> = graph.nodes().iter().map(OpId::index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn cycle_is_reported() {
        let mut ctx = ctx();
        let a = ctx.new_tensor_2d(DType::F32, 2, 2).unwrap();
        let b = ctx.add(a, a).unwrap();
        let c = ctx.add(b, a).unwrap();
        // Not reachable through the public API: make b depend on c.
        let b_op = ctx.meta(b).unwrap().producer().unwrap();
        ctx.ops[b_op.idx].inputs = vec![c, a];
        assert!(matches!(
            ctx.build_forward(c),
            Err(Error::CyclicGraph { .. })
        ));
    }

    #[test]
    fn overflow_is_reported() {
        let mut ctx = ctx();
        let a = ctx.new_tensor_1d(DType::F32, 4).unwrap();
        let b = ctx.neg(a).unwrap();
        let c = ctx.neg(b).unwrap();
        let mut graph = ctx.new_graph_custom(1).unwrap();
        assert!(matches!(
            graph.expand(&ctx, c),
            Err(Error::GraphOverflow { size: 1 })
        ));
    }

    #[test]
    fn failed_expand_leaves_graph_untouched() {
        let mut ctx = ctx();
        let a = ctx.new_tensor_1d(DType::F32, 4).unwrap();
        let b = ctx.neg(a).unwrap();
        let c = ctx.neg(b).unwrap();
        let mut graph = ctx.new_graph_custom(1).unwrap();
        assert!(graph.expand(&ctx, c).is_err());
        assert!(graph.is_empty());
        assert!(graph.leafs().is_empty());
        assert!(graph.outputs().is_empty());
        assert!(ctx.compute(&graph, 1).is_err());

        // nothing was marked visited, so a smaller request still fits
        graph.expand(&ctx, b).unwrap();
        assert_eq!(graph.nodes(), &[ctx.meta(b).unwrap().producer().unwrap()]);
        assert_eq!(graph.leafs(), &[a]);
        assert_eq!(ctx.compute(&graph, 1).unwrap(), b);
    }

    #[test]
    fn foreign_graph_is_rejected() {
        let mut other = ctx();
        let mut ctx = ctx();
        let a = ctx.new_tensor_1d(DType::F32, 4).unwrap();
        other.new_tensor_1d(DType::F32, 4).unwrap();
        let mut graph = other.new_graph().unwrap();
        assert!(matches!(graph.expand(&ctx, a), Err(Error::ForeignGraph)));
        assert!(matches!(graph.to_dot(&ctx), Err(Error::ForeignGraph)));
    }

    #[test]
    fn dot_lists_every_node() {
        let mut ctx = ctx();
        let a = ctx.new_tensor_2d(DType::F32, 2, 3).unwrap();
        ctx.set_name(a, "a").unwrap();
        let b = ctx.new_tensor_2d(DType::F32, 4, 3).unwrap();
        let c = ctx.mul_mat(a, b).unwrap();
        let graph = ctx.build_forward(c).unwrap();
        let g = graph.to_petgraph(&ctx).unwrap();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 2);
        let dot = graph.to_dot(&ctx).unwrap();
        assert!(dot.contains("mul_mat"));
        assert!(dot.contains("leaf a [2, 3]"));
    }
}
