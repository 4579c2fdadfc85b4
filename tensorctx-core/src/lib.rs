//! tensorctx is a small tensor runtime built around one fixed-capacity memory arena.
//!
//! Every tensor, view and graph is bump-allocated from a single [`Context`] whose size is fixed
//! up front, and everything is released together when the context is dropped. Operations record
//! their inputs and allocate their output immediately, but compute nothing until a graph is built
//! and executed.
//!
//! ## A quick guide
//! - Plan the arena with a [`CapacityPlanner`] and create a [`Context`] from it.
//! - Allocate leaf tensors with [`Context::new_tensor`] and fill them with [`Context::load`].
//! - Compose operations such as [`Context::mul_mat`]. Each one returns a [`TensorId`] for its
//!   output.
//! - Build the forward graph with [`Context::build_forward`], which orders operations so that
//!   every input is computed before it is used.
//! - Run it with [`Context::compute`], which may split each operation across worker threads,
//!   and read the result with [`Context::data`] or [`Context::to_vec2`].
//!
//! ## What can you do with it?
//! ```
//! use tensorctx_core::{CapacityPlanner, Context, ContextParams, DType};
//!
//! let mut plan = CapacityPlanner::new();
//! plan.tensor(DType::F32, &[4, 2])
//!     .tensor(DType::F32, &[3, 2])
//!     .tensor(DType::F32, &[4, 3])
//!     .graph();
//! let mut ctx = Context::new(ContextParams::from_plan(&plan)).unwrap();
//!
//! let a = ctx.new_tensor_2d(DType::F32, 4, 2).unwrap();
//! let b = ctx.new_tensor_2d(DType::F32, 3, 2).unwrap();
//! ctx.load(a, &[2f32, 8., 5., 1., 4., 2., 8., 6.]).unwrap();
//! ctx.load(b, &[10f32, 5., 9., 9., 5., 4.]).unwrap();
//!
//! // result = a * b^T
//! let result = ctx.mul_mat(a, b).unwrap();
//! let graph = ctx.build_forward(result).unwrap();
//! let out = ctx.compute(&graph, 4).unwrap();
//!
//! assert_eq!(
//!     ctx.to_vec2::<f32>(out).unwrap(),
//!     vec![
//!         vec![60., 90., 42.],
//!         vec![55., 54., 29.],
//!         vec![50., 54., 28.],
//!         vec![110., 138., 64.],
//!     ]
//! );
//! ctx.free();
//! ```

mod context;
mod cpu_backend;
mod dtype;
mod error;
mod graph;
mod kernel;
mod tensor;

pub use context::{
    graph_overhead, graph_overhead_custom, tensor_overhead, CapacityPlanner, Context,
    ContextParams, ARENA_ALIGN, CONTEXT_SLACK, GRAPH_HEADER_SIZE, TENSOR_HEADER_SIZE,
};
pub use cpu_backend::{default_n_threads, GraphPlan, MulMat, MAX_THREADS};
pub use dtype::{DType, WithDType};
pub use error::{Error, ErrorContext, Result};
pub use graph::{BinaryOpType, Graph, OpId, OpKind, OpNode, UnaryOpType, DEFAULT_GRAPH_SIZE};
pub use kernel::{ComputeParams, Kernel};
pub use tensor::{TensorId, TensorMeta, TensorView, TensorViewMut, MAX_DIMS};
