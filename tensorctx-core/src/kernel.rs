use rayon::prelude::*;

use crate::{DType, Result, TensorMeta, TensorView, TensorViewMut};

/// The numeric routine behind one operation kind.
///
/// The runtime treats kernels as opaque: it asks for the output layout when
/// the operation is created and calls [`Kernel::compute`] once per execution
/// with views over the input payloads and the pre-allocated output.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    /// Dtype and shape of the output for these inputs.
    ///
    /// Called once, when the operation is added to the context. Incompatible
    /// inputs should fail here with [`crate::Error::ShapeMismatch`].
    fn output_layout(&self, inputs: &[&TensorMeta]) -> Result<(DType, Vec<usize>)>;

    /// Fill `output` from `inputs`.
    ///
    /// Results must not depend on `params.n_threads()`.
    fn compute(
        &self,
        params: &ComputeParams<'_>,
        inputs: &[TensorView<'_>],
        output: TensorViewMut<'_>,
    ) -> Result<()>;
}

/// Per-node execution resources handed to a kernel.
pub struct ComputeParams<'a> {
    n_threads: usize,
    pool: &'a rayon::ThreadPool,
}

impl<'a> ComputeParams<'a> {
    pub(crate) fn new(n_threads: usize, pool: &'a rayon::ThreadPool) -> Self {
        Self { n_threads, pool }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Split `out` into at most `n_threads` chunks of whole rows and call
    /// `f(first_row, chunk)` for each chunk on the worker pool.
    ///
    /// Chunks are disjoint, and the call returns only once every chunk is
    /// written.
    pub fn for_each_row_chunk<T, F>(&self, out: &mut [T], row_len: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Send + Sync,
    {
        if out.is_empty() || row_len == 0 {
            return;
        }
        let n_rows = out.len() / row_len;
        if self.n_threads <= 1 || n_rows <= 1 {
            f(0, out);
            return;
        }
        let rows_per_chunk = n_rows.div_ceil(self.n_threads);
        self.pool.install(|| {
            out.par_chunks_mut(rows_per_chunk * row_len)
                .enumerate()
                .for_each(|(i, chunk)| f(i * rows_per_chunk, chunk));
        });
    }
}
