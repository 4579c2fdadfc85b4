use std::ops::{Add, Mul};

use crate::{
    ComputeParams, DType, Error, Kernel, Result, TensorMeta, TensorView, TensorViewMut, WithDType,
};

/// `a · bᵗ` over the last two dimensions, batched over any leading ones.
///
/// `a` is `[.., m, k]` and `b` is `[.., n, k]`; both operands are read row by
/// row so every output element is one contiguous dot product.
pub struct MulMat;

const NAME: &str = "mul_mat";

fn mismatch(lhs: &[usize], rhs: &[usize]) -> Error {
    Error::ShapeMismatch {
        op: NAME.to_string(),
        lhs: lhs.to_vec(),
        rhs: rhs.to_vec(),
    }
}

/// Output shape of `a · bᵗ`, or the mismatch that prevents it.
fn mul_mat_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len();
    if rank < 2 || b.len() != rank || a[..rank - 2] != b[..rank - 2] {
        return Err(mismatch(a, b));
    }
    let (m, k) = (a[rank - 2], a[rank - 1]);
    let (n, k_b) = (b[rank - 2], b[rank - 1]);
    if k != k_b {
        return Err(mismatch(a, b));
    }
    let mut shape = a[..rank - 2].to_vec();
    shape.extend([m, n]);
    Ok(shape)
}

fn dot<T>(a: &[T], b: &[T]) -> T
where
    T: WithDType + Add<Output = T> + Mul<Output = T>,
{
    a.iter()
        .zip(b)
        .fold(T::ZERO, |acc, (&x, &y)| acc + x * y)
}

fn launch<T>(
    params: &ComputeParams<'_>,
    a: &TensorView<'_>,
    b: &TensorView<'_>,
    out: TensorViewMut<'_>,
) -> Result<()>
where
    T: WithDType + Add<Output = T> + Mul<Output = T>,
{
    let a_shape = a.shape();
    let rank = a_shape.len();
    let (m, k) = (a_shape[rank - 2], a_shape[rank - 1]);
    let n = b.shape()[rank - 2];

    let lhs = a.as_slice::<T>()?;
    let rhs = b.as_slice::<T>()?;
    let out = out.into_mut_slice::<T>()?;

    params.for_each_row_chunk(out, n, |first_row, chunk| {
        for (r, out_row) in chunk.chunks_exact_mut(n).enumerate() {
            // rows of the output are (batch, i) pairs flattened
            let row = first_row + r;
            let (batch, i) = (row / m, row % m);
            let a_row = &lhs[(batch * m + i) * k..][..k];
            for (j, o) in out_row.iter_mut().enumerate() {
                let b_row = &rhs[(batch * n + j) * k..][..k];
                *o = dot(a_row, b_row);
            }
        }
    });
    Ok(())
}

impl Kernel for MulMat {
    fn name(&self) -> &str {
        NAME
    }

    fn output_layout(&self, inputs: &[&TensorMeta]) -> Result<(DType, Vec<usize>)> {
        let [a, b] = inputs else {
            crate::bail!("{NAME} takes 2 inputs, got {}", inputs.len());
        };
        if a.dtype() != b.dtype() {
            return Err(Error::DTypeMismatch {
                op: NAME.to_string(),
                expected: a.dtype(),
                got: b.dtype(),
            });
        }
        if !a.dtype().is_float() {
            return Err(Error::UnsupportedDType {
                op: NAME.to_string(),
                dtype: a.dtype(),
            });
        }
        Ok((a.dtype(), mul_mat_shape(a.shape(), b.shape())?))
    }

    fn compute(
        &self,
        params: &ComputeParams<'_>,
        inputs: &[TensorView<'_>],
        output: TensorViewMut<'_>,
    ) -> Result<()> {
        let [a, b] = inputs else {
            crate::bail!("{NAME} takes 2 inputs, got {}", inputs.len());
        };
        let shape = mul_mat_shape(a.shape(), b.shape())?;
        if shape != output.shape() {
            return Err(mismatch(&shape, output.shape()));
        }
        match output.dtype() {
            DType::F32 => launch::<f32>(params, a, b, output),
            DType::F64 => launch::<f64>(params, a, b, output),
            dtype => Err(Error::UnsupportedDType {
                op: NAME.to_string(),
                dtype,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shape() {
        assert_eq!(mul_mat_shape(&[4, 2], &[3, 2]).unwrap(), vec![4, 3]);
        assert_eq!(mul_mat_shape(&[5, 4, 2], &[5, 3, 2]).unwrap(), vec![5, 4, 3]);
    }

    #[test]
    fn inner_dimension_must_match() {
        assert!(matches!(
            mul_mat_shape(&[4, 2], &[2, 3]),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            mul_mat_shape(&[2, 4, 2], &[3, 3, 2]),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            mul_mat_shape(&[2], &[2]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn mismatched_output_is_rejected_at_compute() {
        let metas = |shape: &[usize]| TensorMeta {
            id: crate::TensorId { ctx: 0, idx: 0 },
            dtype: DType::F32,
            shape: shape.to_vec(),
            strides: crate::tensor::contiguous_strides(shape),
            offset: 0,
            nbytes: shape.iter().product::<usize>() * 4,
            producer: None,
            view_src: None,
            name: None,
        };
        let (a, b, o) = (metas(&[4, 2]), metas(&[3, 3]), metas(&[4, 3]));
        let (a_buf, b_buf, mut o_buf) = (vec![0u8; 32], vec![0u8; 36], vec![0u8; 48]);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let params = ComputeParams::new(1, &pool);
        let res = MulMat.compute(
            &params,
            &[TensorView::new(&a, &a_buf), TensorView::new(&b, &b_buf)],
            TensorViewMut::new(&o, &mut o_buf),
        );
        assert!(matches!(res, Err(Error::ShapeMismatch { .. })));
    }
}
