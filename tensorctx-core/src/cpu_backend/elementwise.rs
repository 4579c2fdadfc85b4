use crate::{
    graph::{BinaryOpType, UnaryOpType},
    ComputeParams, DType, Error, Kernel, Result, TensorMeta, TensorView, TensorViewMut, WithDType,
};

/// Call `$f::<T>($args)` with `T` matching the runtime dtype.
macro_rules! dispatch {
    ($dtype:expr, $f:ident($($args:expr),* $(,)?)) => {
        match $dtype {
            DType::U8 => $f::<u8>($($args),*),
            DType::U32 => $f::<u32>($($args),*),
            DType::I32 => $f::<i32>($($args),*),
            DType::I64 => $f::<i64>($($args),*),
            DType::F32 => $f::<f32>($($args),*),
            DType::F64 => $f::<f64>($($args),*),
        }
    };
}

fn binary<T: WithDType>(
    op: BinaryOpType,
    params: &ComputeParams<'_>,
    l: &TensorView<'_>,
    r: &TensorView<'_>,
    out: TensorViewMut<'_>,
) -> Result<()> {
    let row_len = out.meta().row_len();
    let lhs = l.as_slice::<T>()?;
    let rhs = r.as_slice::<T>()?;
    if op == BinaryOpType::Div && !T::DTYPE.is_float() && rhs.contains(&T::ZERO) {
        return Err(Error::kernel(op.name(), "integer division by zero"));
    }
    let out = out.into_mut_slice::<T>()?;
    params.for_each_row_chunk(out, row_len, |first_row, chunk| {
        let start = first_row * row_len;
        let (lhs, rhs) = (&lhs[start..], &rhs[start..]);
        for ((o, &x), &y) in chunk.iter_mut().zip(lhs).zip(rhs) {
            *o = T::binary(op, x, y);
        }
    });
    Ok(())
}

impl Kernel for BinaryOpType {
    fn name(&self) -> &str {
        BinaryOpType::name(self)
    }

    fn output_layout(&self, inputs: &[&TensorMeta]) -> Result<(DType, Vec<usize>)> {
        let [l, r] = inputs else {
            crate::bail!("{} takes 2 inputs, got {}", self.name(), inputs.len());
        };
        if l.shape() != r.shape() {
            return Err(Error::ShapeMismatch {
                op: self.name().to_string(),
                lhs: l.shape().to_vec(),
                rhs: r.shape().to_vec(),
            });
        }
        if l.dtype() != r.dtype() {
            return Err(Error::DTypeMismatch {
                op: self.name().to_string(),
                expected: l.dtype(),
                got: r.dtype(),
            });
        }
        Ok((l.dtype(), l.shape().to_vec()))
    }

    fn compute(
        &self,
        params: &ComputeParams<'_>,
        inputs: &[TensorView<'_>],
        output: TensorViewMut<'_>,
    ) -> Result<()> {
        let [l, r] = inputs else {
            crate::bail!("{} takes 2 inputs, got {}", self.name(), inputs.len());
        };
        for input in [l, r] {
            if input.shape() != output.shape() {
                return Err(Error::ShapeMismatch {
                    op: self.name().to_string(),
                    lhs: input.shape().to_vec(),
                    rhs: output.shape().to_vec(),
                });
            }
        }
        dispatch!(output.dtype(), binary(*self, params, l, r, output))
    }
}

fn unary<T: WithDType>(
    op: UnaryOpType,
    params: &ComputeParams<'_>,
    v: &TensorView<'_>,
    out: TensorViewMut<'_>,
) -> Result<()> {
    let row_len = out.meta().row_len();
    let src = v.as_slice::<T>()?;
    let out = out.into_mut_slice::<T>()?;
    params.for_each_row_chunk(out, row_len, |first_row, chunk| {
        let src = &src[first_row * row_len..];
        for (o, &x) in chunk.iter_mut().zip(src) {
            *o = T::unary(op, x);
        }
    });
    Ok(())
}

impl Kernel for UnaryOpType {
    fn name(&self) -> &str {
        UnaryOpType::name(self)
    }

    fn output_layout(&self, inputs: &[&TensorMeta]) -> Result<(DType, Vec<usize>)> {
        let [v] = inputs else {
            crate::bail!("{} takes 1 input, got {}", self.name(), inputs.len());
        };
        if *self == UnaryOpType::Neg && !v.dtype().is_signed() {
            return Err(Error::UnsupportedDType {
                op: self.name().to_string(),
                dtype: v.dtype(),
            });
        }
        Ok((v.dtype(), v.shape().to_vec()))
    }

    fn compute(
        &self,
        params: &ComputeParams<'_>,
        inputs: &[TensorView<'_>],
        output: TensorViewMut<'_>,
    ) -> Result<()> {
        let [v] = inputs else {
            crate::bail!("{} takes 1 input, got {}", self.name(), inputs.len());
        };
        if v.shape() != output.shape() {
            return Err(Error::ShapeMismatch {
                op: self.name().to_string(),
                lhs: v.shape().to_vec(),
                rhs: output.shape().to_vec(),
            });
        }
        dispatch!(output.dtype(), unary(*self, params, v, output))
    }
}
