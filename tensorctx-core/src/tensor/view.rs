use crate::{DType, Error, Result, TensorMeta, WithDType};

fn cast_error(meta: &TensorMeta, err: bytemuck::PodCastError) -> Error {
    Error::msg(format!(
        "cannot view {} bytes of {} as {}: {err:?}",
        meta.nbytes,
        meta.id,
        meta.dtype
    ))
}

fn check_dtype<T: WithDType>(meta: &TensorMeta) -> Result<()> {
    if T::DTYPE != meta.dtype {
        return Err(Error::DTypeMismatch {
            op: format!("typed access to {}", meta.id),
            expected: meta.dtype,
            got: T::DTYPE,
        });
    }
    Ok(())
}

/// Read-only view of a tensor's payload, handed to kernels.
#[derive(Clone, Copy)]
pub struct TensorView<'a> {
    meta: &'a TensorMeta,
    data: &'a [u8],
}

impl<'a> TensorView<'a> {
    pub(crate) fn new(meta: &'a TensorMeta, data: &'a [u8]) -> Self {
        debug_assert_eq!(meta.nbytes, data.len());
        Self { meta, data }
    }

    pub fn meta(&self) -> &'a TensorMeta {
        self.meta
    }

    pub fn shape(&self) -> &'a [usize] {
        &self.meta.shape
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn as_slice<T: WithDType>(&self) -> Result<&'a [T]> {
        check_dtype::<T>(self.meta)?;
        bytemuck::try_cast_slice(self.data).map_err(|e| cast_error(self.meta, e))
    }
}

/// Writable view of an operation's output payload.
pub struct TensorViewMut<'a> {
    meta: &'a TensorMeta,
    data: &'a mut [u8],
}

impl<'a> TensorViewMut<'a> {
    pub(crate) fn new(meta: &'a TensorMeta, data: &'a mut [u8]) -> Self {
        debug_assert_eq!(meta.nbytes, data.len());
        Self { meta, data }
    }

    pub fn meta(&self) -> &'a TensorMeta {
        self.meta
    }

    pub fn shape(&self) -> &'a [usize] {
        &self.meta.shape
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.data
    }

    pub fn as_mut_slice<T: WithDType>(&mut self) -> Result<&mut [T]> {
        check_dtype::<T>(self.meta)?;
        bytemuck::try_cast_slice_mut(self.data).map_err(|e| cast_error(self.meta, e))
    }

    /// Consume the view, keeping the full `'a` borrow of the payload.
    pub fn into_mut_slice<T: WithDType>(self) -> Result<&'a mut [T]> {
        check_dtype::<T>(self.meta)?;
        let meta = self.meta;
        bytemuck::try_cast_slice_mut(self.data).map_err(|e| cast_error(meta, e))
    }
}
