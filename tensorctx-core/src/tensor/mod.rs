use std::fmt::Display;

use crate::{graph::OpId, DType, Error, Result};

mod view;

pub use view::{TensorView, TensorViewMut};

/// Maximum tensor rank.
pub const MAX_DIMS: usize = 4;

/// Handle to a tensor owned by a [`crate::Context`].
///
/// A handle is an index into its context's tensor table, stamped with the
/// id of the context that issued it. Any other context rejects it with
/// [`Error::UnknownTensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TensorId {
    pub(crate) ctx: usize,
    pub(crate) idx: usize,
}

impl TensorId {
    /// Position in allocation order within the owning context.
    pub fn index(&self) -> usize {
        self.idx
    }
}

impl Display for TensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tensor#{}", self.idx)
    }
}

/// Header of a tensor: its layout and where its payload lives in the arena.
#[derive(Debug, Clone)]
pub struct TensorMeta {
    pub(crate) id: TensorId,
    pub(crate) dtype: DType,
    pub(crate) shape: Vec<usize>,
    pub(crate) strides: Vec<usize>,
    pub(crate) offset: usize,
    pub(crate) nbytes: usize,
    pub(crate) producer: Option<OpId>,
    pub(crate) view_src: Option<TensorId>,
    pub(crate) name: Option<String>,
}

impl TensorMeta {
    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn n_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    /// Byte offset of the payload inside the arena buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The operation that computes this tensor, if any.
    pub fn producer(&self) -> Option<OpId> {
        self.producer
    }

    /// The tensor whose payload this one shares, if it is a view.
    pub fn view_src(&self) -> Option<TensorId> {
        self.view_src
    }

    /// A leaf is populated by the caller: it is neither computed nor a view.
    pub fn is_leaf(&self) -> bool {
        self.producer.is_none() && self.view_src.is_none()
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == contiguous_strides(&self.shape)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Size of the last dimension, the unit kernels partition work by.
    pub fn row_len(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    pub fn n_rows(&self) -> usize {
        self.n_elements() / self.row_len()
    }
}

/// Compute default (contiguous) strides for a tensor of given shape.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut acc = 1;
    // Iterate dims in reverse to accumulate products
    for dim in shape.iter().rev() {
        strides.push(acc);
        acc *= *dim;
    }
    strides.reverse();
    strides
}

/// Validate a shape and return its payload size in bytes.
pub(crate) fn checked_nbytes(dtype: DType, shape: &[usize]) -> Result<usize> {
    let invalid = |reason| Error::InvalidShape {
        shape: shape.to_vec(),
        reason,
    };
    if shape.is_empty() {
        return Err(invalid("a tensor needs at least one dimension"));
    }
    if shape.len() > MAX_DIMS {
        return Err(invalid("too many dimensions"));
    }
    if shape.contains(&0) {
        return Err(invalid("dimensions must be non-zero"));
    }
    shape
        .iter()
        .try_fold(dtype.size_in_bytes(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| invalid("byte size overflows usize"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        assert_eq!(contiguous_strides(&[4, 2]), vec![2, 1]);
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[7]), vec![1]);
    }

    #[test]
    fn nbytes_checks_shape() {
        assert_eq!(checked_nbytes(DType::F32, &[4, 2]).unwrap(), 32);
        assert!(matches!(
            checked_nbytes(DType::F32, &[]),
            Err(Error::InvalidShape { .. })
        ));
        assert!(matches!(
            checked_nbytes(DType::F32, &[1, 2, 3, 4, 5]),
            Err(Error::InvalidShape { .. })
        ));
        assert!(matches!(
            checked_nbytes(DType::U8, &[usize::MAX, 2]),
            Err(Error::InvalidShape { .. })
        ));
    }
}
