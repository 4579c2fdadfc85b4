use std::fmt::{Debug, Display};

use crate::graph::{BinaryOpType, UnaryOpType};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    U32,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub const fn size_in_bytes(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub const fn is_signed(&self) -> bool {
        !matches!(self, Self::U8 | Self::U32)
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rust scalar types that can be stored in a tensor.
///
/// Integer arithmetic wraps, and integral square roots of negative values
/// are 0. Integer division by zero is rejected by the kernel before any
/// element is written; an overflowing quotient (`MIN / -1`) is 0.
pub trait WithDType: bytemuck::Pod + Debug + PartialEq + Send + Sync + 'static {
    const DTYPE: DType;
    const ZERO: Self;

    fn to_f64(self) -> f64;
    fn from_f64(x: f64) -> Self;

    fn binary(op: BinaryOpType, lhs: Self, rhs: Self) -> Self;

    /// Unary ops the type does not support (negating an unsigned value)
    /// are refused when the operation is created.
    fn unary(op: UnaryOpType, x: Self) -> Self;
}

macro_rules! dtype {
    ($rt:ident, $variant:ident, $zero:expr, float) => {
        impl WithDType for $rt {
            const DTYPE: DType = DType::$variant;
            const ZERO: $rt = $zero;

            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(x: f64) -> Self {
                x as $rt
            }

            fn binary(op: BinaryOpType, lhs: Self, rhs: Self) -> Self {
                match op {
                    BinaryOpType::Add => lhs + rhs,
                    BinaryOpType::Sub => lhs - rhs,
                    BinaryOpType::Mul => lhs * rhs,
                    BinaryOpType::Div => lhs / rhs,
                }
            }

            fn unary(op: UnaryOpType, x: Self) -> Self {
                match op {
                    UnaryOpType::Neg => -x,
                    UnaryOpType::Sqrt => <$rt>::sqrt(x),
                }
            }
        }
    };
    ($rt:ident, $variant:ident, $zero:expr, $neg:expr) => {
        impl WithDType for $rt {
            const DTYPE: DType = DType::$variant;
            const ZERO: $rt = $zero;

            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(x: f64) -> Self {
                x as $rt
            }

            fn binary(op: BinaryOpType, lhs: Self, rhs: Self) -> Self {
                match op {
                    BinaryOpType::Add => lhs.wrapping_add(rhs),
                    BinaryOpType::Sub => lhs.wrapping_sub(rhs),
                    BinaryOpType::Mul => lhs.wrapping_mul(rhs),
                    BinaryOpType::Div => lhs.checked_div(rhs).unwrap_or($zero),
                }
            }

            fn unary(op: UnaryOpType, x: Self) -> Self {
                match op {
                    UnaryOpType::Neg => $neg(x),
                    UnaryOpType::Sqrt => Self::from_f64(x.to_f64().sqrt()),
                }
            }
        }
    };
}

dtype!(u8, U8, 0u8, |x: u8| x);
dtype!(u32, U32, 0u32, |x: u32| x);
dtype!(i32, I32, 0i32, i32::wrapping_neg);
dtype!(i64, I64, 0i64, i64::wrapping_neg);
dtype!(f32, F32, 0f32, float);
dtype!(f64, F64, 0f64, float);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(DType::U8.size_in_bytes(), std::mem::size_of::<u8>());
        assert_eq!(DType::I32.size_in_bytes(), std::mem::size_of::<i32>());
        assert_eq!(DType::F64.size_in_bytes(), std::mem::size_of::<f64>());
        assert_eq!(<f32 as WithDType>::DTYPE, DType::F32);
    }

    #[test]
    fn integral_sqrt_of_negative_is_zero() {
        assert_eq!(i32::unary(UnaryOpType::Sqrt, -4), 0);
        assert_eq!(i64::unary(UnaryOpType::Sqrt, 16), 4);
    }

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(u8::binary(BinaryOpType::Add, 250, 10), 4);
        assert_eq!(i32::unary(UnaryOpType::Neg, i32::MIN), i32::MIN);
    }
}
