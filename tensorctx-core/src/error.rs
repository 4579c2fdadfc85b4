use std::{convert::Infallible, fmt::Display};

use crate::{graph::OpId, DType, TensorId};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The arena cannot fit the requested allocation. Nothing was allocated.
    #[error("arena out of memory: requested {requested} bytes, {available} of {capacity} bytes available")]
    OutOfMemory {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    /// Source data does not match the byte size of the destination tensor.
    #[error("size mismatch for {tensor}: tensor holds {expected} bytes, source has {got}")]
    SizeMismatch {
        tensor: TensorId,
        expected: usize,
        got: usize,
    },

    #[error("shape mismatch in {op}: lhs {lhs:?}, rhs {rhs:?}")]
    ShapeMismatch {
        op: String,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    #[error("invalid shape {shape:?}: {reason}")]
    InvalidShape {
        shape: Vec<usize>,
        reason: &'static str,
    },

    #[error("dtype mismatch in {op}: expected {expected}, got {got}")]
    DTypeMismatch {
        op: String,
        expected: DType,
        got: DType,
    },

    #[error("{op} does not support dtype {dtype}")]
    UnsupportedDType { op: String, dtype: DType },

    #[error("cycle detected while building graph at {tensor}")]
    CyclicGraph { tensor: TensorId },

    #[error("graph capacity of {size} entries exceeded")]
    GraphOverflow { size: usize },

    /// The handle was issued by another context, or never issued.
    #[error("unknown tensor {0}")]
    UnknownTensor(TensorId),

    #[error("unknown operation {0}")]
    UnknownOp(OpId),

    #[error("graph was reserved by another context")]
    ForeignGraph,

    #[error("invalid context parameters: {0}")]
    InvalidParams(String),

    /// Opaque failure reported by a kernel.
    #[error("kernel `{op}` failed: {source}")]
    Kernel {
        op: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Message: {0}")]
    Msg(String),

    #[error("{inner}\n{backtrace}")]
    WithBacktrace {
        inner: Box<Self>,
        backtrace: Box<std::backtrace::Backtrace>,
    },

    /// Arbitrary errors wrapping.
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),

    /// Arbitrary errors wrapping with context.
    #[error("{wrapped:?}\n{context:?}")]
    WrappedContext {
        wrapped: Box<dyn std::error::Error + Send + Sync>,
        context: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new error based on a printable error message.
    ///
    /// If the message implements `std::error::Error`, prefer using [`Error::wrap`] instead.
    pub fn msg<M: Display>(msg: M) -> Self {
        Self::Msg(msg.to_string()).bt()
    }

    pub fn wrap(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(err)).bt()
    }

    /// Wrap an opaque kernel failure, naming the operation it came from.
    pub fn kernel<E>(op: impl Into<String>, err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Kernel {
            op: op.into(),
            source: err.into(),
        }
    }

    pub fn bt(self) -> Self {
        let backtrace = std::backtrace::Backtrace::capture();
        match backtrace.status() {
            std::backtrace::BacktraceStatus::Disabled
            | std::backtrace::BacktraceStatus::Unsupported => self,
            _ => Self::WithBacktrace {
                inner: Box::new(self),
                backtrace: Box::new(backtrace),
            },
        }
    }
}

#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::Error::Msg(format!($msg).into()).bt())
    };
    ($err:expr $(,)?) => {
        return Err($crate::Error::Msg(format!($err).into()).bt())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($fmt, $($arg)*).into()).bt())
    };
}

pub(crate) mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for std::result::Result<T, E> where E: std::error::Error {}
    impl<T> Sealed for Option<T> {}
}

/// Attach more context to an error.
///
/// Inspired by [`anyhow::Context`].
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wrap the error value with additional context.
    fn context<C>(self, context: C) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static;
}

impl<T, E> ErrorContext<T, E> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
    {
        // Not using map_err to save 2 useless frames off the captured backtrace
        // in ext_context.
        match self {
            Ok(ok) => Ok(ok),
            Err(error) => Err(Error::WrappedContext {
                wrapped: Box::new(error),
                context: context.to_string(),
            }),
        }
    }
}

impl<T> ErrorContext<T, Infallible> for Option<T> {
    fn context<C>(self, context: C) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Some(ok) => Ok(ok),
            None => Err(Error::msg(context)),
        }
    }
}
