use crate::types::TypeDescriptor;

pub type ColumnarResult<T> = Result<T, ColumnarError>;

#[derive(Debug, thiserror::Error)]
pub enum ColumnarError {
    #[error("{operation}: unsupported column type {type_desc}")]
    UnsupportedColumnType {
        operation: &'static str,
        type_desc: TypeDescriptor,
    },

    #[error("{operation}: invalid argument: {message}")]
    InvalidUserArgument {
        operation: &'static str,
        message: String,
    },

    /// An internal invariant was violated upstream of this call.
    ///
    /// The current operation is aborted; no partial output is produced.
    #[error("internal assertion failed: {0}")]
    AssertionFailure(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("string payload of {bytes} bytes does not fit 32-bit offsets")]
    OffsetOverflow { bytes: usize },

    #[cfg(feature = "arrow")]
    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl ColumnarError {
    /// Whether the error signals a pipeline bug rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AssertionFailure(_))
    }

    pub(crate) fn invalid_argument(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidUserArgument {
            operation,
            message: message.into(),
        }
    }
}

/// Check an internal invariant, logging and returning [`ColumnarError::AssertionFailure`] when it
/// does not hold.
pub(crate) fn internal_check(condition: bool, message: impl FnOnce() -> String) -> ColumnarResult<()> {
    if condition {
        return Ok(());
    }
    let message = message();
    log::error!("internal assertion failed: {message}");
    Err(ColumnarError::AssertionFailure(message))
}
