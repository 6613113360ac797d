use thiserror::Error;

/// Errors raised by layers.
///
/// Layer methods return [`anyhow::Result`], these can be recovered with
/// [`downcast_ref()`](anyhow::Error::downcast_ref).
#[derive(Clone, Debug, Error, PartialEq, Eq, derive_more::IsVariant)]
pub enum LayerError {
    /// Axis count or dimension mismatch between blobs.
    #[error("{layer}: {message}")]
    Shape {
        /// The layer type.
        layer: &'static str,
        /// What was expected.
        message: String,
    },
    /// Wrong number of bottom or top blobs.
    #[error("{layer} takes {expected} {kind} blob(s), got {got}")]
    BlobCount {
        /// The layer type.
        layer: &'static str,
        /// "bottom" or "top".
        kind: &'static str,
        /// The accepted count, ie "2" or "2..=4".
        expected: String,
        /// The provided count.
        got: usize,
    },
    /// A gradient was requested for a bottom that cannot receive one.
    #[error("{layer} cannot propagate a gradient to bottom {index}")]
    UnsupportedPropagation {
        /// The layer type.
        layer: &'static str,
        /// The bottom index.
        index: usize,
    },
    /// The operation is not available.
    #[error("{layer}: {what} is not implemented")]
    NotImplemented {
        /// The layer type.
        layer: &'static str,
        /// The missing operation.
        what: &'static str,
    },
}

impl LayerError {
    pub(crate) fn shape(layer: &'static str, message: impl Into<String>) -> Self {
        Self::Shape {
            layer,
            message: message.into(),
        }
    }
}

/// Returns a [`LayerError::Shape`] from the enclosing function unless `$cond` holds.
macro_rules! ensure_shape {
    ($cond:expr, $layer:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::LayerError::shape($layer, format!($($arg)+)).into());
        }
    };
}
pub(crate) use ensure_shape;
