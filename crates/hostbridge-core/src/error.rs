//! Error types for host calls and value conversion.

use thiserror::Error;

// ============================================================================
// Conversion errors
// ============================================================================

/// Failure converting a [`HostValue`](crate::HostValue) into a Rust value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value {value} out of range for {target_type}")]
    IntegerOverflow {
        value: i128,
        target_type: &'static str,
    },

    #[error("null value where {expected} was expected")]
    NullValue { expected: &'static str },
}

// ============================================================================
// Host errors
// ============================================================================

/// Category of a host exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    General,
    Argument,
    NullReference,
    IndexOutOfRange,
    KeyNotFound,
    InvalidCast,
    /// Member exists but cannot be reached at this level of the hierarchy
    Inaccessible,
    /// Raised by a script function called from the host
    Script,
}

/// A host-side exception.
///
/// Native implementations return these; the dispatcher wraps them in
/// [`HostError::Invocation`] and consumers call [`HostError::base`] to get
/// back to the original cause.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("{message}")]
    Exception {
        kind: ExceptionKind,
        message: String,
        #[source]
        inner: Option<Box<HostError>>,
    },

    #[error("exception has been thrown by the target of an invocation")]
    Invocation(#[source] Box<HostError>),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl HostError {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        HostError::Exception {
            kind,
            message: message.into(),
            inner: None,
        }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::General, message)
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Argument, message)
    }

    pub fn null_reference(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::NullReference, message)
    }

    pub fn index_out_of_range(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::IndexOutOfRange, message)
    }

    pub fn key_not_found(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::KeyNotFound, message)
    }

    pub fn invalid_cast(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidCast, message)
    }

    pub fn inaccessible(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Inaccessible, message)
    }

    /// An error raised by script code, optionally caused by a host error.
    pub fn script(message: impl Into<String>, inner: Option<HostError>) -> Self {
        HostError::Exception {
            kind: ExceptionKind::Script,
            message: message.into(),
            inner: inner.map(Box::new),
        }
    }

    /// Wrap an error raised inside a native implementation.
    pub fn invocation(cause: HostError) -> Self {
        match cause {
            already @ HostError::Invocation(_) => already,
            other => HostError::Invocation(Box::new(other)),
        }
    }

    /// The original cause, with invocation wrappers removed.
    pub fn base(&self) -> &HostError {
        let mut current = self;
        while let HostError::Invocation(inner) = current {
            current = inner;
        }
        current
    }

    /// Owned variant of [`base`](Self::base).
    pub fn into_base(self) -> HostError {
        let mut current = self;
        while let HostError::Invocation(inner) = current {
            current = *inner;
        }
        current
    }

    pub fn kind(&self) -> ExceptionKind {
        match self.base() {
            HostError::Exception { kind, .. } => *kind,
            HostError::Conversion(_) => ExceptionKind::InvalidCast,
            HostError::Invocation(_) => ExceptionKind::General,
        }
    }

    /// Message of the original cause.
    pub fn message(&self) -> String {
        self.base().to_string()
    }

    /// Inner host error of a script error, if any.
    pub fn inner(&self) -> Option<&HostError> {
        match self.base() {
            HostError::Exception { inner, .. } => inner.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_unwraps_to_cause() {
        let err = HostError::invocation(HostError::key_not_found("key 'x' not found"));
        assert_eq!(err.to_string(), "exception has been thrown by the target of an invocation");
        assert_eq!(err.message(), "key 'x' not found");
        assert_eq!(err.kind(), ExceptionKind::KeyNotFound);
    }

    #[test]
    fn invocation_does_not_double_wrap() {
        let err = HostError::invocation(HostError::invocation(HostError::exception("x")));
        assert!(matches!(&err, HostError::Invocation(inner) if !matches!(**inner, HostError::Invocation(_))));
    }

    #[test]
    fn conversion_error_is_invalid_cast() {
        let err: HostError = ConversionError::NullValue { expected: "int" }.into();
        assert_eq!(err.kind(), ExceptionKind::InvalidCast);
    }

    #[test]
    fn script_error_carries_inner() {
        let err = HostError::script("chunk: boom", Some(HostError::argument("bad")));
        assert_eq!(err.kind(), ExceptionKind::Script);
        assert_eq!(err.inner().map(HostError::message), Some("bad".to_string()));
    }
}
