use thiserror::Error;

/// Errors raised while registering host types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("type '{0}' is already registered")]
    DuplicateType(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("type '{0}' cannot be used as a base type")]
    InvalidBase(String),
}
