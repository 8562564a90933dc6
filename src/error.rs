//! Errors surfaced at the session boundary.

use std::sync::{MutexGuard, PoisonError};

use thiserror::Error;

use hostbridge_core::HostError;
use hostbridge_registry::RegistrationError;
use hostbridge_vm::LuaError;

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Failure reported to host code.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A script raised an error. `message` carries the script source
    /// location; `inner` is the host exception the error originated from.
    #[error("{message}")]
    Script {
        message: String,
        #[source]
        inner: Option<HostError>,
    },

    #[error("script stack overflow")]
    StackOverflow,

    /// An error escaped an unprotected call into the script engine.
    #[error("{0}")]
    Panic(String),

    #[error("adapter definition registry lock poisoned")]
    LockPoisoned,

    #[error("value of type {found} cannot be converted to {expected}")]
    Conversion { expected: String, found: &'static str },

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Host(#[from] HostError),
}

impl BridgeError {
    /// The host exception behind a script error, if any.
    pub fn host_cause(&self) -> Option<&HostError> {
        match self {
            BridgeError::Script { inner, .. } => inner.as_ref(),
            BridgeError::Host(err) => Some(err),
            _ => None,
        }
    }
}

impl<T> From<PoisonError<MutexGuard<'_, T>>> for BridgeError {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        BridgeError::LockPoisoned
    }
}

impl From<BridgeError> for LuaError {
    /// Failures inside native calls surface to script as runtime errors.
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::StackOverflow => LuaError::StackOverflow,
            other => LuaError::runtime(other.to_string()),
        }
    }
}

impl From<BridgeError> for HostError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Host(err) => err,
            BridgeError::Script { message, inner } => HostError::script(message, inner),
            conversion @ BridgeError::Conversion { .. } => HostError::invalid_cast(conversion.to_string()),
            other => HostError::exception(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn script_error_exposes_cause() {
        let err = BridgeError::Script {
            message: "main: boom".into(),
            inner: Some(HostError::argument("bad")),
        };
        assert_eq!(err.to_string(), "main: boom");
        assert_eq!(err.host_cause().map(HostError::message), Some("bad".to_string()));
    }

    #[test]
    fn poisoned_lock_converts() {
        let lock = Mutex::new(0);
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.lock().unwrap();
            panic!("poison");
        });
        let err: BridgeError = lock.lock().unwrap_err().into();
        assert!(matches!(err, BridgeError::LockPoisoned));
    }

    #[test]
    fn overflow_stays_overflow_in_script() {
        let err: LuaError = BridgeError::StackOverflow.into();
        assert!(matches!(err, LuaError::StackOverflow));
    }
}
