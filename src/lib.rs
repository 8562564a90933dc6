//! Marshaling and dispatch between an embedded script engine and
//! registered host types.
//!
//! A [`Session`] binds a script state ([`hostbridge_vm`]) to a frozen
//! [`TypeRegistry`](hostbridge_registry::TypeRegistry). Inside it:
//!
//! - host objects cross into script as userdata with one wrapper per live
//!   object, and scalars cross by value
//! - script reads, writes and calls on those wrappers resolve against the
//!   registry, including overloads, `ref`/`out` parameters, variadics,
//!   indexers, events and nested types
//! - script tables and functions can stand in for host interfaces,
//!   subclasses, delegates and event handlers through adapters
//!
//! # Example
//!
//! ```ignore
//! use hostbridge::{Session, SessionOptions};
//! use hostbridge::hostbridge_registry::TypeRegistry;
//!
//! let mut registry = TypeRegistry::new();
//! register_my_types(&mut registry)?;
//! let session = Session::new(registry, SessionOptions::default())?;
//! session.import_type("Counter")?;
//! let results = session.call_global("main", &[], &[])?;
//! ```

mod check_type;
mod error;
mod member;
mod method;
mod proxy;
mod session;
mod translator;

pub use error::{BridgeError, BridgeResult};
pub use proxy::{AdapterDefinition, AdapterKind, ForwardedMethod, adapter_definition};
pub use session::{Session, SessionOptions};
pub use translator::DispatchStats;

pub use hostbridge_core;
pub use hostbridge_registry;
pub use hostbridge_vm;
