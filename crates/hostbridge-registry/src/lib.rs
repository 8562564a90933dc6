//! Host type registry.
//!
//! [`TypeRegistry`] stores the immutable description of every host type the
//! bridge can marshal; [`ClassBuilder`] and [`InterfaceBuilder`] register
//! Rust types and interface shapes with typed closures.

mod builder;
mod error;
mod registry;

pub use builder::{ClassBuilder, InterfaceBuilder};
pub use error::RegistrationError;
pub use registry::{Member, MemberScope, TypeRegistry};
