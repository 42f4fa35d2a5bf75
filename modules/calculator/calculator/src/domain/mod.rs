//! Domain layer for calculator module
//!
//! Contains the calculation logic and its error type.

pub mod error;
pub mod service;

pub use error::DomainError;
pub use service::{CallContext, Service};
