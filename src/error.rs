// src/error.rs

//! Crate-wide error type
//!
//! Only preparation-stage problems surface here; failures inside resource
//! code are caught by the transaction and recorded in its metrics instead.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a transaction before (or instead of) evaluation
#[derive(Error, Debug)]
pub enum Error {
    /// The relationship graph is cyclic; nothing has been applied
    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// A declared relationship names a resource missing from the catalog
    #[error("{depender} depends on {target}, which is not in the catalog")]
    MissingDependency { depender: String, target: String },

    /// A resource with the same kind and name is already in the catalog
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    /// `evaluate` was called twice on the same transaction instance
    #[error("transaction has already been evaluated")]
    AlreadyEvaluated,
}
