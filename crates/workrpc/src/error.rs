//! # Error Definitions
//!
//! Two layers, mirroring the two sides of the boundary:
//!
//! - [`Failure`] is what the worker puts in a terminal reply.
//! - [`Error`] is what a controller-side future rejects with. It adds
//!   `TransportLost`, which only the controller can observe.

use thiserror::Error;

use crate::id::ObjectId;

/// Failures reported by the worker inside a terminal reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// The family constructor rejected the arguments.
    #[error("creation failed: {0}")]
    CreationFailed(String),
    /// The request targets an object that is not registered.
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(ObjectId),
    /// The operation faulted inside the worker.
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

/// Every controller-side request rejects with exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("creation failed: {0}")]
    CreationFailed(String),
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(ObjectId),
    #[error("operation failed: {0}")]
    OperationFailed(String),
    /// The channel to the worker closed with the request outstanding.
    #[error("transport lost: {0}")]
    TransportLost(String),
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::CreationFailed(reason) => Self::CreationFailed(reason),
            Failure::UnknownIdentifier(id) => Self::UnknownIdentifier(id),
            Failure::OperationFailed(reason) => Self::OperationFailed(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by family code from constructors and operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FamilyError(pub String);

impl FamilyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
