//! # Protocol Messages
//!
//! Defines the envelope the controller sends and the messages the worker sends
//! back.
//!
//! ## Invariants
//! - **Exhaustive**: every request kind is a variant of [`Request`]; the
//!   dispatcher matches on it without a fallback arm.
//! - **Owned payloads**: envelopes own their arguments, so buffers inside them
//!   are moved across the boundary, never shared.

use crate::error::Failure;
use crate::family::Family;
use crate::id::CorrelationId;
use crate::id::ObjectId;

/// Discriminant of a request, kept by the ledger to validate replies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Create,
    Generic,
    Transfer,
    Delete,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Generic => "generic",
            Self::Transfer => "transfer",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A request for the worker.
pub enum Request<F: Family> {
    /// Build a new remote object. The identifier is minted on success.
    Create { args: F::Args },
    /// Invoke an operation on an existing object.
    ///
    /// `with_progress` is set when the controller holds a progress sink for
    /// this request; the worker only sends progress messages when it is.
    Generic {
        id: ObjectId,
        op: F::Op,
        with_progress: bool,
    },
    /// Hand the object's contents back and end its worker-side lifetime.
    Transfer { id: ObjectId },
    /// Destroy the object without returning its contents.
    Delete { id: ObjectId },
}

impl<F: Family> Request<F> {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Create { .. } => RequestKind::Create,
            Self::Generic { .. } => RequestKind::Generic,
            Self::Transfer { .. } => RequestKind::Transfer,
            Self::Delete { .. } => RequestKind::Delete,
        }
    }
}

/// A request tagged with its correlation id.
pub struct Envelope<F: Family> {
    pub seq: CorrelationId,
    pub request: Request<F>,
}

/// Successful terminal result, one variant per request kind.
pub enum Outcome<F: Family> {
    Created(ObjectId),
    Applied(F::Output),
    Transferred(F::Contents),
    Deleted,
}

impl<F: Family> Outcome<F> {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Created(_) => RequestKind::Create,
            Self::Applied(_) => RequestKind::Generic,
            Self::Transferred(_) => RequestKind::Transfer,
            Self::Deleted => RequestKind::Delete,
        }
    }
}

/// A message from the worker to the controller.
pub enum Message<F: Family> {
    /// Intermediate progress for an in-flight generic request.
    Progress { seq: CorrelationId, value: u64 },
    /// The single terminal reply for a request.
    Reply {
        seq: CorrelationId,
        status: Result<Outcome<F>, Failure>,
    },
}
