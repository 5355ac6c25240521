//! # Payload Families
//!
//! A family is the registered factory the worker is started with. It decides
//! what a remote object is, how one is built, which operations it supports and
//! what comes back when its contents are transferred out.
//!
//! The protocol itself never looks inside any of these types; it only moves
//! them across the boundary.

use crate::error::FamilyError;
use crate::progress::ProgressEmitter;

/// An operation invocable on a remote object.
///
/// Families usually implement this on an enum, one variant per operation tag
/// with its arguments inline.
pub trait Operation: Send + 'static {
    /// Stable name for logs and failure messages.
    fn tag(&self) -> &'static str;

    /// Declared upper bound for progress values, if the operation reports any.
    fn progress_max(&self) -> Option<u64> {
        None
    }
}

/// Factory and operation table for one kind of remote object.
pub trait Family: Send + 'static {
    /// Name used in logs and as the default worker thread name.
    const NAME: &'static str;

    /// Constructor arguments carried by a create request.
    type Args: Send + 'static;
    /// Operations carried by a generic request.
    type Op: Operation;
    /// Terminal result of a successful operation.
    type Output: Send + 'static;
    /// What a transfer hands back to the controller.
    type Contents: Send + 'static;
    /// The worker-owned instance.
    type Object: Send + 'static;

    fn create(&mut self, args: Self::Args) -> Result<Self::Object, FamilyError>;

    /// Applies `op` to `object`, reporting progress through `progress`.
    fn apply(
        &mut self,
        object: &mut Self::Object,
        op: Self::Op,
        progress: &mut ProgressEmitter<'_>,
    ) -> Result<Self::Output, FamilyError>;

    /// Consumes the object, moving its owned buffers into the contents.
    fn transfer(&mut self, object: Self::Object) -> Self::Contents;
}
