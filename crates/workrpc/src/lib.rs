//! # workrpc
//!
//! Typed request/reply RPC between a controller and the objects owned by a
//! worker thread. The controller holds identifiers; the worker holds the
//! objects. Every request gets exactly one terminal reply, optionally preceded
//! by monotonic progress.

pub mod config;
pub mod error;
pub mod family;
pub mod id;
pub mod ledger;
pub mod message;
pub mod progress;
pub mod registry;
pub mod service;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod tests;

pub use config::WorkerConfig;
pub use error::Error;
pub use error::Failure;
pub use error::FamilyError;
pub use error::Result;
pub use family::Family;
pub use family::Operation;
pub use id::CorrelationId;
pub use id::ObjectId;
pub use progress::ProgressEmitter;
pub use progress::ProgressSink;
pub use progress::ProgressStream;
pub use service::Service;
pub use worker::WorkerHandle;

/// Starts `family` on its own worker thread and wraps the controller end in a
/// [`Service`].
///
/// Must be called from inside a tokio runtime.
pub fn spawn<F: Family>(
    family: F,
    config: WorkerConfig,
) -> worker::Result<(Service<F>, WorkerHandle<F>)> {
    let name = config.name.clone();
    let (transport, handle) = worker::spawn(family, config)?;
    Ok((Service::new(name, transport), handle))
}
