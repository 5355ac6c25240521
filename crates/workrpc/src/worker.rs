//! # Worker Context
//!
//! Runs a family's objects on a dedicated OS thread and answers envelopes one at
//! a time, in arrival order.
//!
//! ## Philosophy
//!
//! - **Nothing Escapes the Dispatcher**: Family errors and panics are caught at the
//!   dispatch boundary and turned into a [`Failure`]. A faulting operation never
//!   takes the worker down with every other live object in it.
//! - **Serial per Worker**: One envelope is handled at a time, so concurrent
//!   requests on the same identifier complete in the order they were sent.
//! - **Abort on Terminate**: Terminating skips whatever is still queued. The
//!   controller learns about it as a lost transport.

use std::any::Any;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::thread;

use thiserror::Error;

use crate::config::WorkerConfig;
use crate::error::Failure;
use crate::family::Family;
use crate::family::Operation;
use crate::id::CorrelationId;
use crate::id::ObjectId;
use crate::message::Envelope;
use crate::message::Message;
use crate::message::Outcome;
use crate::message::Request;
use crate::progress::ProgressEmitter;
use crate::registry::Registry;
use crate::transport;
use crate::transport::ChannelTransport;
use crate::transport::Terminator;
use crate::transport::WorkerPort;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a worker reports when it stops.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shutdown {
    /// Envelopes answered over the worker's lifetime.
    pub handled: u64,
    /// Objects still registered when the worker stopped; dropped with it.
    pub live_objects: usize,
}

/// Resolves envelopes against the worker's registry.
pub struct Dispatcher<F: Family> {
    name: String,
    family: F,
    registry: Registry<F::Object>,
    handled: u64,
}

impl<F: Family> Dispatcher<F> {
    pub fn new(name: impl Into<String>, family: F) -> Self {
        Self {
            name: name.into(),
            family,
            registry: Registry::new(),
            handled: 0,
        }
    }

    /// Handles envelopes until the port closes or is terminated.
    pub fn run(mut self, mut port: WorkerPort<F>) -> Shutdown {
        tracing::info!(worker = %self.name, family = F::NAME, "worker started");

        while let Some(envelope) = port.blocking_recv() {
            self.dispatch(envelope, &port);
        }

        let shutdown = Shutdown {
            handled: self.handled,
            live_objects: self.registry.len(),
        };
        tracing::info!(
            worker = %self.name,
            handled = shutdown.handled,
            live_objects = shutdown.live_objects,
            terminated = port.is_stopped(),
            "worker stopped"
        );
        shutdown
    }

    /// Answers one envelope with exactly one terminal reply.
    pub fn dispatch(&mut self, envelope: Envelope<F>, port: &WorkerPort<F>) {
        let Envelope { seq, request } = envelope;
        let kind = request.kind();

        let status = match request {
            Request::Create { args } => self.create(args),
            Request::Generic { id, op, with_progress } => {
                self.apply(seq, id, op, with_progress, port)
            }
            Request::Transfer { id } => self.transfer(id),
            Request::Delete { id } => self.delete(id),
        };
        self.handled += 1;

        if let Err(failure) = &status {
            tracing::debug!(worker = %self.name, %seq, %kind, %failure, "request failed");
        }
        if port.send(Message::Reply { seq, status }).is_err() {
            tracing::debug!(worker = %self.name, %seq, "controller gone, reply dropped");
        }
    }

    fn create(&mut self, args: F::Args) -> std::result::Result<Outcome<F>, Failure> {
        let family = &mut self.family;
        let object = match panic::catch_unwind(AssertUnwindSafe(|| family.create(args))) {
            Ok(Ok(object)) => object,
            Ok(Err(e)) => return Err(Failure::CreationFailed(e.to_string())),
            Err(payload) => {
                let reason = format!("constructor panicked: {}", panic_message(payload.as_ref()));
                tracing::warn!(worker = %self.name, %reason, "caught panic");
                return Err(Failure::CreationFailed(reason));
            }
        };

        let id = self.registry.insert(object);
        tracing::debug!(worker = %self.name, %id, "object created");
        Ok(Outcome::Created(id))
    }

    fn apply(
        &mut self,
        seq: CorrelationId,
        id: ObjectId,
        op: F::Op,
        with_progress: bool,
        port: &WorkerPort<F>,
    ) -> std::result::Result<Outcome<F>, Failure> {
        let object = self.registry.get_mut(id)?;
        let tag = op.tag();

        let mut forward = |value: u64| {
            let _ = port.send(Message::Progress { seq, value });
        };
        let sink: Option<&mut dyn FnMut(u64)> =
            if with_progress { Some(&mut forward) } else { None };
        let mut emitter = ProgressEmitter::new(op.progress_max(), sink);

        let family = &mut self.family;
        match panic::catch_unwind(AssertUnwindSafe(|| family.apply(object, op, &mut emitter))) {
            Ok(Ok(output)) => Ok(Outcome::Applied(output)),
            Ok(Err(e)) => Err(Failure::OperationFailed(format!("{tag}: {e}"))),
            Err(payload) => {
                let reason = format!("{tag} panicked: {}", panic_message(payload.as_ref()));
                tracing::warn!(worker = %self.name, %id, %reason, "caught panic");
                Err(Failure::OperationFailed(reason))
            }
        }
    }

    fn transfer(&mut self, id: ObjectId) -> std::result::Result<Outcome<F>, Failure> {
        let object = self.registry.remove(id)?;
        let family = &mut self.family;
        match panic::catch_unwind(AssertUnwindSafe(|| family.transfer(object))) {
            Ok(contents) => {
                tracing::debug!(worker = %self.name, %id, "object transferred out");
                Ok(Outcome::Transferred(contents))
            }
            Err(payload) => {
                let reason = format!("transfer panicked: {}", panic_message(payload.as_ref()));
                tracing::warn!(worker = %self.name, %id, %reason, "caught panic");
                Err(Failure::OperationFailed(reason))
            }
        }
    }

    fn delete(&mut self, id: ObjectId) -> std::result::Result<Outcome<F>, Failure> {
        self.registry.remove(id)?;
        tracing::debug!(worker = %self.name, %id, "object deleted");
        Ok(Outcome::Deleted)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Owner-side handle to a running worker thread.
///
/// Dropping the handle terminates the worker.
pub struct WorkerHandle<F: Family> {
    name: String,
    terminator: Terminator<F>,
    thread: Option<thread::JoinHandle<Shutdown>>,
}

impl<F: Family> WorkerHandle<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the worker without processing queued envelopes.
    pub fn terminate(&self) {
        tracing::debug!(worker = %self.name, "terminating worker");
        self.terminator.terminate();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Terminates the worker and blocks until its thread exits.
    ///
    /// Returns `None` if the worker thread panicked outside the dispatcher.
    pub fn shutdown(mut self) -> Option<Shutdown> {
        self.terminate();
        self.thread.take()?.join().ok()
    }
}

impl<F: Family> Drop for WorkerHandle<F> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.terminator.terminate();
        }
    }
}

/// Starts `family` on a new worker thread.
///
/// Returns the controller's end of the transport and the worker handle.
pub fn spawn<F: Family>(
    family: F,
    config: WorkerConfig,
) -> Result<(ChannelTransport<F>, WorkerHandle<F>)> {
    let (transport, port) = transport::pair();
    let terminator = port.terminator();
    let dispatcher = Dispatcher::new(config.name.clone(), family);

    let mut builder = thread::Builder::new().name(config.name.clone());
    if let Some(bytes) = config.stack_size {
        builder = builder.stack_size(bytes);
    }
    let thread = builder.spawn(move || dispatcher.run(port))?;

    Ok((
        transport,
        WorkerHandle {
            name: config.name,
            terminator,
            thread: Some(thread),
        },
    ))
}
