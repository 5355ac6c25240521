//! # Controller Service
//!
//! The client-visible façade over one worker. Builds envelopes, reserves ledger
//! slots, and turns terminal replies back into typed results.
//!
//! A background pump task owns the receiving side of the transport: it routes
//! progress to sinks and replies to pending requests, and when the transport
//! closes (or a protocol violation is seen) it closes the ledger so no request
//! waits forever.
//!
//! Specialize per family by wrapping a `Service<F>` rather than re-implementing
//! any of this.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::error::Result;
use crate::family::Family;
use crate::id::CorrelationId;
use crate::id::ObjectId;
use crate::ledger::Ledger;
use crate::message::Envelope;
use crate::message::Message;
use crate::message::Outcome;
use crate::message::Request;
use crate::message::RequestKind;
use crate::progress::ProgressSink;
use crate::transport::Transport;

/// Controller-side handle to the objects living in one worker.
///
/// Share it behind an `Arc` for concurrent use; every method takes `&self`.
pub struct Service<F: Family> {
    name: String,
    transport: Arc<dyn Transport<F>>,
    ledger: Arc<Ledger<F>>,
    retired: DashSet<ObjectId>,
    pump: JoinHandle<()>,
}

impl<F: Family> Service<F> {
    /// Wraps a transport and spawns the receive pump on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn new(name: impl Into<String>, transport: impl Transport<F>) -> Self {
        let name = name.into();
        let transport: Arc<dyn Transport<F>> = Arc::new(transport);
        let ledger = Arc::new(Ledger::new());
        let pump = tokio::spawn(pump(name.clone(), transport.clone(), ledger.clone()));

        Self {
            name,
            transport,
            ledger,
            retired: DashSet::new(),
            pump,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a new remote object and returns its identifier.
    pub async fn create(&self, args: F::Args) -> Result<ObjectId> {
        match self.request(Request::Create { args }, None).await? {
            Outcome::Created(id) => Ok(id),
            other => Err(unexpected(RequestKind::Create, other.kind())),
        }
    }

    /// Applies `op` to a remote object.
    ///
    /// With a sink, progress values for this request are queued on it in
    /// order before this future resolves. A reader that falls behind loses
    /// intermediate values but always receives the last one.
    pub async fn invoke(
        &self,
        id: ObjectId,
        op: F::Op,
        progress: Option<ProgressSink>,
    ) -> Result<F::Output> {
        self.ensure_live(id)?;
        let with_progress = progress.is_some();
        let request = Request::Generic { id, op, with_progress };

        match self.request(request, progress).await? {
            Outcome::Applied(output) => Ok(output),
            other => Err(unexpected(RequestKind::Generic, other.kind())),
        }
    }

    /// Moves the object's contents out of the worker, ending its lifetime.
    ///
    /// The identifier is retired as soon as this is called: any request on it
    /// made while the transfer is in flight fails with `UnknownIdentifier`.
    pub async fn transfer(&self, id: ObjectId) -> Result<F::Contents> {
        if !self.retired.insert(id) {
            return Err(Error::UnknownIdentifier(id));
        }
        let result = self.request(Request::Transfer { id }, None).await;
        // from here on the worker's registry answers for this id
        self.retired.remove(&id);

        match result? {
            Outcome::Transferred(contents) => Ok(contents),
            other => Err(unexpected(RequestKind::Transfer, other.kind())),
        }
    }

    /// Destroys a remote object. Deleting twice fails with `UnknownIdentifier`.
    pub async fn delete(&self, id: ObjectId) -> Result<()> {
        self.ensure_live(id)?;
        match self.request(Request::Delete { id }, None).await? {
            Outcome::Deleted => Ok(()),
            other => Err(unexpected(RequestKind::Delete, other.kind())),
        }
    }

    /// Requests still waiting for a terminal reply.
    pub fn pending(&self) -> usize {
        self.ledger.pending_len()
    }

    pub fn dropped_progress(&self) -> u64 {
        self.ledger.dropped_progress()
    }

    pub fn orphaned_replies(&self) -> u64 {
        self.ledger.orphaned_replies()
    }

    /// True once the transport is gone; every later request fails with `TransportLost`.
    pub fn is_closed(&self) -> bool {
        self.ledger.is_closed()
    }

    pub fn closed_reason(&self) -> Option<String> {
        self.ledger.closed_reason().map(str::to_string)
    }

    fn ensure_live(&self, id: ObjectId) -> Result<()> {
        if self.retired.contains(&id) {
            return Err(Error::UnknownIdentifier(id));
        }
        Ok(())
    }

    async fn request(&self, request: Request<F>, sink: Option<ProgressSink>) -> Result<Outcome<F>> {
        let kind = request.kind();
        let (seq, completion) = self.ledger.reserve(kind, sink)?;
        let mut guard = AbandonOnDrop {
            ledger: self.ledger.as_ref(),
            seq,
            armed: true,
        };

        tracing::trace!(service = %self.name, %seq, %kind, "sending request");
        if let Err(e) = self.transport.send(Envelope { seq, request }).await {
            guard.armed = false;
            self.ledger.cancel(seq);
            return Err(Error::TransportLost(e.to_string()));
        }

        let result = match completion.await {
            Ok(result) => result,
            Err(_) => Err(Error::TransportLost("request dropped by ledger".into())),
        };
        guard.armed = false;
        result
    }
}

impl<F: Family> Drop for Service<F> {
    fn drop(&mut self) {
        self.pump.abort();
        self.ledger.close("service dropped");
    }
}

/// Detaches a request's progress sink if its future is dropped mid-flight.
struct AbandonOnDrop<'a, F: Family> {
    ledger: &'a Ledger<F>,
    seq: CorrelationId,
    armed: bool,
}

impl<F: Family> Drop for AbandonOnDrop<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(seq = %self.seq, "request abandoned before its reply");
            self.ledger.abandon(self.seq);
        }
    }
}

fn unexpected(expected: RequestKind, found: RequestKind) -> Error {
    Error::TransportLost(format!("protocol violation: expected {expected} reply, got {found}"))
}

/// Demultiplexes worker messages into the ledger until the transport closes.
async fn pump<F: Family>(name: String, transport: Arc<dyn Transport<F>>, ledger: Arc<Ledger<F>>) {
    let reason = loop {
        match transport.recv().await {
            Ok(Some(Message::Progress { seq, value })) => {
                ledger.on_progress(seq, value);
            }
            Ok(Some(Message::Reply { seq, status })) => {
                let settled = match status {
                    Ok(outcome) => ledger.resolve(seq, outcome),
                    Err(failure) => ledger.reject(seq, failure.into()),
                };
                if let Err(violation) = settled {
                    tracing::error!(service = %name, %violation, "protocol violation, closing");
                    break format!("protocol violation: {violation}");
                }
            }
            Ok(None) => break "worker channel closed".to_string(),
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "transport error in pump");
                break e.to_string();
            }
        }
    };

    tracing::debug!(service = %name, pending = ledger.pending_len(), %reason, "pump stopped");
    ledger.close(reason);
}
