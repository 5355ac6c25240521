//! # Correlation Ledger
//!
//! The single authority for completing controller-side requests. Maps each
//! outstanding correlation id to the sender half of its completion and the
//! optional progress sink.
//!
//! ## Philosophy
//!
//! - **Reserve Before Send**: An entry exists before its envelope reaches the
//!   transport, so no reply can arrive ahead of its own bookkeeping.
//! - **Fail Fast on Violations**: A reply with no live entry (duplicate, or for an
//!   id never issued) is a protocol violation and is reported, never ignored.
//! - **Never Hang**: Closing the ledger rejects every pending entry with
//!   `TransportLost` and refuses new reservations.
//! - **Drops Are Counted**: Progress nobody listens to is discarded and counted.

use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::error::Result;
use crate::family::Family;
use crate::id::CorrelationId;
use crate::message::Outcome;
use crate::message::RequestKind;
use crate::progress::Delivery;
use crate::progress::Progress;
use crate::progress::ProgressSink;

/// Receiver half of a reserved request.
pub type Completion<F> = oneshot::Receiver<Result<Outcome<F>>>;

/// Replies that break the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("reply for {0} has no pending request")]
    UnknownCorrelation(CorrelationId),
    #[error("reply for {seq} carries a {found} outcome, expected {expected}")]
    KindMismatch {
        seq: CorrelationId,
        expected: RequestKind,
        found: RequestKind,
    },
}

struct Entry<F: Family> {
    kind: RequestKind,
    tx: oneshot::Sender<Result<Outcome<F>>>,
    sink: Option<ProgressSink>,
}

pub struct Ledger<F: Family> {
    pending: DashMap<CorrelationId, Entry<F>>,
    seq_gen: AtomicU64,
    closed: OnceLock<String>,
    dropped_progress: AtomicU64,
    orphaned: AtomicU64,
}

impl<F: Family> Ledger<F> {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            seq_gen: AtomicU64::new(1),
            closed: OnceLock::new(),
            dropped_progress: AtomicU64::new(0),
            orphaned: AtomicU64::new(0),
        }
    }

    /// Allocates a fresh correlation id and registers a pending entry.
    pub fn reserve(
        &self,
        kind: RequestKind,
        sink: Option<ProgressSink>,
    ) -> Result<(CorrelationId, Completion<F>)> {
        if let Some(reason) = self.closed.get() {
            return Err(Error::TransportLost(reason.clone()));
        }

        let seq = CorrelationId(self.seq_gen.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, Entry { kind, tx, sink });

        // close() may have drained between the check above and the insert
        if let Some(reason) = self.closed.get() {
            self.pending.remove(&seq);
            return Err(Error::TransportLost(reason.clone()));
        }

        Ok((seq, rx))
    }

    /// Forwards a progress value to the request's sink, if anyone listens.
    ///
    /// Returns whether the value was queued or held for delivery.
    pub fn on_progress(&self, seq: CorrelationId, value: u64) -> bool {
        let delivery = match self.pending.get_mut(&seq) {
            Some(mut entry) => match &mut entry.sink {
                Some(sink) => sink.offer(Progress { seq, value }),
                None => Delivery::Closed,
            },
            None => Delivery::Closed,
        };

        match delivery {
            Delivery::Delivered => true,
            Delivery::Held { displaced: None } => true,
            Delivery::Held { displaced: Some(displaced) } => {
                tracing::warn!(%seq, displaced, value, "progress queue full, dropping older value");
                self.dropped_progress.fetch_add(1, Ordering::Relaxed);
                true
            }
            Delivery::Closed => {
                tracing::trace!(%seq, value, "no listener for progress, dropping value");
                self.dropped_progress.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Completes a request successfully.
    pub fn resolve(
        &self,
        seq: CorrelationId,
        outcome: Outcome<F>,
    ) -> std::result::Result<(), Violation> {
        let entry = self.take(seq)?;
        if outcome.kind() != entry.kind {
            let violation = Violation::KindMismatch {
                seq,
                expected: entry.kind,
                found: outcome.kind(),
            };
            self.settle(seq, entry, Err(Error::TransportLost(violation.to_string())));
            return Err(violation);
        }
        self.settle(seq, entry, Ok(outcome));
        Ok(())
    }

    /// Completes a request with an error.
    pub fn reject(&self, seq: CorrelationId, error: Error) -> std::result::Result<(), Violation> {
        let entry = self.take(seq)?;
        self.settle(seq, entry, Err(error));
        Ok(())
    }

    fn take(&self, seq: CorrelationId) -> std::result::Result<Entry<F>, Violation> {
        self.pending
            .remove(&seq)
            .map(|(_, entry)| entry)
            .ok_or(Violation::UnknownCorrelation(seq))
    }

    fn settle(&self, seq: CorrelationId, entry: Entry<F>, result: Result<Outcome<F>>) {
        let Entry { tx, sink, .. } = entry;
        // the stream must hold the latest value and be closed by the time the
        // caller sees the result
        if let Some(mut sink) = sink {
            if !sink.flush() {
                self.dropped_progress.fetch_add(1, Ordering::Relaxed);
            }
        }
        if tx.send(result).is_err() {
            tracing::debug!(%seq, "discarding reply for abandoned request");
            self.orphaned.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Detaches the progress sink of a request the caller stopped waiting for.
    ///
    /// The entry stays until its reply arrives so the reply is recognised as
    /// orphaned rather than as a violation.
    pub fn abandon(&self, seq: CorrelationId) {
        if let Some(mut entry) = self.pending.get_mut(&seq) {
            entry.sink = None;
        }
    }

    /// Forgets a request whose envelope never reached the transport.
    pub fn cancel(&self, seq: CorrelationId) {
        self.pending.remove(&seq);
    }

    /// Rejects every pending request with `TransportLost` and refuses new ones.
    ///
    /// The first reason given wins.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.closed.set(reason.into());
        let reason = self.closed.get().cloned().unwrap_or_default();

        let keys: Vec<CorrelationId> = self.pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, entry)) = self.pending.remove(&key) {
                self.settle(key, entry, Err(Error::TransportLost(reason.clone())));
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get().is_some()
    }

    pub fn closed_reason(&self) -> Option<&str> {
        self.closed.get().map(String::as_str)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Progress values discarded because nobody was listening or the queue was full.
    pub fn dropped_progress(&self) -> u64 {
        self.dropped_progress.load(Ordering::Relaxed)
    }

    /// Replies discarded because the caller had stopped waiting.
    pub fn orphaned_replies(&self) -> u64 {
        self.orphaned.load(Ordering::Relaxed)
    }
}

impl<F: Family> Default for Ledger<F> {
    fn default() -> Self {
        Self::new()
    }
}
