//! # Progress Streaming
//!
//! Progress crosses the boundary as ordinary messages on the worker's outbound
//! channel; what the caller holds is a bounded queue, not a callback.
//!
//! - [`channel`] gives the caller a [`ProgressSink`] to hand to a request and a
//!   [`ProgressStream`] to read from. The ledger owns the sink while the request
//!   is in flight and drops it right before the terminal reply completes, so a
//!   stream always ends once its request has resolved.
//! - [`ProgressEmitter`] is the worker-side primitive handed to family code. It
//!   enforces that values never go backwards and never exceed the operation's
//!   declared maximum.
//!
//! A reader that falls behind loses intermediate values, never the latest one,
//! so a value equal to the declared maximum always reaches the stream. A value
//! that arrives when nobody is listening is dropped and counted, never an error.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::FamilyError;
use crate::id::CorrelationId;

/// Default queue depth for [`channel`].
pub const DEFAULT_CAPACITY: usize = 1024;

/// One progress notification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub seq: CorrelationId,
    pub value: u64,
}

/// Creates a bounded progress queue holding up to `capacity` unread values.
/// A capacity of zero is raised to one.
pub fn channel(capacity: usize) -> (ProgressSink, ProgressStream) {
    // one extra slot stays reserved for the value flushed at resolution
    let (tx, rx) = mpsc::channel(capacity.max(1) + 1);
    (ProgressSink { tx, held: None }, ProgressStream { rx })
}

/// Result of offering a value to a sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The queue was full; the value is held until there is room or the
    /// request resolves. `displaced` is the older held value it replaced,
    /// which is dropped.
    Held { displaced: Option<u64> },
    /// The stream was dropped; the value was dropped.
    Closed,
}

/// Producer half of a progress queue. Passed into a request.
///
/// When the reader falls behind, intermediate values are dropped but the
/// latest one never is: it is held back and delivered by [`flush`](Self::flush)
/// into a slot reserved for it.
#[derive(Debug)]
pub struct ProgressSink {
    tx: mpsc::Sender<Progress>,
    held: Option<Progress>,
}

impl ProgressSink {
    /// Offers a value without waiting.
    pub fn offer(&mut self, progress: Progress) -> Delivery {
        if self.tx.is_closed() {
            self.held = None;
            return Delivery::Closed;
        }

        if let Some(held) = self.held {
            if self.has_room() && self.tx.try_send(held).is_ok() {
                self.held = None;
            }
        }
        if self.held.is_none() && self.has_room() {
            match self.tx.try_send(progress) {
                Ok(()) => return Delivery::Delivered,
                Err(TrySendError::Closed(_)) => return Delivery::Closed,
                Err(TrySendError::Full(_)) => {}
            }
        }

        let displaced = self.held.replace(progress).map(|p| p.value);
        Delivery::Held { displaced }
    }

    /// Delivers the held value, if any, into the reserved slot.
    ///
    /// Returns false only when a held value was lost because the stream is gone.
    pub fn flush(&mut self) -> bool {
        match self.held.take() {
            Some(held) => self.tx.try_send(held).is_ok(),
            None => true,
        }
    }

    /// The value waiting for room in the queue.
    pub fn held(&self) -> Option<u64> {
        self.held.map(|p| p.value)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    // the last free slot belongs to flush
    fn has_room(&self) -> bool {
        self.tx.capacity() > 1
    }
}

/// Consumer half of a progress queue.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::Receiver<Progress>,
}

impl ProgressStream {
    /// Waits for the next value. Returns `None` once the request has resolved
    /// and every queued value has been read.
    pub async fn next(&mut self) -> Option<Progress> {
        self.rx.recv().await
    }

    /// Returns the next queued value without waiting.
    pub fn try_next(&mut self) -> Option<Progress> {
        self.rx.try_recv().ok()
    }

    /// Takes every value already queued.
    pub fn drain(&mut self) -> Vec<u64> {
        let mut values = Vec::new();
        while let Some(progress) = self.try_next() {
            values.push(progress.value);
        }
        values
    }

    /// True once the sink is gone and nothing is left to read.
    pub fn is_finished(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }
}

/// Emission rules broken by family code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    #[error("progress went backwards from {previous} to {value}")]
    Regressed { previous: u64, value: u64 },
    #[error("progress {value} exceeds declared maximum {max}")]
    ExceedsMax { value: u64, max: u64 },
}

impl From<ProgressError> for FamilyError {
    fn from(e: ProgressError) -> Self {
        FamilyError(e.to_string())
    }
}

/// Worker-side emission primitive handed to [`Family::apply`](crate::family::Family::apply).
///
/// Validates every value whether or not anyone is listening, so family code
/// behaves the same inside and outside a worker.
pub struct ProgressEmitter<'a> {
    max: Option<u64>,
    last: Option<u64>,
    sink: Option<&'a mut dyn FnMut(u64)>,
}

impl<'a> ProgressEmitter<'a> {
    pub fn new(max: Option<u64>, sink: Option<&'a mut dyn FnMut(u64)>) -> Self {
        Self { max, last: None, sink }
    }

    /// An emitter that validates but forwards nowhere.
    pub fn detached(max: Option<u64>) -> Self {
        Self::new(max, None)
    }

    pub fn emit(&mut self, value: u64) -> Result<(), ProgressError> {
        if let Some(previous) = self.last {
            if value < previous {
                return Err(ProgressError::Regressed { previous, value });
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Err(ProgressError::ExceedsMax { value, max });
            }
        }

        self.last = Some(value);
        if let Some(sink) = self.sink.as_deref_mut() {
            sink(value);
        }
        Ok(())
    }

    /// The last accepted value.
    pub fn last(&self) -> Option<u64> {
        self.last
    }
}
