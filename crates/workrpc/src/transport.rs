//! # Transport Abstraction
//!
//! A minimal, async interface for moving protocol messages between the
//! controller and the worker.
//!
//! ## Philosophy
//!
//! - **Typed, Owned Values**: The transport moves whole envelopes, not bytes.
//!   Buffers inside them change owner instead of being copied.
//! - **Closed Is a Value**: `recv` returning `Ok(None)` is the lifecycle event the
//!   ledger relies on to fail outstanding requests.
//! - **FIFO per Direction**: Implementations must not reorder or duplicate
//!   messages.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::family::Family;
use crate::message::Envelope;
use crate::message::Message;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The other side is gone.
    #[error("channel closed")]
    Closed,
    /// Implementation-specific failure.
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The controller's end of the boundary.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport<F>>`).
#[async_trait::async_trait]
pub trait Transport<F: Family>: Send + Sync + 'static {
    /// Hands an envelope to the worker, moving its payload.
    async fn send(&self, envelope: Envelope<F>) -> Result<()>;

    /// Waits for the next worker message.
    ///
    /// # Invariants
    /// - Must return `Ok(None)` once the worker side is gone.
    /// - Must be called from a single task; messages are delivered in order.
    async fn recv(&self) -> Result<Option<Message<F>>>;
}

/// Worker-bound traffic. `Terminate` wakes a blocked worker after its stop flag
/// has been raised.
pub(crate) enum Command<F: Family> {
    Deliver(Envelope<F>),
    Terminate,
}

/// In-process controller end built on unbounded tokio channels.
pub struct ChannelTransport<F: Family> {
    tx: mpsc::UnboundedSender<Command<F>>,
    rx: Mutex<mpsc::UnboundedReceiver<Message<F>>>,
}

#[async_trait::async_trait]
impl<F: Family> Transport<F> for ChannelTransport<F> {
    async fn send(&self, envelope: Envelope<F>) -> Result<()> {
        self.tx
            .send(Command::Deliver(envelope))
            .map_err(|_| Error::Closed)
    }

    async fn recv(&self) -> Result<Option<Message<F>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// The worker's end of the boundary.
///
/// Dropping the port closes the controller's inbound stream.
pub struct WorkerPort<F: Family> {
    rx: mpsc::UnboundedReceiver<Command<F>>,
    tx: mpsc::UnboundedSender<Message<F>>,
    commands: mpsc::WeakUnboundedSender<Command<F>>,
    stop: Arc<AtomicBool>,
}

impl<F: Family> WorkerPort<F> {
    /// Blocks the current thread until the next envelope arrives.
    ///
    /// Returns `None` when the controller is gone or the port was terminated.
    /// Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Envelope<F>> {
        let command = self.rx.blocking_recv();
        self.admit(command)
    }

    /// Async variant of [`blocking_recv`](Self::blocking_recv), for driving the
    /// worker side by hand.
    pub async fn recv(&mut self) -> Option<Envelope<F>> {
        let command = self.rx.recv().await;
        self.admit(command)
    }

    fn admit(&self, command: Option<Command<F>>) -> Option<Envelope<F>> {
        if self.is_stopped() {
            return None;
        }
        match command? {
            Command::Deliver(envelope) => Some(envelope),
            Command::Terminate => None,
        }
    }

    pub fn send(&self, message: Message<F>) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::Closed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// A handle that can stop this port from another thread.
    ///
    /// Holds the command channel weakly, so it never keeps the port alive after
    /// the controller is gone.
    pub fn terminator(&self) -> Terminator<F> {
        Terminator {
            commands: self.commands.clone(),
            stop: self.stop.clone(),
        }
    }
}

/// Stops a [`WorkerPort`] without waiting for queued envelopes.
pub struct Terminator<F: Family> {
    commands: mpsc::WeakUnboundedSender<Command<F>>,
    stop: Arc<AtomicBool>,
}

impl<F: Family> Terminator<F> {
    /// Raises the stop flag and wakes the port if it is blocked.
    pub fn terminate(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Terminate);
        }
    }
}

/// Creates a connected controller/worker pair.
pub fn pair<F: Family>() -> (ChannelTransport<F>, WorkerPort<F>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();

    let port = WorkerPort {
        rx: command_rx,
        tx: message_tx,
        commands: command_tx.downgrade(),
        stop: Arc::new(AtomicBool::new(false)),
    };
    let transport = ChannelTransport {
        tx: command_tx,
        rx: Mutex::new(message_rx),
    };

    (transport, port)
}
