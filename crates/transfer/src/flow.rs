//! Credit-based stream protocol binding one publisher to one subscriber.
//!
//! Data flows publisher → subscriber as [`Signal`]s; demand flows back
//! through a [`Subscription`]. The publisher side may only emit a chunk
//! after consuming one unit of credit, so the number of delivered chunks
//! never exceeds the credit granted so far.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Chunk, TransferError};

/// Signals buffered between the publisher task and the subscriber.
///
/// Credit already bounds the number of chunks in flight; the channel only
/// needs room for a chunk while the terminal signal waits behind it.
const SIGNAL_CAPACITY: usize = 1;

/// One event delivered to a subscriber.
#[derive(Debug)]
pub enum Signal {
    Next(Chunk),
    Error(TransferError),
    Complete,
}

/// Future returned by the [`Subscriber`] callbacks.
pub type SignalFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Receiving end of a chunk stream.
///
/// Callbacks are invoked strictly in order and never concurrently. After
/// `on_error` or `on_complete` no further callbacks happen.
pub trait Subscriber: Send {
    /// Called once, before any other callback, with the demand handle.
    fn on_subscribe(&mut self, subscription: Subscription);

    fn on_next(&mut self, chunk: Chunk) -> SignalFuture<'_>;

    /// Called when the stream fails or is cancelled ([`TransferError::Cancelled`]).
    fn on_error(&mut self, error: TransferError) -> SignalFuture<'_>;

    fn on_complete(&mut self) -> SignalFuture<'_>;
}

struct Credit {
    permits: Semaphore,
    granted: AtomicU64,
    delivered: AtomicU64,
    terminated: AtomicBool,
    cancel: CancellationToken,
}

/// Handle used by a subscriber to request chunks and to cancel.
#[derive(Clone)]
pub struct Subscription {
    credit: Arc<Credit>,
}

impl Subscription {
    /// Grants the publisher permission to emit `n` more chunks.
    pub fn request(&self, n: u64) -> Result<(), TransferError> {
        if n == 0 {
            return Err(TransferError::InvalidState(
                "demand must be at least 1".into(),
            ));
        }
        if self.is_terminated() {
            return Err(TransferError::InvalidState(
                "stream already terminated".into(),
            ));
        }

        let headroom = Semaphore::MAX_PERMITS - self.credit.permits.available_permits();
        let permits = usize::try_from(n)
            .ok()
            .filter(|permits| *permits <= headroom)
            .ok_or_else(|| TransferError::InvalidState(format!("demand overflow: {n}")))?;

        self.credit.granted.fetch_add(n, Ordering::AcqRel);
        self.credit.permits.add_permits(permits);
        Ok(())
    }

    /// Withdraws from the stream. The publisher stops emitting and releases
    /// its resources; the subscriber receives [`TransferError::Cancelled`]
    /// unless the stream already terminated.
    pub fn cancel(&self) {
        if !self.credit.cancel.is_cancelled() {
            debug!("subscription cancelled");
            self.credit.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.credit.cancel.is_cancelled()
    }

    /// Returns `true` once the stream completed, failed or was cancelled.
    pub fn is_terminated(&self) -> bool {
        self.credit.terminated.load(Ordering::Acquire) || self.is_cancelled()
    }

    /// Total credit granted since subscription.
    pub fn granted(&self) -> u64 {
        self.credit.granted.load(Ordering::Acquire)
    }

    /// Total chunks emitted by the publisher so far.
    pub fn delivered(&self) -> u64 {
        self.credit.delivered.load(Ordering::Acquire)
    }

    /// Credit granted but not yet consumed by the publisher.
    pub fn outstanding(&self) -> u64 {
        self.credit.permits.available_permits() as u64
    }

    fn terminate(&self) {
        self.credit.terminated.store(true, Ordering::Release);
        self.credit.permits.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("granted", &self.granted())
            .field("delivered", &self.delivered())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Publisher half of a stream.
pub(crate) struct Emitter {
    tx: mpsc::Sender<Signal>,
    credit: Arc<Credit>,
}

impl Emitter {
    /// Waits for one unit of credit and consumes it.
    ///
    /// Returns `false` if the stream was cancelled or the subscriber is gone.
    pub(crate) async fn acquire(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.credit.cancel.cancelled() => false,
            _ = self.tx.closed() => false,
            permit = self.credit.permits.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
        }
    }

    /// Delivers a chunk. Must be preceded by a successful [`acquire`](Self::acquire).
    pub(crate) async fn next(&self, chunk: Chunk) -> bool {
        self.credit.delivered.fetch_add(1, Ordering::AcqRel);
        self.send(Signal::Next(chunk)).await
    }

    pub(crate) async fn complete(self) {
        self.send(Signal::Complete).await;
    }

    pub(crate) async fn error(self, error: TransferError) {
        self.send(Signal::Error(error)).await;
    }

    async fn send(&self, signal: Signal) -> bool {
        tokio::select! {
            biased;
            _ = self.credit.cancel.cancelled() => false,
            sent = self.tx.send(signal) => sent.is_ok(),
        }
    }
}

/// Creates the two halves of a stream.
///
/// `cancel` is observed by both halves; cancelling it has the same effect as
/// [`Subscription::cancel`].
pub(crate) fn channel(cancel: CancellationToken) -> (Emitter, Subscription, mpsc::Receiver<Signal>) {
    let (tx, rx) = mpsc::channel(SIGNAL_CAPACITY);
    let credit = Arc::new(Credit {
        permits: Semaphore::new(0),
        granted: AtomicU64::new(0),
        delivered: AtomicU64::new(0),
        terminated: AtomicBool::new(false),
        cancel,
    });
    let emitter = Emitter {
        tx,
        credit: Arc::clone(&credit),
    };
    (emitter, Subscription { credit }, rx)
}

/// A subscribed stream, ready to deliver signals to its subscriber.
pub struct Stream<S> {
    subscriber: S,
    subscription: Subscription,
    signals: mpsc::Receiver<Signal>,
}

impl<S: Subscriber> Stream<S> {
    pub(crate) fn new(
        mut subscriber: S,
        subscription: Subscription,
        signals: mpsc::Receiver<Signal>,
    ) -> Self {
        subscriber.on_subscribe(subscription.clone());
        Self {
            subscriber,
            subscription,
            signals,
        }
    }

    /// Returns a handle that can cancel the stream from outside.
    pub fn subscription(&self) -> Subscription {
        self.subscription.clone()
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    /// Delivers signals until the stream terminates, then returns the
    /// subscriber.
    ///
    /// Exactly one terminal callback is invoked. Cancellation is reported as
    /// [`TransferError::Cancelled`]; a publisher that stops without a terminal
    /// signal for any other reason (e.g. a panicked task) is reported as
    /// [`TransferError::InvalidState`].
    pub async fn run(self) -> S {
        let Self {
            mut subscriber,
            subscription,
            mut signals,
        } = self;
        let cancel = subscription.credit.cancel.clone();

        loop {
            let signal = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                signal = signals.recv() => signal,
            };

            match signal {
                Some(Signal::Next(chunk)) => subscriber.on_next(chunk).await,
                Some(Signal::Complete) => {
                    subscription.terminate();
                    subscriber.on_complete().await;
                    break;
                }
                Some(Signal::Error(error)) => {
                    subscription.terminate();
                    subscriber.on_error(error).await;
                    break;
                }
                None => {
                    let error = if cancel.is_cancelled() {
                        TransferError::Cancelled
                    } else {
                        TransferError::InvalidState(
                            "publisher stopped without a terminal signal".into(),
                        )
                    };
                    subscription.terminate();
                    subscriber.on_error(error).await;
                    break;
                }
            }
        }

        subscriber
    }
}
