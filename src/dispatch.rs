//! Single-consumer message queue for listener callbacks.
//!
//! Transport tasks and the owner may post from anywhere; every message is
//! handled by one consumer task spawned on the runtime chosen at
//! construction. Immediate messages are handled in FIFO order. Delayed
//! messages sit in a deadline heap and are handled once due, interleaved
//! with immediate messages by fire time.
//!
//! ```text
//!  transport task ──┐
//!  owner ───────────┼──► mpsc ──► consumer task ──► MessageHandler
//!  post_delayed ────┘              (deadline heap)
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Receiver side of a [`DispatchQueue`].
#[async_trait]
pub trait MessageHandler<M>: Send + 'static {
    /// Handle one message. Messages are never handled concurrently.
    async fn handle_message(&mut self, message: M);
}

enum Envelope<M> {
    Now(M),
    At(Scheduled<M>),
    Stop,
}

struct Scheduled<M> {
    deadline: Instant,
    seq: u64,
    message: M,
}

// Ordered so that `BinaryHeap` (a max-heap) pops the earliest deadline first,
// breaking ties by post order.
impl<M> Ord for Scheduled<M> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<M> PartialOrd for Scheduled<M> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<M> PartialEq for Scheduled<M> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<M> Eq for Scheduled<M> {}

struct QueueState {
    destroyed: AtomicBool,
    next_seq: AtomicU64,
}

/// Handle for posting messages to a consumer task.
///
/// Cloning is cheap; all clones feed the same consumer.
pub struct DispatchQueue<M> {
    tx: UnboundedSender<Envelope<M>>,
    state: Arc<QueueState>,
}

impl<M> Clone for DispatchQueue<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Consumer side of a [`DispatchQueue`], not yet running.
///
/// Messages posted before [`Inbox::spawn`] are buffered and handled first.
pub struct Inbox<M> {
    rx: UnboundedReceiver<Envelope<M>>,
    state: Arc<QueueState>,
}

impl<M: Send + 'static> Inbox<M> {
    /// Start handling messages on `runtime`.
    pub fn spawn<H>(self, runtime: &Handle, handler: H)
    where
        H: MessageHandler<M>,
    {
        runtime.spawn(run_consumer(self.rx, self.state, handler));
    }
}

impl<M: Send + 'static> DispatchQueue<M> {
    /// Create a queue and its not-yet-running consumer side.
    pub fn new() -> (Self, Inbox<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState {
            destroyed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        });
        let queue = Self {
            tx,
            state: Arc::clone(&state),
        };
        (queue, Inbox { rx, state })
    }

    /// Enqueue a message for immediate handling.
    ///
    /// Returns `false` if the queue has been destroyed.
    pub fn post(&self, message: M) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.tx.send(Envelope::Now(message)).is_ok()
    }

    /// Enqueue a message to be handled after `delay`.
    ///
    /// Returns `false` if the queue has been destroyed.
    pub fn post_delayed(&self, message: M, delay: Duration) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let scheduled = Scheduled {
            deadline: Instant::now() + delay,
            seq: self.state.next_seq.fetch_add(1, Ordering::Relaxed),
            message,
        };
        self.tx.send(Envelope::At(scheduled)).is_ok()
    }

    /// Drop every pending message and stop the consumer.
    ///
    /// A message already being handled runs to completion; nothing is
    /// handled afterwards. Idempotent.
    pub fn destroy(&self) {
        if !self.state.destroyed.swap(true, Ordering::SeqCst) {
            // Wake the consumer so it notices promptly.
            let _ = self.tx.send(Envelope::Stop);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed.load(Ordering::SeqCst)
    }
}

async fn run_consumer<M, H>(
    mut rx: UnboundedReceiver<Envelope<M>>,
    state: Arc<QueueState>,
    mut handler: H,
) where
    M: Send + 'static,
    H: MessageHandler<M>,
{
    let mut timers: BinaryHeap<Scheduled<M>> = BinaryHeap::new();

    loop {
        if state.destroyed.load(Ordering::SeqCst) {
            break;
        }

        // Due timers go before anything still sitting in the channel.
        let next_deadline = timers.peek().map(|scheduled| scheduled.deadline);
        if let Some(deadline) = next_deadline {
            if deadline <= Instant::now() {
                if let Some(scheduled) = timers.pop() {
                    handler.handle_message(scheduled.message).await;
                }
                continue;
            }
        }

        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Some(Envelope::Now(message)) => {
                    if state.destroyed.load(Ordering::SeqCst) {
                        break;
                    }
                    handler.handle_message(message).await;
                }
                Some(Envelope::At(scheduled)) => timers.push(scheduled),
                Some(Envelope::Stop) | None => break,
            },
            _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                if next_deadline.is_some() => {}
        }
    }

    tracing::debug!(
        "Dispatch queue stopped with {} pending timed message(s) dropped",
        timers.len()
    );
}
