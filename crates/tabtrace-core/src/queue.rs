//! Visit queue
//!
//! A bounded, single-consumer FIFO of `Visit`s. Overflow is rejected at the
//! producer rather than dropped silently, and the queue does not persist
//! across restarts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::model::Visit;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is at capacity")]
    Full,
    #[error("queue is closed")]
    Closed,
}

/// Producer handle. Cloneable; every clone reports into the same depth
/// counter and `visits_total` tally.
#[derive(Clone)]
pub struct VisitQueueSender {
    tx: mpsc::Sender<Visit>,
    depth: Arc<AtomicU64>,
    visits_total: Arc<AtomicU64>,
}

impl VisitQueueSender {
    /// Enqueue `visit`, returning the queue depth after insertion.
    ///
    /// Never blocks: a full queue is rejected rather than awaited.
    pub fn try_enqueue(&self, visit: Visit) -> Result<u64, QueueError> {
        self.tx.try_send(visit).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        self.visits_total.fetch_add(1, Ordering::Relaxed);
        Ok(self.depth.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Acquire)
    }

    pub fn visits_total(&self) -> u64 {
        self.visits_total.load(Ordering::Relaxed)
    }
}

/// Consumer handle, owned by the consumer task.
pub struct VisitQueueReceiver {
    rx: mpsc::Receiver<Visit>,
    depth: Arc<AtomicU64>,
}

impl VisitQueueReceiver {
    pub async fn recv(&mut self) -> Option<Visit> {
        let visit = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(visit)
    }
}

/// Build a bounded queue of `capacity`, returning the producer/consumer
/// halves.
pub fn bounded(capacity: usize) -> (VisitQueueSender, VisitQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let depth = Arc::new(AtomicU64::new(0));
    let visits_total = Arc::new(AtomicU64::new(0));
    (
        VisitQueueSender {
            tx,
            depth: depth.clone(),
            visits_total,
        },
        VisitQueueReceiver { rx, depth },
    )
}
