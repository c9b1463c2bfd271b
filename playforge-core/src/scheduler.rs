//! Build Scheduler
//!
//! Admission control over the pipeline: a fixed number of build slots, a
//! bounded FIFO wait queue behind them, and immediate rejection once the
//! queue is full. Slots are released when the build future finishes,
//! however it finishes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::order::BuildOrder;
use crate::pipeline::{BuildArtifact, PlayableBuilder};

pub struct BuildScheduler<B> {
    builder: Arc<B>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    max_queue: usize,
    waiting: AtomicUsize,
}

/// Releases a reserved queue place, including when the waiter is dropped.
struct QueuePlace<'a>(&'a AtomicUsize);

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<B: PlayableBuilder> BuildScheduler<B> {
    pub fn new(builder: Arc<B>, max_concurrent: usize, max_queue: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            builder,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_queue,
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Builds currently holding a slot.
    pub fn in_progress(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    /// Submissions waiting for a slot.
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Run `order` once a slot is free. Fails fast with
    /// [`BuildError::QueueFull`] when the wait queue is already at capacity.
    pub async fn try_submit(&self, order: BuildOrder) -> Result<BuildArtifact, BuildError> {
        let _permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
                let _place = QueuePlace(&self.waiting);
                if queued >= self.max_queue {
                    warn!(order_id = %order.id, queued, "Queue overflow, rejecting order");
                    return Err(BuildError::QueueFull { queued });
                }
                info!(order_id = %order.id, queued, "Queueing order");
                self.slots
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| BuildError::QueueFull { queued })?
            }
        };

        debug!(order_id = %order.id, in_progress = self.in_progress(), "Build slot acquired");
        self.builder.build(order).await
    }

    /// Like [`try_submit`](Self::try_submit), collapsing every failure to `None`.
    pub async fn submit(&self, order: BuildOrder) -> Option<PathBuf> {
        self.try_submit(order).await.ok().map(|artifact| artifact.path)
    }
}
