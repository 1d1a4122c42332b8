//! Public facade of the bulk loading pipeline.

use std::sync::Arc;

use tracing::info;

use crate::bulk_error;
use crate::concurrency::queue::CommandQueue;
use crate::connection::base::CopyConnector;
use crate::error::{BulkError, BulkResult, ErrorKind};
use crate::types::command::{Command, SyncBarrier};
use crate::workers::copy::{CopyWorker, CopyWorkerHandle};

/// Streams prepared row data into the database off the producers' critical path.
///
/// [`CopyPipeline`] decouples data generation from transmission: any number of
/// producer tasks enqueue [`Command`]s while a single background worker owns the
/// database connection and applies them strictly in push order. Backpressure is
/// exerted through the bounded command queue
/// ([`crate::concurrency::queue::MAX_QUEUED_BUFFERS`] undrained copy buffers).
///
/// The pipeline runs to completion or to the first fatal error. There are no
/// retries: once the worker has failed, every producer-facing call returns the
/// recorded error instead of blocking.
#[derive(Debug)]
pub struct CopyPipeline {
    queue: Arc<CommandQueue>,
    worker: CopyWorkerHandle,
}

impl CopyPipeline {
    /// Creates the command queue and spawns the copy worker.
    ///
    /// The worker connects in the background; a connection failure surfaces on
    /// the next call to [`CopyPipeline::enqueue`], [`CopyPipeline::sync_and_wait`]
    /// or [`CopyPipeline::finish`].
    pub fn start<C: CopyConnector>(connector: C) -> Self {
        let queue = Arc::new(CommandQueue::new());
        let worker = CopyWorker::new(connector, Arc::clone(&queue)).spawn();

        Self { queue, worker }
    }

    /// Adds another command for the worker.
    ///
    /// Blocks while the queue is at copy capacity; Sync and Finish commands are
    /// accepted regardless of fullness.
    pub async fn enqueue(&self, command: Command) -> BulkResult<()> {
        self.queue.push(command).await
    }

    /// Sends a sync command and waits for its barrier.
    ///
    /// Returns only once every command enqueued before this call has been fully
    /// applied, or with the pipeline's fatal error.
    pub async fn sync_and_wait(&self) -> BulkResult<()> {
        let (barrier, waiter) = SyncBarrier::new();
        self.queue.push(Command::Sync(barrier)).await?;

        match waiter.await {
            Ok(()) => Ok(()),
            // The barrier was dropped because the worker stopped before
            // reaching it; surface the recorded error instead.
            Err(_) => Err(self.stored_error().await),
        }
    }

    /// Finishes the copy process.
    ///
    /// Only returns when all remaining queued data has been committed to the
    /// database and the worker has terminated. Call exactly once per pipeline.
    pub async fn finish(self) -> BulkResult<()> {
        info!("finishing copy pipeline");

        let push_result = self.queue.push(Command::Finish).await;
        let worker_result = self.worker.wait().await;

        // A failed worker takes precedence: the push only fails once the worker
        // has already recorded its error.
        worker_result.and(push_result)
    }

    async fn stored_error(&self) -> BulkError {
        self.queue.error().await.unwrap_or_else(|| {
            bulk_error!(
                ErrorKind::WorkerPanic,
                "Copy worker terminated without recording an error"
            )
        })
    }
}
