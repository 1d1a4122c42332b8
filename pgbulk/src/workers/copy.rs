//! The worker task that streams copy data into the database.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info};

use crate::bulk_error;
use crate::concurrency::queue::CommandQueue;
use crate::connection::base::{CopyConnection, CopyConnector};
use crate::error::{BulkResult, ErrorKind};
use crate::types::command::{Command, CopyCommand};
use crate::types::target::CopyTarget;

/// Handle for monitoring the copy worker.
///
/// [`CopyWorkerHandle`] enables waiting for worker completion and retrieving the
/// final result. It properly handles panics that might occur within the worker
/// task.
#[derive(Debug)]
pub struct CopyWorkerHandle {
    handle: Option<JoinHandle<BulkResult<()>>>,
}

impl CopyWorkerHandle {
    /// Waits for the copy worker to terminate and returns its final result.
    pub async fn wait(mut self) -> BulkResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            bulk_error!(ErrorKind::WorkerPanic, "Copy worker panicked", source: err)
        })??;

        Ok(())
    }
}

/// Worker that owns the database connection and applies queued commands in order.
///
/// [`CopyWorker`] is the single consumer of the command queue. It connects at
/// startup, then drives a small protocol state machine: an open copy stream is
/// continued for consecutive commands addressing the same target, and closed
/// whenever the target changes or stale rows must be deleted first. The worker
/// never retries: the first failure is recorded on the queue and terminates the
/// pipeline.
#[derive(Debug)]
pub struct CopyWorker<C> {
    connector: C,
    queue: Arc<CommandQueue>,
}

impl<C> CopyWorker<C>
where
    C: CopyConnector,
{
    pub(crate) fn new(connector: C, queue: Arc<CommandQueue>) -> Self {
        Self { connector, queue }
    }

    /// Spawns the worker task and returns a handle for monitoring.
    ///
    /// The worker connects asynchronously; a connection failure is recorded on
    /// the queue and surfaces on the next producer-facing call.
    pub(crate) fn spawn(self) -> CopyWorkerHandle {
        info!("starting copy worker");

        let CopyWorker { connector, queue } = self;

        let span = tracing::info_span!("copy_worker");
        let handle = tokio::spawn(
            async move {
                let result = run_worker(connector, Arc::clone(&queue)).await;

                match &result {
                    Ok(()) => {
                        info!("copy worker completed successfully");
                        queue.close(None).await;
                    }
                    Err(err) => {
                        error!("copy worker failed: {err}");
                        queue.close(Some(err.clone())).await;
                    }
                }

                result
            }
            .instrument(span),
        );

        CopyWorkerHandle {
            handle: Some(handle),
        }
    }
}

/// Drains the queue until a Finish command or the first fatal error.
async fn run_worker<C: CopyConnector>(connector: C, queue: Arc<CommandQueue>) -> BulkResult<()> {
    let mut connection = connector.connect().await?;
    let mut inflight: Option<Arc<CopyTarget>> = None;

    loop {
        match queue.pop().await {
            Command::Copy(command) => {
                write_to_db(&mut connection, &mut inflight, command).await?;
            }
            Command::Sync(barrier) => {
                debug!("sync point reached, fulfilling barrier");
                barrier.notify();
            }
            Command::Finish => break,
        }
    }

    finish_copy(&mut connection, &mut inflight).await?;
    connection.disconnect().await;

    Ok(())
}

/// Applies one copy command: stale-row deletion first, then the row buffer.
///
/// Deletions force any open stream closed, since the protocol does not allow
/// other statements while a copy is in progress, and they always run before the
/// command's buffer is written: the buffer may contain replacements for the very
/// rows being deleted.
async fn write_to_db<C: CopyConnection>(
    connection: &mut C,
    inflight: &mut Option<Arc<CopyTarget>>,
    mut command: CopyCommand,
) -> BulkResult<()> {
    let needs_delete = command.deletions.has_data();
    let target_changed = inflight
        .as_ref()
        .is_some_and(|target| !target.same_copy_target(&command.target));

    if needs_delete || target_changed {
        finish_copy(connection, inflight).await?;
    }

    if needs_delete {
        command.deletions.flush(&command.target, connection).await?;
    }

    if inflight.is_none() {
        debug!(table = %command.target.name, "beginning copy stream");
        connection.begin_copy(&command.target).await?;
        *inflight = Some(Arc::clone(&command.target));
    }

    connection.write_copy_data(command.buffer.freeze()).await
}

/// Ends the currently open copy stream, if any.
async fn finish_copy<C: CopyConnection>(
    connection: &mut C,
    inflight: &mut Option<Arc<CopyTarget>>,
) -> BulkResult<()> {
    if let Some(target) = inflight.take() {
        debug!(table = %target.name, "ending copy stream");
        connection.end_copy().await?;
    }

    Ok(())
}
