//! Bounded command queue shared between producers and the copy worker.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify, Semaphore};

use crate::bulk_error;
use crate::error::{BulkError, BulkResult, ErrorKind};
use crate::types::command::Command;

/// Maximum number of queued copy buffers.
///
/// In the usual case the database keeps up with the producers and the queue
/// holds at most one element. When the database is the bottleneck the queue is
/// permanently full, so a small capacity keeps memory usage bounded without
/// costing throughput.
pub const MAX_QUEUED_BUFFERS: usize = 10;

#[derive(Debug)]
enum QueueStatus {
    Open,
    /// The worker stopped; `None` after a clean shutdown, `Some` after a fatal error.
    Closed(Option<BulkError>),
}

#[derive(Debug)]
struct QueueState {
    commands: VecDeque<Command>,
    status: QueueStatus,
}

/// Capacity-weighted FIFO between N producers and the single copy worker.
///
/// Only [`Command::Copy`] entries count against capacity: buffered row data is
/// the scarce resource being bounded. Sync and Finish commands are always
/// deliverable, so a full queue can never deadlock a flush or shutdown, but they
/// still respect push ordering.
///
/// The queue also carries the pipeline's terminal status. Once the worker has
/// stopped, [`CommandQueue::push`] fails fast with the recorded error instead of
/// blocking against a consumer that will never drain.
#[derive(Debug)]
pub(crate) struct CommandQueue {
    state: Mutex<QueueState>,
    not_empty: Notify,
    copy_slots: Semaphore,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                commands: VecDeque::new(),
                status: QueueStatus::Open,
            }),
            not_empty: Notify::new(),
            copy_slots: Semaphore::new(MAX_QUEUED_BUFFERS),
        }
    }

    /// Appends a command, blocking while the queue is at copy capacity.
    pub async fn push(&self, command: Command) -> BulkResult<()> {
        if matches!(command, Command::Copy(_)) {
            match self.copy_slots.acquire().await {
                // The permit is restored when the worker pops the command.
                Ok(permit) => permit.forget(),
                Err(_) => return Err(self.closed_error().await),
            }
        }

        {
            let mut state = self.state.lock().await;
            if let QueueStatus::Closed(error) = &state.status {
                return Err(Self::stored_error(error));
            }
            state.commands.push_back(command);
        }

        self.not_empty.notify_one();

        Ok(())
    }

    /// Removes and returns the oldest command, waiting while the queue is empty.
    ///
    /// Only the worker calls this. Popping a copy command frees one capacity
    /// slot, which unblocks at most one producer waiting in [`CommandQueue::push`].
    pub async fn pop(&self) -> Command {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(command) = state.commands.pop_front() {
                    if matches!(command, Command::Copy(_)) {
                        self.copy_slots.add_permits(1);
                    }
                    return command;
                }
            }

            self.not_empty.notified().await;
        }
    }

    /// Marks the queue terminal and drops whatever is still queued.
    ///
    /// Dropping a queued Sync command wakes its waiter with a closed-channel
    /// error, and closing the capacity semaphore wakes producers blocked in
    /// [`CommandQueue::push`]. The status is set before the semaphore closes, so
    /// woken producers always observe it.
    pub async fn close(&self, error: Option<BulkError>) {
        let drained = {
            let mut state = self.state.lock().await;
            state.status = QueueStatus::Closed(error);
            std::mem::take(&mut state.commands)
        };
        drop(drained);

        self.copy_slots.close();
    }

    /// Returns the fatal error recorded at close time, if any.
    pub async fn error(&self) -> Option<BulkError> {
        let state = self.state.lock().await;
        match &state.status {
            QueueStatus::Closed(Some(error)) => Some(error.clone()),
            _ => None,
        }
    }

    async fn closed_error(&self) -> BulkError {
        let state = self.state.lock().await;
        match &state.status {
            QueueStatus::Closed(error) => Self::stored_error(error),
            QueueStatus::Open => {
                bulk_error!(ErrorKind::PipelineClosed, "Pipeline is shutting down")
            }
        }
    }

    fn stored_error(error: &Option<BulkError>) -> BulkError {
        match error {
            Some(error) => error.clone(),
            None => bulk_error!(ErrorKind::PipelineClosed, "Pipeline already finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::types::command::{CopyCommand, SyncBarrier};
    use crate::types::target::CopyTarget;

    fn copy_command() -> Command {
        let target = Arc::new(CopyTarget::new("nodes", "id"));
        Command::Copy(CopyCommand::new(target))
    }

    #[tokio::test]
    async fn commands_pop_in_push_order() {
        let queue = CommandQueue::new();

        queue.push(copy_command()).await.unwrap();
        let (barrier, _waiter) = SyncBarrier::new();
        queue.push(Command::Sync(barrier)).await.unwrap();
        queue.push(Command::Finish).await.unwrap();

        assert!(matches!(queue.pop().await, Command::Copy(_)));
        assert!(matches!(queue.pop().await, Command::Sync(_)));
        assert!(matches!(queue.pop().await, Command::Finish));
    }

    #[tokio::test]
    async fn copy_commands_block_at_capacity_but_control_commands_pass() {
        let queue = Arc::new(CommandQueue::new());

        for _ in 0..MAX_QUEUED_BUFFERS {
            queue.push(copy_command()).await.unwrap();
        }

        // The 11th copy buffer must not be accepted while nothing was drained.
        let blocked = timeout(Duration::from_millis(50), queue.push(copy_command())).await;
        assert!(blocked.is_err());

        // Sync and Finish are not subject to capacity.
        let (barrier, _waiter) = SyncBarrier::new();
        timeout(Duration::from_millis(50), queue.push(Command::Sync(barrier)))
            .await
            .expect("sync must not block on a full queue")
            .unwrap();
        timeout(Duration::from_millis(50), queue.push(Command::Finish))
            .await
            .expect("finish must not block on a full queue")
            .unwrap();

        // Draining one copy command frees exactly one slot.
        assert!(matches!(queue.pop().await, Command::Copy(_)));
        timeout(Duration::from_millis(50), queue.push(copy_command()))
            .await
            .expect("one slot must have been freed")
            .unwrap();
    }

    #[tokio::test]
    async fn close_wakes_blocked_producers_with_the_stored_error() {
        let queue = Arc::new(CommandQueue::new());

        for _ in 0..MAX_QUEUED_BUFFERS {
            queue.push(copy_command()).await.unwrap();
        }

        let blocked_queue = Arc::clone(&queue);
        let blocked = tokio::spawn(async move { blocked_queue.push(copy_command()).await });

        queue
            .close(Some(bulk_error!(
                ErrorKind::CopyFailed,
                "Failed to write copy data"
            )))
            .await;

        let result = blocked.await.unwrap();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::CopyFailed);
    }

    #[tokio::test]
    async fn push_after_clean_close_reports_pipeline_closed() {
        let queue = CommandQueue::new();
        queue.close(None).await;

        let result = queue.push(copy_command()).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::PipelineClosed);
    }
}
