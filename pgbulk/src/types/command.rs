//! Commands executed by the copy worker.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::oneshot;

use crate::connection::base::CopyConnection;
use crate::error::BulkResult;
use crate::types::target::CopyTarget;

/// Identifier of a row scheduled for deletion.
pub type ObjectId = i64;

/// Soft cap for a single buffer with COPY data.
///
/// This is a trade-off between memory usage and sending large chunks to speed up
/// processing. Producers should flush a command once [`CopyCommand::is_full`]
/// reports true; appends past the cap are still accepted.
pub const MAX_COPY_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Number of pending ids after which a delete batch reports itself full.
///
/// There is a trade-off here between sending as few DELETE statements as possible
/// and keeping the size of the id vector manageable. The threshold is advisory:
/// inserts are never rejected.
pub const MAX_DELETE_IDS: usize = 1_000_000;

/// Batch of row ids to delete before new data for the same target is applied.
///
/// Each [`CopyCommand`] owns exactly one batch. The worker flushes it as a single
/// batched DELETE statement right before the command's row buffer is streamed.
#[derive(Debug, Default)]
pub struct DeleteBatch {
    ids: Vec<ObjectId>,
}

impl DeleteBatch {
    /// Schedules another id for deletion.
    pub fn add(&mut self, id: ObjectId) {
        self.ids.push(id);
    }

    /// Returns true iff at least one id is pending.
    pub fn has_data(&self) -> bool {
        !self.ids.is_empty()
    }

    /// Returns true once the pending count exceeds [`MAX_DELETE_IDS`].
    pub fn is_full(&self) -> bool {
        self.ids.len() > MAX_DELETE_IDS
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Deletes all pending ids from the target's table and clears the batch.
    ///
    /// Callers guard on [`DeleteBatch::has_data`]; flushing an empty batch is a
    /// no-op. The batch is only cleared when the statement succeeds.
    pub(crate) async fn flush<C: CopyConnection>(
        &mut self,
        target: &CopyTarget,
        connection: &mut C,
    ) -> BulkResult<()> {
        if self.ids.is_empty() {
            return Ok(());
        }

        connection
            .delete_rows(&target.name, &target.id_column, &self.ids)
            .await?;
        self.ids.clear();

        Ok(())
    }
}

/// A unit of copy work: one pre-serialized buffer of rows for one target, plus
/// the ids that must be deleted before those rows are written.
///
/// Producers fill the buffer with data already laid out in the COPY wire format;
/// the pipeline treats it as opaque bytes. The buffer reserves
/// [`MAX_COPY_BUFFER_SIZE`] up front so appends do not reallocate in the common
/// case.
#[derive(Debug)]
pub struct CopyCommand {
    pub(crate) target: Arc<CopyTarget>,
    pub(crate) buffer: BytesMut,
    pub(crate) deletions: DeleteBatch,
}

impl CopyCommand {
    /// Creates an empty command for the given target.
    pub fn new(target: Arc<CopyTarget>) -> Self {
        Self {
            target,
            buffer: BytesMut::with_capacity(MAX_COPY_BUFFER_SIZE),
            deletions: DeleteBatch::default(),
        }
    }

    /// Returns the target this command will be applied to.
    pub fn target(&self) -> &Arc<CopyTarget> {
        &self.target
    }

    /// Appends pre-serialized row data to the copy buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Schedules a row id for deletion before this command's data is applied.
    pub fn add_deletable(&mut self, id: ObjectId) {
        self.deletions.add(id);
    }

    /// Number of buffered bytes.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true once the command should be enqueued and a new one started:
    /// the copy buffer is close to its soft cap, or the delete batch is full.
    pub fn is_full(&self) -> bool {
        self.buffer.len() > MAX_COPY_BUFFER_SIZE - 100 || self.deletions.is_full()
    }
}

/// A command for the copy worker to execute.
#[derive(Debug)]
pub enum Command {
    /// Copy buffer content into the given target, deleting stale rows first.
    Copy(CopyCommand),
    /// Synchronization point, fulfilled once all prior commands are applied.
    Sync(SyncBarrier),
    /// Orderly shutdown request.
    Finish,
}

/// Single-shot completion barrier carried by [`Command::Sync`].
///
/// The worker fulfills the barrier exactly once; the producer that enqueued it
/// observes the completion exactly once. Dropping an unfulfilled barrier (the
/// worker died first) wakes the waiter with a channel error, which the pipeline
/// translates into the recorded failure.
#[derive(Debug)]
pub struct SyncBarrier {
    tx: oneshot::Sender<()>,
}

impl SyncBarrier {
    /// Creates a barrier and the receiver its waiter blocks on.
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Fulfills the barrier, waking the waiting producer.
    pub(crate) fn notify(self) {
        // The waiter may have gone away; nothing to do then.
        let _ = self.tx.send(());
    }
}
