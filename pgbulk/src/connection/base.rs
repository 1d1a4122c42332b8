use std::future::Future;

use bytes::Bytes;

use crate::error::BulkResult;
use crate::types::command::ObjectId;
use crate::types::target::CopyTarget;

/// Trait for opening the connection the copy worker drives.
///
/// The connector is handed to the pipeline and moved into the worker task, which
/// connects exactly once at startup. Connectors are plain values so tests can
/// inject connections that share observable state with the test body.
pub trait CopyConnector: Send + 'static {
    /// Connection type produced by this connector.
    type Connection: CopyConnection;

    /// Opens a new connection.
    fn connect(&self) -> impl Future<Output = BulkResult<Self::Connection>> + Send;
}

/// Trait for connections that can receive bulk-copy data.
///
/// At most one copy stream may be open at a time, and no other statement may run
/// while one is. The worker's state machine upholds both rules; implementations
/// report violations as [`crate::error::ErrorKind::InvalidState`].
///
/// All operations are driven from a single task, in the order the corresponding
/// commands were enqueued.
pub trait CopyConnection: Send + 'static {
    /// Opens a copy stream into the given target table.
    fn begin_copy(&mut self, target: &CopyTarget) -> impl Future<Output = BulkResult<()>> + Send;

    /// Writes one opaque chunk of pre-serialized row data to the open stream.
    ///
    /// Chunking the payload into protocol-sized frames is the implementation's
    /// concern; callers may pass arbitrarily large buffers.
    fn write_copy_data(&mut self, data: Bytes) -> impl Future<Output = BulkResult<()>> + Send;

    /// Ends the open copy stream, making the written rows durable.
    fn end_copy(&mut self) -> impl Future<Output = BulkResult<()>> + Send;

    /// Deletes all rows of `table` whose `id_column` matches one of `ids`, as a
    /// single batched statement.
    fn delete_rows(
        &mut self,
        table: &str,
        id_column: &str,
        ids: &[ObjectId],
    ) -> impl Future<Output = BulkResult<()>> + Send;

    /// Closes the connection. Teardown failures are logged, not returned.
    fn disconnect(self) -> impl Future<Output = ()> + Send;
}
