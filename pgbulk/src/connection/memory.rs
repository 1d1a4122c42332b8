//! In-memory implementation of the connection seam.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::connection::base::{CopyConnection, CopyConnector};
use crate::error::{BulkResult, ErrorKind};
use crate::types::command::ObjectId;
use crate::types::target::CopyTarget;

/// One operation applied through a [`MemoryConnection`], in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedOp {
    BeginCopy { table: String },
    WriteCopyData { table: String, data: Vec<u8> },
    EndCopy { table: String },
    DeleteRows { table: String, ids: Vec<ObjectId> },
    Disconnect,
}

/// Contents of one in-memory table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTable {
    /// Concatenation of all copy buffers written to this table.
    pub data: Vec<u8>,
    /// Ids deleted from this table, in deletion order.
    pub deleted: Vec<ObjectId>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, MemoryTable>,
    ops: Vec<AppliedOp>,
}

/// In-memory database shared by a [`MemoryConnector`] and its connections.
///
/// [`MemoryDatabase`] stores the raw copy payloads and deletions applied through
/// the pipeline, together with a journal of every operation in application
/// order. This makes it ideal for tests and development workflows: the final
/// table contents verify *what* was loaded, the journal verifies *how*. All data
/// is lost when the process terminates.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    /// Creates a new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the named table's contents, if the table was touched.
    pub async fn table(&self, name: &str) -> Option<MemoryTable> {
        let inner = self.inner.lock().await;
        inner.tables.get(name).cloned()
    }

    /// Returns the journal of all applied operations.
    pub async fn ops(&self) -> Vec<AppliedOp> {
        let inner = self.inner.lock().await;
        inner.ops.clone()
    }
}

/// Connector handing out connections backed by a shared [`MemoryDatabase`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    database: MemoryDatabase,
}

impl MemoryConnector {
    pub fn new(database: MemoryDatabase) -> Self {
        Self { database }
    }
}

impl CopyConnector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> BulkResult<MemoryConnection> {
        Ok(MemoryConnection {
            database: self.database.clone(),
            open: None,
        })
    }
}

/// Connection applying operations to a [`MemoryDatabase`].
///
/// Enforces the same stream discipline as the real protocol: one open copy
/// stream at a time, no deletes while a stream is open.
#[derive(Debug)]
pub struct MemoryConnection {
    database: MemoryDatabase,
    open: Option<String>,
}

impl CopyConnection for MemoryConnection {
    async fn begin_copy(&mut self, target: &CopyTarget) -> BulkResult<()> {
        if self.open.is_some() {
            bail!(ErrorKind::InvalidState, "A copy stream is already open");
        }

        let mut inner = self.database.inner.lock().await;
        inner.tables.entry(target.name.clone()).or_default();
        inner.ops.push(AppliedOp::BeginCopy {
            table: target.name.clone(),
        });
        self.open = Some(target.name.clone());

        Ok(())
    }

    async fn write_copy_data(&mut self, data: Bytes) -> BulkResult<()> {
        let Some(table) = self.open.clone() else {
            bail!(ErrorKind::InvalidState, "No copy stream is open");
        };

        let mut inner = self.database.inner.lock().await;
        inner
            .tables
            .entry(table.clone())
            .or_default()
            .data
            .extend_from_slice(&data);
        inner.ops.push(AppliedOp::WriteCopyData {
            table,
            data: data.to_vec(),
        });

        Ok(())
    }

    async fn end_copy(&mut self) -> BulkResult<()> {
        let Some(table) = self.open.take() else {
            bail!(ErrorKind::InvalidState, "No copy stream is open");
        };

        let mut inner = self.database.inner.lock().await;
        inner.ops.push(AppliedOp::EndCopy { table });

        Ok(())
    }

    async fn delete_rows(
        &mut self,
        table: &str,
        _id_column: &str,
        ids: &[ObjectId],
    ) -> BulkResult<()> {
        if self.open.is_some() {
            bail!(
                ErrorKind::InvalidState,
                "Cannot delete rows while a copy stream is open"
            );
        }

        let mut inner = self.database.inner.lock().await;
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .deleted
            .extend_from_slice(ids);
        inner.ops.push(AppliedOp::DeleteRows {
            table: table.to_string(),
            ids: ids.to_vec(),
        });

        Ok(())
    }

    async fn disconnect(self) {
        let mut inner = self.database.inner.lock().await;
        inner.ops.push(AppliedOp::Disconnect);

        info!("memory connection disconnected");
    }
}
