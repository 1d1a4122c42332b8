//! Postgres implementation of the connection seam.

use std::pin::Pin;

use bytes::Bytes;
use futures::SinkExt;
use pg_escape::quote_identifier;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, CopyInSink, NoTls};
use tracing::{debug, info, warn};

use crate::config::PgConnectionConfig;
use crate::connection::base::{CopyConnection, CopyConnector};
use crate::error::{BulkResult, ErrorKind};
use crate::types::command::ObjectId;
use crate::types::target::CopyTarget;
use crate::{bail, bulk_error};

/// Connector opening plain connections to the destination database.
#[derive(Debug, Clone)]
pub struct PgCopyConnector {
    config: PgConnectionConfig,
}

impl PgCopyConnector {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self { config }
    }
}

impl CopyConnector for PgCopyConnector {
    type Connection = PgCopyConnection;

    async fn connect(&self) -> BulkResult<PgCopyConnection> {
        PgCopyConnection::connect(&self.config).await
    }
}

/// A Postgres connection driving `COPY ... FROM STDIN` streams.
///
/// tokio-postgres splits the client from the connection that owns the socket;
/// the latter is driven by a background task for the lifetime of this value. At
/// most one [`CopyInSink`] is open at a time, and the sink takes care of framing
/// arbitrarily large payloads into protocol-sized chunks.
pub struct PgCopyConnection {
    client: Client,
    connection_task: JoinHandle<()>,
    sink: Option<Pin<Box<CopyInSink<Bytes>>>>,
}

impl PgCopyConnection {
    /// Opens a connection with the given configuration.
    pub async fn connect(config: &PgConnectionConfig) -> BulkResult<Self> {
        info!(
            host = %config.host,
            port = config.port,
            dbname = %config.name,
            "connecting to destination database"
        );

        let (client, connection) =
            config
                .connect_options()
                .connect(NoTls)
                .await
                .map_err(|err| {
                    bulk_error!(
                        ErrorKind::ConnectionFailed,
                        "Failed to connect to the destination database",
                        err.to_string(),
                        source: err
                    )
                })?;

        let connection_task = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!("destination connection terminated with an error: {err}");
            }
        });

        Ok(Self {
            client,
            connection_task,
            sink: None,
        })
    }

    fn copy_statement(target: &CopyTarget) -> String {
        match &target.rows {
            Some(rows) => format!("COPY {} ({}) FROM STDIN", target.name, rows),
            None => format!("COPY {} FROM STDIN", target.name),
        }
    }
}

impl CopyConnection for PgCopyConnection {
    async fn begin_copy(&mut self, target: &CopyTarget) -> BulkResult<()> {
        if self.sink.is_some() {
            bail!(ErrorKind::InvalidState, "A copy stream is already open");
        }

        let statement = Self::copy_statement(target);
        debug!(statement = %statement, "beginning copy stream");

        let sink = self
            .client
            .copy_in(statement.as_str())
            .await
            .map_err(|err| {
                bulk_error!(
                    ErrorKind::CopyFailed,
                    "Failed to begin copy stream",
                    err.to_string(),
                    source: err
                )
            })?;
        self.sink = Some(Box::pin(sink));

        Ok(())
    }

    async fn write_copy_data(&mut self, data: Bytes) -> BulkResult<()> {
        let Some(sink) = self.sink.as_mut() else {
            bail!(ErrorKind::InvalidState, "No copy stream is open");
        };

        sink.send(data).await.map_err(|err| {
            bulk_error!(
                ErrorKind::CopyFailed,
                "Failed to write copy data",
                err.to_string(),
                source: err
            )
        })
    }

    async fn end_copy(&mut self) -> BulkResult<()> {
        let Some(mut sink) = self.sink.take() else {
            bail!(ErrorKind::InvalidState, "No copy stream is open");
        };

        let rows = sink.as_mut().finish().await.map_err(|err| {
            bulk_error!(
                ErrorKind::CopyFailed,
                "Failed to end copy stream",
                err.to_string(),
                source: err
            )
        })?;
        debug!(rows, "copy stream finished");

        Ok(())
    }

    async fn delete_rows(
        &mut self,
        table: &str,
        id_column: &str,
        ids: &[ObjectId],
    ) -> BulkResult<()> {
        debug!(table = %table, ids = ids.len(), "deleting stale rows");

        let statement = format!(
            "DELETE FROM {} WHERE {} = ANY($1)",
            table,
            quote_identifier(id_column)
        );
        self.client
            .execute(statement.as_str(), &[&ids])
            .await
            .map_err(|err| {
                bulk_error!(
                    ErrorKind::DeleteFailed,
                    "Failed to delete rows",
                    err.to_string(),
                    source: err
                )
            })?;

        Ok(())
    }

    async fn disconnect(self) {
        let PgCopyConnection {
            client,
            connection_task,
            sink,
        } = self;

        // A stream still open here means the pipeline is already failing;
        // dropping the sink aborts the copy server side.
        drop(sink);
        drop(client);

        if let Err(err) = connection_task.await {
            warn!("destination connection task failed during shutdown: {err}");
        }

        info!("disconnected from destination database");
    }
}
