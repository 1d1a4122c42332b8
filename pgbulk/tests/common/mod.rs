//! Shared test support: failure injection and write gating around the memory
//! connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};

use pgbulk::bulk_error;
use pgbulk::connection::base::{CopyConnection, CopyConnector};
use pgbulk::connection::memory::{AppliedOp, MemoryConnection, MemoryConnector, MemoryDatabase};
use pgbulk::error::{BulkError, BulkResult, ErrorKind};
use pgbulk::types::command::ObjectId;
use pgbulk::types::target::CopyTarget;

/// Initializes tracing for a test run, honoring `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls the database's operation journal until `predicate` holds.
///
/// Panics after five seconds so a broken pipeline fails the test instead of
/// hanging it.
pub async fn wait_for_ops<F>(database: &MemoryDatabase, predicate: F)
where
    F: Fn(&[AppliedOp]) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let ops = database.ops().await;
        if predicate(&ops) {
            return;
        }
        if Instant::now() > deadline {
            panic!("condition not reached within 5s, applied ops: {ops:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Which connection operation a fault fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Connect,
    BeginCopy,
    WriteCopyData,
    EndCopy,
    DeleteRows,
}

/// Fails the `nth` invocation (0-based) of `op`.
#[derive(Debug, Clone, Copy)]
pub struct Fault {
    pub op: FaultOp,
    pub nth: usize,
}

#[derive(Default)]
struct Counters {
    connect: AtomicUsize,
    begin_copy: AtomicUsize,
    write_copy_data: AtomicUsize,
    end_copy: AtomicUsize,
    delete_rows: AtomicUsize,
}

impl Counters {
    fn next(&self, op: FaultOp) -> usize {
        let counter = match op {
            FaultOp::Connect => &self.connect,
            FaultOp::BeginCopy => &self.begin_copy,
            FaultOp::WriteCopyData => &self.write_copy_data,
            FaultOp::EndCopy => &self.end_copy,
            FaultOp::DeleteRows => &self.delete_rows,
        };
        counter.fetch_add(1, Ordering::SeqCst)
    }
}

fn injected_error(op: FaultOp) -> BulkError {
    match op {
        FaultOp::Connect => {
            bulk_error!(ErrorKind::ConnectionFailed, "Injected connection failure")
        }
        FaultOp::BeginCopy | FaultOp::WriteCopyData | FaultOp::EndCopy => {
            bulk_error!(ErrorKind::CopyFailed, "Injected copy failure")
        }
        FaultOp::DeleteRows => bulk_error!(ErrorKind::DeleteFailed, "Injected delete failure"),
    }
}

/// Connector wrapping [`MemoryConnector`] with failure injection and an optional
/// gate that every copy write must pass.
#[derive(Clone)]
pub struct TestConnector {
    inner: MemoryConnector,
    fault: Option<Fault>,
    counters: Arc<Counters>,
    write_gate: Option<Arc<Semaphore>>,
}

impl TestConnector {
    pub fn new(database: MemoryDatabase) -> Self {
        Self {
            inner: MemoryConnector::new(database),
            fault: None,
            counters: Arc::new(Counters::default()),
            write_gate: None,
        }
    }

    /// Injects a single failure into the produced connection.
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Makes every copy write consume one permit from `gate` before it applies,
    /// so tests can stall the worker deterministically.
    pub fn with_write_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.write_gate = Some(gate);
        self
    }

    fn check(&self, op: FaultOp) -> BulkResult<()> {
        let invocation = self.counters.next(op);
        match self.fault {
            Some(fault) if fault.op == op && fault.nth == invocation => Err(injected_error(op)),
            _ => Ok(()),
        }
    }
}

impl CopyConnector for TestConnector {
    type Connection = TestConnection;

    async fn connect(&self) -> BulkResult<TestConnection> {
        self.check(FaultOp::Connect)?;

        let inner = self.inner.connect().await?;
        Ok(TestConnection {
            inner,
            shared: self.clone(),
        })
    }
}

/// Connection wrapper produced by [`TestConnector`].
pub struct TestConnection {
    inner: MemoryConnection,
    shared: TestConnector,
}

impl CopyConnection for TestConnection {
    async fn begin_copy(&mut self, target: &CopyTarget) -> BulkResult<()> {
        self.shared.check(FaultOp::BeginCopy)?;
        self.inner.begin_copy(target).await
    }

    async fn write_copy_data(&mut self, data: Bytes) -> BulkResult<()> {
        if let Some(gate) = &self.shared.write_gate {
            let permit = gate.acquire().await.expect("write gate closed");
            permit.forget();
        }

        self.shared.check(FaultOp::WriteCopyData)?;
        self.inner.write_copy_data(data).await
    }

    async fn end_copy(&mut self) -> BulkResult<()> {
        self.shared.check(FaultOp::EndCopy)?;
        self.inner.end_copy().await
    }

    async fn delete_rows(
        &mut self,
        table: &str,
        id_column: &str,
        ids: &[ObjectId],
    ) -> BulkResult<()> {
        self.shared.check(FaultOp::DeleteRows)?;
        self.inner.delete_rows(table, id_column, ids).await
    }

    async fn disconnect(self) {
        self.inner.disconnect().await;
    }
}
