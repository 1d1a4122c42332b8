//! Loads a handful of rows into a local Postgres instance through the pipeline.
//!
//! Expects a reachable database with a `nodes (id int8, name text)` table:
//!
//! ```sql
//! create table nodes (id int8 primary key, name text);
//! ```
//!
//! Run with `cargo run --example load`.

use std::sync::Arc;

use pgbulk::config::PgConnectionConfig;
use pgbulk::connection::postgres::PgCopyConnector;
use pgbulk::pipeline::CopyPipeline;
use pgbulk::types::command::{Command, CopyCommand};
use pgbulk::types::target::CopyTarget;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = PgConnectionConfig {
        host: "localhost".to_string(),
        port: 5432,
        name: "postgres".to_string(),
        username: "postgres".to_string(),
        password: None,
        keepalive: None,
    };
    let pipeline = CopyPipeline::start(PgCopyConnector::new(config));

    let target = Arc::new(CopyTarget::with_rows("nodes", "id", "id,name"));

    // Rows are laid out in the COPY text format. Re-loaded ids are scheduled
    // for deletion so the run is repeatable.
    let mut command = CopyCommand::new(Arc::clone(&target));
    for id in 0..100i64 {
        command.append(format!("{id}\tnode {id}\n").as_bytes());
        command.add_deletable(id);
    }

    pipeline.enqueue(Command::Copy(command)).await?;
    pipeline.sync_and_wait().await?;
    pipeline.finish().await?;

    println!("loaded 100 rows into nodes");

    Ok(())
}
