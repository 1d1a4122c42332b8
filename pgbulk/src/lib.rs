//! Bulk loading pipeline for Postgres COPY streams.
//!
//! Producers build [`types::command::CopyCommand`]s with pre-serialized row data
//! and enqueue them on a [`pipeline::CopyPipeline`]; a single background worker
//! owns the database connection and streams the buffers in push order, deleting
//! stale rows before their replacements are written.

pub mod concurrency;
pub mod config;
pub mod connection;
pub mod error;
mod macros;
pub mod pipeline;
pub mod types;
pub mod workers;
