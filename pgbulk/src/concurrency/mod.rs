//! Concurrency primitives coordinating producers and the copy worker.

pub mod queue;
