//! Value types shared between producers and the copy worker.

pub mod command;
pub mod target;
