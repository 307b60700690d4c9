//! CLI module for the casegate command-line interface.
//!
//! Commands run against an in-memory store loaded from a JSON snapshot;
//! commands that change the store write the snapshot back.

mod commands;
mod output;

pub use commands::*;
