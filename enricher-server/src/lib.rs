//! # enricherd
//!
//! Process wiring for the enrichment pipeline: backend selection (Postgres
//! or in-memory), the content store and alert sink, and the operator
//! commands behind the `enricherd` binary.

pub mod bootstrap;
pub mod commands;

pub use bootstrap::{Backends, connect_backends};
