//! # Enricher Core
//!
//! Dispatch and backpressure core of the enrichment pipeline.
//!
//! A record insert becomes one canonical event ([`notifier`]); the
//! [`router`] fans it out to one queue per stage through attribute filters;
//! each stage's [`worker`] pulls batches, performs its lookup with bounded
//! retries and writes exactly its own status/info pair back to the
//! [`store`]. Stages talking to quota-limited providers run behind the
//! [`quota`] backpressure protocol, which pauses their intake instead of
//! burning through failed requests.
//!
//! ## Feature Flags
//!
//! - `postgres` (default): Postgres-backed store, queues and register
//!   ([`persistence`]).

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod config;
pub mod content;
pub mod error;
pub mod notifier;
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod persistence;
pub mod producer;
pub mod queue;
pub mod quota;
pub mod router;
pub mod runtime;
pub mod stages;
pub mod store;
pub mod worker;

pub use config::{PipelineConfig, ProviderSettings, QuotaSettings, StageTuning};
pub use error::{EnricherError, Result};
pub use notifier::ChangeNotifier;
pub use runtime::{Pipeline, PipelineBackends, PipelineHandle};
