//! # mongork-core
//!
//! Core types, traits, and engines for MongoDB schema migrations and oplog
//! tailing.
//!
//! This crate is backend-agnostic: the migration engine and the tailer work
//! against the traits in [`traits`]. `mongork-db` provides the MongoDB
//! implementations; [`memory`] provides an in-process one.

pub mod applied;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod logging;
pub mod memory;
pub mod models;
pub mod operation;
pub mod plan;
pub mod registry;
pub mod resume;
pub mod tailer;
pub mod temporal;
pub mod traits;
pub mod version;

// Re-export commonly used types at crate root
pub use applied::AppliedFilter;
pub use config::Config;
pub use engine::MigrationEngine;
pub use error::{Error, Result};
pub use event::ChangeEvent;
pub use executor::TransactionalExecutor;
pub use filter::FilterBuilder;
pub use models::*;
pub use operation::OperationKind;
pub use plan::compute_plan;
pub use registry::{StepRef, StepRegistry};
pub use resume::{FileTokenStore, MemoryTokenStore};
pub use tailer::{parse_namespace, OplogTailer, TailOptions};
pub use temporal::parse_time;
pub use traits::*;
pub use version::{generate_version, validate_version};

// Re-exported so callers name the same token type the engine takes.
pub use tokio_util::sync::CancellationToken;
