//! `extractor-core`: domain types for the extraction pipeline.
//!
//! This crate contains **pure domain** types (no I/O): task lifecycle, fetch
//! configuration and the extracted record shape.

pub mod error;
pub mod fetch;
pub mod id;
pub mod record;
pub mod task;

pub use error::{DomainError, DomainResult};
pub use fetch::{Completeness, FetchSpec};
pub use id::TaskId;
pub use record::Record;
pub use task::{Task, TaskStatus, TaskTransition};
