//! Core types and trait definitions for the marketlake partitioned store.
//!
//! This crate is deliberately free of file-format and filesystem
//! dependencies. It defines the row types, the partition router, row
//! fingerprints and the [`store::PartitionStore`] trait that storage
//! backends implement.

pub mod error;
pub mod fingerprint;
pub mod partition;
pub mod query;
pub mod record;
pub mod retention;
pub mod store;
pub mod table;

pub use error::{Error, Result};
