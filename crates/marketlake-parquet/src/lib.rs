//! Parquet backend for the marketlake store.
//!
//! One Snappy-compressed Parquet file per partition. Writes are
//! read-merge-rewrite under an advisory lock file, and a partition is
//! replaced by writing a temporary file next to it and renaming it over the
//! original, so readers never observe a partial file.

mod encode;
mod lock;
mod schema;
mod segment;
mod store;

pub mod config;
pub mod error;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use store::ParquetStore;
