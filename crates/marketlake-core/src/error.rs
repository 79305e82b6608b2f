//! Error types for `marketlake-core`.

use thiserror::Error;

use crate::table::TableKind;

#[derive(Debug, Error)]
pub enum Error {
  /// A partition key field is missing, empty, or cannot be used as a path
  /// component.
  #[error("invalid partition key: {0}")]
  InvalidKey(String),

  /// A write batch spans more than one partition; the caller must split it.
  #[error("batch spans more than one partition: {first} and {other}")]
  HeterogeneousBatch { first: String, other: String },

  #[error("write batch is empty")]
  EmptyBatch,

  #[error("expected {expected} rows, got {actual}")]
  KindMismatch { expected: TableKind, actual: TableKind },

  #[error("unknown table kind: {0:?}")]
  UnknownTableKind(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
