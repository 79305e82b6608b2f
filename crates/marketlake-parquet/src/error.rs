//! Error type for `marketlake-parquet`.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] marketlake_core::Error),

  #[error("io error at {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),

  #[error("parquet error: {0}")]
  Parquet(#[from] parquet::errors::ParquetError),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A column is missing or has an unexpected type.
  #[error("schema error: {0}")]
  Schema(String),

  /// The partition file exists but cannot be read. Never treated as empty.
  #[error("partition {} is unavailable: {reason}", path.display())]
  PartitionUnavailable { path: PathBuf, reason: String },

  #[error("timed out waiting for the write lock on {}", path.display())]
  LockTimeout { path: PathBuf },
}

impl Error {
  pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
    move |source| Self::Io { path: path.to_path_buf(), source }
  }

  pub(crate) fn unavailable(path: &Path, reason: impl ToString) -> Self {
    Self::PartitionUnavailable {
      path:   path.to_path_buf(),
      reason: reason.to_string(),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
