//! The `PartitionStore` trait and its result types.
//!
//! The trait is implemented by storage backends (e.g. `marketlake-parquet`).
//! Producers and consumers depend on this abstraction, not on any concrete
//! file format.
//!
//! Every method runs to completion on the caller's thread. Backends must
//! guarantee that at most one writer holds the read-modify-write-rename
//! section for a given partition at a time, and that readers only ever see
//! a complete old or a complete new partition file.

use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{
  partition::PartitionKey,
  query::QueryFilter,
  record::{Row, Rows},
  retention::SweepReport,
  table::TableKind,
};

// ─── Result types ────────────────────────────────────────────────────────────

/// What one partition upsert did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
  pub key:      PartitionKey,
  pub path:     PathBuf,
  /// Rows new to the partition.
  pub inserted: usize,
  /// Rows dropped because their natural key was already present.
  pub skipped:  usize,
  /// Rows in the partition after the write.
  pub total:    usize,
}

/// A partition file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
  pub key:   PartitionKey,
  pub path:  PathBuf,
  pub bytes: u64,
}

/// File count and size of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
  pub kind:  TableKind,
  pub files: usize,
  pub bytes: u64,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a partitioned, deduplicating row store.
pub trait PartitionStore {
  type Error: std::error::Error + From<crate::Error> + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Insert rows that all belong to one partition, skipping rows whose
  /// natural key is already present (first-seen-wins).
  ///
  /// Fails with [`crate::Error::HeterogeneousBatch`] without writing
  /// anything if the rows span more than one partition.
  fn upsert(&self, rows: Rows) -> Result<UpsertOutcome, Self::Error>;

  /// Split `rows` by partition and upsert each group. Returns one outcome
  /// per partition touched.
  ///
  /// Every key is validated before the first write, so an `InvalidKey`
  /// writes nothing. Groups are then written one at a time in partition key
  /// order; if a later group fails (lock timeout, unreadable partition) the
  /// groups before it stay written and only the error is returned. Each
  /// group is idempotent, so retrying the whole call is safe.
  fn store(&self, rows: Rows) -> Result<Vec<UpsertOutcome>, Self::Error>;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Reconstruct a logical table from the partitions that could match
  /// `filter`. Rows are returned in timestamp order.
  fn query(
    &self,
    kind: TableKind,
    filter: &QueryFilter,
  ) -> Result<Rows, Self::Error>;

  /// List the partition files of a table.
  fn partitions(
    &self,
    kind: TableKind,
  ) -> Result<Vec<PartitionEntry>, Self::Error>;

  fn summary(&self) -> Result<Vec<TableSummary>, Self::Error>;

  // ── Deletion ──────────────────────────────────────────────────────────

  /// Delete every partition of `kind` whose newest row is older than
  /// `max_age` relative to `as_of` (defaults to now). Files that cannot be
  /// deleted are reported, not raised.
  fn sweep(
    &self,
    kind: TableKind,
    max_age: TimeDelta,
    as_of: Option<DateTime<Utc>>,
  ) -> Result<SweepReport, Self::Error>;

  /// Remove a whole table. Returns the number of partition files removed.
  fn drop_table(&self, kind: TableKind) -> Result<usize, Self::Error>;

  // ── Typed helpers ─────────────────────────────────────────────────────

  fn upsert_rows<R: Row>(&self, rows: Vec<R>) -> Result<UpsertOutcome, Self::Error> {
    self.upsert(R::into_rows(rows))
  }

  fn store_rows<R: Row>(
    &self,
    rows: Vec<R>,
  ) -> Result<Vec<UpsertOutcome>, Self::Error> {
    self.store(R::into_rows(rows))
  }

  fn query_as<R: Row>(&self, filter: &QueryFilter) -> Result<Vec<R>, Self::Error> {
    Ok(R::from_rows(self.query(R::KIND, filter)?)?)
  }
}
