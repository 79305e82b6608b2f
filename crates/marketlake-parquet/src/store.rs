//! [`ParquetStore`], the Parquet implementation of [`PartitionStore`].

use std::{
  collections::{BTreeMap, HashSet},
  fs, io,
  path::{Path, PathBuf},
  time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use marketlake_core::{
  Error as CoreError,
  fingerprint::Fingerprint,
  partition::{PARTITION_EXTENSION, PartitionKey},
  query::QueryFilter,
  record::{AnalysisResult, MarketBar, Metric, NewsItem, Row, Rows},
  retention::{self, RetentionPolicy, SweepFailure, SweepReport},
  store::{PartitionEntry, PartitionStore, TableSummary, UpsertOutcome},
  table::TableKind,
};

use crate::{
  Error, Result, StoreConfig,
  lock::PartitionLock,
  segment::{exists, read_segment, read_segment_if_present, write_segment},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A partitioned store rooted at one directory.
///
/// The handle holds no open files; cloning it is cheap and clones share
/// nothing but configuration. Two handles on the same root coordinate
/// through partition lock files.
#[derive(Debug, Clone)]
pub struct ParquetStore {
  root:             PathBuf,
  retention:        RetentionPolicy,
  lock_timeout:     Duration,
  stale_lock_after: Duration,
}

/// Derive the single partition shared by every row, or fail without
/// touching disk.
fn single_partition<R: Row>(
  rows: &[R],
  written_at: DateTime<Utc>,
) -> Result<PartitionKey> {
  let mut iter = rows.iter();
  let first = iter
    .next()
    .ok_or(CoreError::EmptyBatch)?
    .partition_key(written_at)?;
  for row in iter {
    let key = row.partition_key(written_at)?;
    if key != first {
      return Err(
        CoreError::HeterogeneousBatch {
          first: first.to_string(),
          other: key.to_string(),
        }
        .into(),
      );
    }
  }
  Ok(first)
}

fn is_partition_file(path: &Path) -> bool {
  let hidden = path
    .file_name()
    .and_then(|n| n.to_str())
    .is_none_or(|n| n.starts_with('.'));
  !hidden && path.extension().is_some_and(|ext| ext == PARTITION_EXTENSION)
}

fn is_not_found(e: &io::Error) -> bool { e.kind() == io::ErrorKind::NotFound }

/// Collect every file below `dir`. Entries removed while walking (files
/// swept, directories pruned or dropped) are skipped.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if is_not_found(&e) => return Ok(()),
    Err(e) => return Err(Error::io(dir)(e)),
  };
  for entry in entries {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) if is_not_found(&e) => continue,
      Err(e) => return Err(Error::io(dir)(e)),
    };
    let path = entry.path();
    let file_type = match entry.file_type() {
      Ok(file_type) => file_type,
      Err(e) if is_not_found(&e) => continue,
      Err(e) => return Err(Error::io(&path)(e)),
    };
    if file_type.is_dir() {
      collect_files(&path, out)?;
    } else if file_type.is_file() {
      out.push(path);
    }
  }
  Ok(())
}

/// Remove empty directories below `dir` (but not `dir` itself).
fn prune_empty_dirs(dir: &Path) -> io::Result<()> {
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    if entry.file_type()?.is_dir() {
      let path = entry.path();
      prune_empty_dirs(&path)?;
      if fs::read_dir(&path)?.next().is_none() {
        fs::remove_dir(&path)?;
      }
    }
  }
  Ok(())
}

impl ParquetStore {
  /// Open (or create) a store rooted at `config.root`.
  pub fn open(config: StoreConfig) -> Result<Self> {
    fs::create_dir_all(&config.root).map_err(Error::io(&config.root))?;
    Ok(Self {
      retention:        config.retention_policy(),
      lock_timeout:     config.lock_timeout(),
      stale_lock_after: config.stale_lock_after(),
      root:             config.root,
    })
  }

  pub fn root(&self) -> &Path { &self.root }

  pub fn retention(&self) -> &RetentionPolicy { &self.retention }

  /// Absolute path of the file for `key`.
  pub fn path_for(&self, key: &PartitionKey) -> PathBuf {
    self.root.join(key.relative_path())
  }

  fn table_dir(&self, kind: TableKind) -> PathBuf {
    self.root.join(kind.dir_name())
  }

  fn lock(&self, partition: &Path) -> Result<PartitionLock> {
    PartitionLock::acquire(partition, self.lock_timeout, self.stale_lock_after)
  }

  fn read_partition<R: Row>(&self, path: &Path) -> Result<Vec<R>> {
    Ok(R::from_rows(read_segment(path, R::KIND)?)?)
  }

  // ── Writes ──────────────────────────────────────────────────────────────

  fn upsert_typed<R: Row>(&self, rows: Vec<R>) -> Result<UpsertOutcome> {
    let written_at = Utc::now();
    let mut key = single_partition(&rows, written_at)?;
    let mut path = self.path_for(&key);

    // Batches that never merge move to the next free batch file instead.
    let _lock = loop {
      let lock = self.lock(&path)?;
      if R::KIND.merges_across_batches() || !exists(&path)? {
        break lock;
      }
      drop(lock);
      key = key.next_batch();
      path = self.path_for(&key);
    };

    let existing: Vec<R> = if exists(&path)? {
      self.read_partition(&path)?
    } else {
      Vec::new()
    };
    let before = existing.len();

    let mut seen: HashSet<Fingerprint> =
      existing.iter().map(Row::fingerprint).collect();
    let mut merged = existing;
    let mut skipped = 0;
    for row in rows {
      if seen.insert(row.fingerprint()) {
        merged.push(row);
      } else {
        skipped += 1;
      }
    }
    let inserted = merged.len() - before;
    let total = merged.len();

    if inserted > 0 {
      merged.sort_by_key(|r| r.timestamp());
      write_segment(&path, &R::into_rows(merged))?;
    }

    tracing::info!(
      partition = %key,
      inserted,
      skipped,
      total,
      "upserted partition"
    );

    Ok(UpsertOutcome { key, path, inserted, skipped, total })
  }

  /// Upsert each partition group in key order. Keys are validated up front;
  /// a failure in a later group leaves earlier groups written (each upsert
  /// is atomic on its own) and is returned as the error.
  fn store_typed<R: Row>(&self, rows: Vec<R>) -> Result<Vec<UpsertOutcome>> {
    let written_at = Utc::now();

    // Validate every key before the first write.
    let mut groups: BTreeMap<PartitionKey, Vec<R>> = BTreeMap::new();
    for row in rows {
      let key = row.partition_key(written_at)?;
      groups.entry(key).or_default().push(row);
    }

    groups
      .into_values()
      .map(|group| self.upsert_typed(group))
      .collect()
  }

  // ── Reads ───────────────────────────────────────────────────────────────

  fn query_typed<R: Row>(&self, filter: &QueryFilter) -> Result<Vec<R>> {
    let candidates: Vec<PartitionEntry> = self
      .list_partitions(R::KIND)?
      .into_iter()
      .filter(|entry| filter.may_contain(&entry.key))
      .collect();

    let mut rows = Vec::new();
    for entry in &candidates {
      let Some(partition) = read_segment_if_present(&entry.path, R::KIND)? else {
        continue;
      };
      let partition = R::from_rows(partition)?;
      rows.extend(partition.into_iter().filter(|r| filter.matches(r)));
    }

    tracing::debug!(
      kind = %R::KIND,
      partitions = candidates.len(),
      rows = rows.len(),
      "query"
    );
    Ok(filter.apply(rows))
  }

  fn list_partitions(&self, kind: TableKind) -> Result<Vec<PartitionEntry>> {
    let dir = self.table_dir(kind);
    if !dir.is_dir() {
      return Ok(Vec::new());
    }

    let mut files = Vec::new();
    collect_files(&dir, &mut files)?;
    files.sort();

    // Files listed here may be swept or dropped before they are read.
    let mut entries = Vec::with_capacity(files.len());
    for path in files {
      if !is_partition_file(&path) {
        continue;
      }
      let relative = path.strip_prefix(&self.root).unwrap_or(&path);
      let key = match PartitionKey::parse(kind, relative) {
        Ok(key) => key,
        Err(e) => {
          tracing::warn!(path = %path.display(), error = %e, "skipping stray file");
          continue;
        }
      };
      let bytes = match fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(e) if is_not_found(&e) => continue,
        Err(e) => return Err(Error::io(&path)(e)),
      };
      entries.push(PartitionEntry { key, path, bytes });
    }
    Ok(entries)
  }

  // ── Retention ───────────────────────────────────────────────────────────

  /// Delete `entry` if it is expired. Returns whether it was deleted.
  fn sweep_partition(
    &self,
    entry: &PartitionEntry,
    cutoff: DateTime<Utc>,
  ) -> Result<bool> {
    let _lock = self.lock(&entry.path)?;
    if !exists(&entry.path)? {
      return Ok(false);
    }

    let newest = match entry.key.time_bounds() {
      Some((_, last)) => Some(last),
      None => read_segment(&entry.path, entry.key.kind())?.newest(),
    };
    if !retention::is_expired(newest, cutoff) {
      return Ok(false);
    }

    fs::remove_file(&entry.path).map_err(Error::io(&entry.path))?;
    Ok(true)
  }

  /// Sweep every kind that has a horizon in the configured policy.
  pub fn sweep_configured(
    &self,
    as_of: Option<DateTime<Utc>>,
  ) -> Result<Vec<SweepReport>> {
    let as_of = as_of.unwrap_or_else(Utc::now);
    self
      .retention
      .iter()
      .map(|(kind, max_age)| self.sweep(kind, max_age, Some(as_of)))
      .collect()
  }
}

// ─── PartitionStore impl ─────────────────────────────────────────────────────

impl PartitionStore for ParquetStore {
  type Error = Error;

  fn upsert(&self, rows: Rows) -> Result<UpsertOutcome> {
    match rows {
      Rows::MarketBar(rows) => self.upsert_typed(rows),
      Rows::News(rows) => self.upsert_typed(rows),
      Rows::Analysis(rows) => self.upsert_typed(rows),
      Rows::Metric(rows) => self.upsert_typed(rows),
    }
  }

  fn store(&self, rows: Rows) -> Result<Vec<UpsertOutcome>> {
    match rows {
      Rows::MarketBar(rows) => self.store_typed(rows),
      Rows::News(rows) => self.store_typed(rows),
      Rows::Analysis(rows) => self.store_typed(rows),
      Rows::Metric(rows) => self.store_typed(rows),
    }
  }

  fn query(&self, kind: TableKind, filter: &QueryFilter) -> Result<Rows> {
    Ok(match kind {
      TableKind::MarketBar => Rows::MarketBar(self.query_typed::<MarketBar>(filter)?),
      TableKind::News => Rows::News(self.query_typed::<NewsItem>(filter)?),
      TableKind::Analysis => {
        Rows::Analysis(self.query_typed::<AnalysisResult>(filter)?)
      }
      TableKind::Metric => Rows::Metric(self.query_typed::<Metric>(filter)?),
    })
  }

  fn partitions(&self, kind: TableKind) -> Result<Vec<PartitionEntry>> {
    self.list_partitions(kind)
  }

  fn summary(&self) -> Result<Vec<TableSummary>> {
    TableKind::ALL
      .into_iter()
      .map(|kind| {
        let entries = self.list_partitions(kind)?;
        Ok(TableSummary {
          kind,
          files: entries.len(),
          bytes: entries.iter().map(|e| e.bytes).sum(),
        })
      })
      .collect()
  }

  fn sweep(
    &self,
    kind: TableKind,
    max_age: TimeDelta,
    as_of: Option<DateTime<Utc>>,
  ) -> Result<SweepReport> {
    let cutoff = retention::cutoff(as_of.unwrap_or_else(Utc::now), max_age);
    let mut report = SweepReport::new(kind, cutoff);

    for entry in self.list_partitions(kind)? {
      report.examined += 1;
      match self.sweep_partition(&entry, cutoff) {
        Ok(true) => {
          tracing::info!(partition = %entry.key, "swept expired partition");
          report.deleted.push(entry.path);
        }
        Ok(false) => {}
        Err(e) => {
          tracing::warn!(path = %entry.path.display(), error = %e, "could not sweep partition");
          report.failures.push(SweepFailure { path: entry.path, reason: e.to_string() });
        }
      }
    }

    let dir = self.table_dir(kind);
    if dir.is_dir() {
      if let Err(e) = prune_empty_dirs(&dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "could not prune empty directories");
      }
    }

    Ok(report)
  }

  fn drop_table(&self, kind: TableKind) -> Result<usize> {
    let removed = self.list_partitions(kind)?.len();
    let dir = self.table_dir(kind);
    if dir.is_dir() {
      fs::remove_dir_all(&dir).map_err(Error::io(&dir))?;
    }
    tracing::info!(kind = %kind, partitions = removed, "dropped table");
    Ok(removed)
  }
}
