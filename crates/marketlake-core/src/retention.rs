//! Retention policy and sweep reports.
//!
//! Retention is coarse-grained: whole partition files are deleted once every
//! row in them is older than the horizon. Files are never rewritten to drop
//! a subset of stale rows.

use std::{collections::BTreeMap, path::PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::table::TableKind;

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Maximum age per table kind. Kinds without an entry are kept forever.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
  max_age: BTreeMap<TableKind, TimeDelta>,
}

impl RetentionPolicy {
  pub fn keep_forever() -> Self { Self::default() }

  /// Set a horizon in whole days; `0` means keep forever.
  pub fn with_days(mut self, kind: TableKind, days: u32) -> Self {
    if days == 0 {
      self.max_age.remove(&kind);
    } else {
      self.max_age.insert(kind, TimeDelta::days(i64::from(days)));
    }
    self
  }

  pub fn max_age(&self, kind: TableKind) -> Option<TimeDelta> {
    self.max_age.get(&kind).copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = (TableKind, TimeDelta)> + '_ {
    self.max_age.iter().map(|(k, v)| (*k, *v))
  }
}

/// Rows strictly older than the cutoff are expired.
pub fn cutoff(as_of: DateTime<Utc>, max_age: TimeDelta) -> DateTime<Utc> {
  as_of - max_age
}

/// A partition is expired when its newest instant is strictly older than the
/// cutoff. A partition with no rows has nothing to keep.
pub fn is_expired(newest: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
  newest.is_none_or(|newest| newest < cutoff)
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// An eligible partition the sweeper could not delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
  pub path:   PathBuf,
  pub reason: String,
}

/// Outcome of sweeping one table kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
  pub kind:     TableKind,
  pub cutoff:   DateTime<Utc>,
  /// Number of partition files inspected.
  pub examined: usize,
  pub deleted:  Vec<PathBuf>,
  pub failures: Vec<SweepFailure>,
}

impl SweepReport {
  pub fn new(kind: TableKind, cutoff: DateTime<Utc>) -> Self {
    Self { kind, cutoff, examined: 0, deleted: Vec::new(), failures: Vec::new() }
  }

  pub fn is_clean(&self) -> bool { self.failures.is_empty() }

  /// Up to `n` failed paths, for a short operator-facing summary.
  pub fn sample_failures(&self, n: usize) -> impl Iterator<Item = &SweepFailure> {
    self.failures.iter().take(n)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn exactly_max_age_is_retained() {
    let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
    let cut = cutoff(now, TimeDelta::days(30));
    assert!(!is_expired(Some(now - TimeDelta::days(30)), cut));
    assert!(is_expired(Some(now - TimeDelta::days(31)), cut));
    assert!(is_expired(None, cut));
  }

  #[test]
  fn zero_days_keeps_forever() {
    let policy = RetentionPolicy::keep_forever()
      .with_days(TableKind::News, 90)
      .with_days(TableKind::MarketBar, 0);
    assert_eq!(policy.max_age(TableKind::News), Some(TimeDelta::days(90)));
    assert_eq!(policy.max_age(TableKind::MarketBar), None);
    assert_eq!(policy.iter().count(), 1);
  }
}
