//! Query filters for the read path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{partition::PartitionKey, record::Row};

/// Parameters for [`crate::store::PartitionStore::query`].
///
/// Partitions are coarser than the filter, so a filter is used twice: once
/// to prune partition files by key, then again on every row read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
  /// Exact match. Rows without a symbol (news) never match a set symbol.
  pub symbol: Option<String>,
  /// Exact match. Rows without a source never match a set source.
  pub source: Option<String>,
  /// Exact match on the kind's facet column (see
  /// [`crate::table::TableKind::facet_name`]).
  pub facet:  Option<String>,
  /// Inclusive lower bound on the row timestamp.
  pub start:  Option<DateTime<Utc>>,
  /// Inclusive upper bound on the row timestamp.
  pub end:    Option<DateTime<Utc>>,
  pub limit:  Option<usize>,
}

impl QueryFilter {
  pub fn new() -> Self { Self::default() }

  pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
    self.symbol = Some(symbol.into());
    self
  }

  pub fn with_source(mut self, source: impl Into<String>) -> Self {
    self.source = Some(source.into());
    self
  }

  pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
    self.facet = Some(facet.into());
    self
  }

  pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    self.start = Some(start);
    self.end = Some(end);
    self
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  fn in_range(&self, ts: DateTime<Utc>) -> bool {
    self.start.is_none_or(|start| ts >= start)
      && self.end.is_none_or(|end| ts <= end)
  }

  /// Whether a partition with this key could hold a matching row.
  pub fn may_contain(&self, key: &PartitionKey) -> bool {
    fn agrees(wanted: &Option<String>, fixed: Option<&str>) -> bool {
      match (wanted, fixed) {
        (Some(w), Some(f)) => w == f,
        _ => true,
      }
    }

    if !agrees(&self.symbol, key.symbol())
      || !agrees(&self.source, key.source())
      || !agrees(&self.facet, key.facet())
    {
      return false;
    }

    match key.time_bounds() {
      Some((lo, hi)) => {
        self.start.is_none_or(|start| hi >= start)
          && self.end.is_none_or(|end| lo <= end)
      }
      None => true,
    }
  }

  /// Whether a single row satisfies every predicate.
  pub fn matches<R: Row>(&self, row: &R) -> bool {
    fn exact(wanted: &Option<String>, actual: Option<&str>) -> bool {
      match wanted {
        Some(w) => actual == Some(w.as_str()),
        None => true,
      }
    }

    exact(&self.symbol, row.symbol())
      && exact(&self.source, row.source())
      && exact(&self.facet, Some(row.facet()))
      && self.in_range(row.timestamp())
  }

  /// Filter, order by timestamp, then truncate to `limit`.
  pub fn apply<R: Row>(&self, rows: Vec<R>) -> Vec<R> {
    let mut rows: Vec<R> = rows.into_iter().filter(|r| self.matches(r)).collect();
    rows.sort_by_key(|r| r.timestamp());
    if let Some(limit) = self.limit {
      rows.truncate(limit);
    }
    rows
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::record::{Metric, NewsItem};

  fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
  }

  fn metric(symbol: &str, d: u32) -> Metric {
    Metric {
      timestamp:   day(d),
      symbol:      symbol.into(),
      metric_type: "volatility".into(),
      metric_name: "rolling_std".into(),
      value:       0.2,
      period:      "20d".into(),
      metadata:    serde_json::Value::Null,
    }
  }

  #[test]
  fn date_range_is_inclusive() {
    let filter = QueryFilter::new().between(day(2), day(4));
    assert!(!filter.matches(&metric("SPY", 1)));
    assert!(filter.matches(&metric("SPY", 2)));
    assert!(filter.matches(&metric("SPY", 4)));
    assert!(!filter.matches(&metric("SPY", 5)));
  }

  #[test]
  fn source_filter_excludes_sourceless_rows() {
    let filter = QueryFilter::new().with_source("yahoo");
    assert!(!filter.matches(&metric("SPY", 1)));
  }

  #[test]
  fn apply_sorts_then_limits() {
    let rows = vec![metric("SPY", 3), metric("QQQ", 1), metric("SPY", 2)];
    let out = QueryFilter::new().with_symbol("SPY").with_limit(1).apply(rows);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].timestamp, day(2));
  }

  #[test]
  fn prunes_news_months_outside_range() {
    let filter = QueryFilter::new().between(
      Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap(),
      Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
    );
    let month = |m| PartitionKey::News { source: "r".into(), year: 2024, month: m };
    assert!(!filter.may_contain(&month(1)));
    assert!(filter.may_contain(&month(2)));
    assert!(filter.may_contain(&month(3)));
    assert!(!filter.may_contain(&month(4)));
  }

  #[test]
  fn prunes_by_fixed_key_fields() {
    let key = PartitionKey::market_bar("yahoo", "AAPL", "1d").unwrap();
    assert!(QueryFilter::new().with_symbol("AAPL").may_contain(&key));
    assert!(!QueryFilter::new().with_symbol("MSFT").may_contain(&key));
    assert!(!QueryFilter::new().with_facet("1h").may_contain(&key));
    // News keys carry no symbol, so they cannot be pruned on it.
    let news = PartitionKey::news("r", day(1)).unwrap();
    assert!(QueryFilter::new().with_symbol("AAPL").may_contain(&news));
    let item = NewsItem {
      timestamp:   day(1),
      source:      "r".into(),
      category:    "markets".into(),
      title:       "t".into(),
      link:        "https://example.com/a".into(),
      description: None,
      author:      None,
      tags:        vec![],
    };
    assert!(!QueryFilter::new().with_symbol("AAPL").matches(&item));
  }
}
