//! The four logical tables a store holds, and the navigation map that
//! describes them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// A logical table. Each kind owns one subtree under the store root.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
  MarketBar,
  News,
  Analysis,
  Metric,
}

impl TableKind {
  pub const ALL: [TableKind; 4] =
    [Self::MarketBar, Self::News, Self::Analysis, Self::Metric];

  /// The identifier used on the command line and in configuration.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::MarketBar => "market_bar",
      Self::News => "news",
      Self::Analysis => "analysis",
      Self::Metric => "metric",
    }
  }

  /// Name of the top-level directory holding this table's partitions.
  pub fn dir_name(&self) -> &'static str {
    match self {
      Self::MarketBar => "market",
      Self::News => "news",
      Self::Analysis => "analysis",
      Self::Metric => "metrics",
    }
  }

  /// Layout of a partition file relative to the store root.
  pub fn path_pattern(&self) -> &'static str {
    match self {
      Self::MarketBar => "market/{source}/{symbol}/{interval}.parquet",
      Self::News => "news/{source}/{year}/{month}.parquet",
      Self::Analysis => {
        "analysis/{analysis_type}/{symbol}/{batch_timestamp}.parquet"
      }
      Self::Metric => "metrics/{metric_type}/{symbol}.parquet",
    }
  }

  /// Column names that together identify a row for deduplication.
  pub fn natural_key_fields(&self) -> &'static [&'static str] {
    match self {
      Self::MarketBar => &["symbol", "timestamp", "source", "interval"],
      Self::News => &["link", "timestamp"],
      Self::Analysis => {
        &["symbol", "timestamp", "analysis_type", "model_version"]
      }
      Self::Metric => &["symbol", "timestamp", "metric_type"],
    }
  }

  /// What the column the query filter's `facet` matches against is called.
  pub fn facet_name(&self) -> &'static str {
    match self {
      Self::MarketBar => "interval",
      Self::News => "category",
      Self::Analysis => "analysis_type",
      Self::Metric => "metric_type",
    }
  }

  pub fn description(&self) -> &'static str {
    match self {
      Self::MarketBar => {
        "OHLCV bars, one file per source, symbol and interval covering the \
         whole time range"
      }
      Self::News => {
        "News and RSS items, one file per source and calendar month of the \
         item's own publication time"
      }
      Self::Analysis => {
        "Model outputs (e.g. sentiment scores), one immutable file per write \
         batch"
      }
      Self::Metric => {
        "Derived metrics, one file per metric type and symbol"
      }
    }
  }

  /// Whether a write merges into the existing partition file. Analysis
  /// batches are written once and never merged.
  pub fn merges_across_batches(&self) -> bool {
    !matches!(self, Self::Analysis)
  }
}

impl fmt::Display for TableKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TableKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "market_bar" | "market" | "bars" => Ok(Self::MarketBar),
      "news" => Ok(Self::News),
      "analysis" => Ok(Self::Analysis),
      "metric" | "metrics" => Ok(Self::Metric),
      other => Err(Error::UnknownTableKind(other.to_string())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_identifiers_and_aliases() {
    for kind in TableKind::ALL {
      assert_eq!(kind.as_str().parse::<TableKind>().unwrap(), kind);
      assert_eq!(kind.dir_name().parse::<TableKind>().unwrap(), kind);
    }
    assert_eq!("NEWS".parse::<TableKind>().unwrap(), TableKind::News);
    assert!("quotes".parse::<TableKind>().is_err());
  }

  #[test]
  fn path_patterns_start_with_dir_name() {
    for kind in TableKind::ALL {
      assert!(kind.path_pattern().starts_with(kind.dir_name()));
    }
  }
}
