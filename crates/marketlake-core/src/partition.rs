//! The partition router.
//!
//! A [`PartitionKey`] names exactly one partition file. Rendering a key to a
//! relative path and parsing a relative path back into a key are exact
//! inverses, so the writer, the query façade and the retention sweeper all
//! agree on where a row lives.

use std::{
  fmt,
  path::{Component, Path, PathBuf},
};

use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::Serialize;

use crate::{Error, Result, record::Row, table::TableKind};

/// Extension of every partition file.
pub const PARTITION_EXTENSION: &str = "parquet";

const BATCH_FORMAT: &str = "%Y%m%dT%H%M%S_%6f";

// ─── Key ─────────────────────────────────────────────────────────────────────

/// The coarse key shared by every row in one partition file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionKey {
  MarketBar {
    source:   String,
    symbol:   String,
    interval: String,
  },
  /// Year and month always come from the item's own publication time.
  News { source: String, year: i32, month: u32 },
  Analysis {
    analysis_type: String,
    symbol:        String,
    /// When the batch was written. Each batch gets its own file.
    batch:         DateTime<Utc>,
  },
  Metric { metric_type: String, symbol: String },
}

impl PartitionKey {
  pub fn market_bar(source: &str, symbol: &str, interval: &str) -> Result<Self> {
    Ok(Self::MarketBar {
      source:   component("source", source)?,
      symbol:   component("symbol", symbol)?,
      interval: component("interval", interval)?,
    })
  }

  pub fn news(source: &str, published_at: DateTime<Utc>) -> Result<Self> {
    Ok(Self::News {
      source: component("source", source)?,
      year:   published_at.year(),
      month:  published_at.month(),
    })
  }

  pub fn analysis(
    analysis_type: &str,
    symbol: &str,
    batch: DateTime<Utc>,
  ) -> Result<Self> {
    // The file name only carries microseconds.
    let batch = DateTime::from_timestamp_micros(batch.timestamp_micros())
      .ok_or_else(|| Error::InvalidKey(format!("batch time out of range: {batch}")))?;
    Ok(Self::Analysis {
      analysis_type: component("analysis_type", analysis_type)?,
      symbol: component("symbol", symbol)?,
      batch,
    })
  }

  pub fn metric(metric_type: &str, symbol: &str) -> Result<Self> {
    Ok(Self::Metric {
      metric_type: component("metric_type", metric_type)?,
      symbol:      component("symbol", symbol)?,
    })
  }

  pub fn kind(&self) -> TableKind {
    match self {
      Self::MarketBar { .. } => TableKind::MarketBar,
      Self::News { .. } => TableKind::News,
      Self::Analysis { .. } => TableKind::Analysis,
      Self::Metric { .. } => TableKind::Metric,
    }
  }

  pub fn source(&self) -> Option<&str> {
    match self {
      Self::MarketBar { source, .. } | Self::News { source, .. } => Some(source),
      _ => None,
    }
  }

  pub fn symbol(&self) -> Option<&str> {
    match self {
      Self::MarketBar { symbol, .. }
      | Self::Analysis { symbol, .. }
      | Self::Metric { symbol, .. } => Some(symbol),
      Self::News { .. } => None,
    }
  }

  /// The facet value fixed by this key, if the kind partitions on it.
  pub fn facet(&self) -> Option<&str> {
    match self {
      Self::MarketBar { interval, .. } => Some(interval),
      Self::Analysis { analysis_type, .. } => Some(analysis_type),
      Self::Metric { metric_type, .. } => Some(metric_type),
      Self::News { .. } => None,
    }
  }

  /// Inclusive time range every row in the partition falls into, when the
  /// key itself carries time. Only news partitions do; an analysis batch
  /// time is write time and says nothing about row timestamps.
  pub fn time_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let Self::News { year, month, .. } = self else {
      return None;
    };
    let start = Utc.with_ymd_and_hms(*year, *month, 1, 0, 0, 0).single()?;
    let (next_year, next_month) =
      if *month == 12 { (year + 1, 1) } else { (*year, month + 1) };
    let next = Utc
      .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
      .single()?;
    Some((start, next - TimeDelta::microseconds(1)))
  }

  /// The same analysis key one microsecond later; other kinds are returned
  /// unchanged.
  pub fn next_batch(&self) -> Self {
    match self {
      Self::Analysis { analysis_type, symbol, batch } => Self::Analysis {
        analysis_type: analysis_type.clone(),
        symbol:        symbol.clone(),
        batch:         *batch + TimeDelta::microseconds(1),
      },
      other => other.clone(),
    }
  }

  // ── Routing ────────────────────────────────────────────────────────────

  /// Path of the partition file relative to the store root.
  pub fn relative_path(&self) -> PathBuf {
    let mut path = PathBuf::from(self.kind().dir_name());
    let file = match self {
      Self::MarketBar { source, symbol, interval } => {
        path.push(escape(source));
        path.push(escape(symbol));
        escape(interval)
      }
      Self::News { source, year, month } => {
        path.push(escape(source));
        path.push(format!("{year:04}"));
        format!("{month:02}")
      }
      Self::Analysis { analysis_type, symbol, batch } => {
        path.push(escape(analysis_type));
        path.push(escape(symbol));
        batch.format(BATCH_FORMAT).to_string()
      }
      Self::Metric { metric_type, symbol } => {
        path.push(escape(metric_type));
        escape(symbol)
      }
    };
    path.push(format!("{file}.{PARTITION_EXTENSION}"));
    path
  }

  /// Parse a path relative to the store root back into a key.
  pub fn parse(kind: TableKind, relative: &Path) -> Result<Self> {
    let invalid = || {
      Error::InvalidKey(format!(
        "{} is not a {kind} partition path",
        relative.display()
      ))
    };

    let mut parts = Vec::new();
    for c in relative.components() {
      match c {
        Component::Normal(s) => parts.push(s.to_str().ok_or_else(invalid)?),
        _ => return Err(invalid()),
      }
    }

    let [dir, middle @ .., file] = parts.as_slice() else {
      return Err(invalid());
    };
    if *dir != kind.dir_name() {
      return Err(invalid());
    }
    let stem = file
      .strip_suffix(PARTITION_EXTENSION)
      .and_then(|s| s.strip_suffix('.'))
      .ok_or_else(invalid)?;

    match (kind, middle) {
      (TableKind::MarketBar, [source, symbol]) => Self::market_bar(
        &unescape(source)?,
        &unescape(symbol)?,
        &unescape(stem)?,
      ),
      (TableKind::News, [source, year]) => {
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = stem.parse().map_err(|_| invalid())?;
        if stem.len() != 2 || !(1..=12).contains(&month) {
          return Err(invalid());
        }
        Ok(Self::News { source: component("source", &unescape(source)?)?, year, month })
      }
      (TableKind::Analysis, [analysis_type, symbol]) => {
        let batch = NaiveDateTime::parse_from_str(stem, BATCH_FORMAT)
          .map_err(|_| invalid())?
          .and_utc();
        Self::analysis(&unescape(analysis_type)?, &unescape(symbol)?, batch)
      }
      (TableKind::Metric, [metric_type]) => {
        Self::metric(&unescape(metric_type)?, &unescape(stem)?)
      }
      _ => Err(invalid()),
    }
  }
}

impl fmt::Display for PartitionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let path = self.relative_path();
    let parts: Vec<_> = path.iter().map(|s| s.to_string_lossy()).collect();
    f.write_str(&parts.join("/"))
  }
}

/// Resolve the partition file a row belongs in, relative to the store root.
pub fn route<R: Row>(row: &R, written_at: DateTime<Utc>) -> Result<PathBuf> {
  Ok(row.partition_key(written_at)?.relative_path())
}

// ─── Path components ─────────────────────────────────────────────────────────

fn component(field: &str, value: &str) -> Result<String> {
  if value.trim().is_empty() {
    return Err(Error::InvalidKey(format!("{field} must not be empty")));
  }
  Ok(value.to_string())
}

fn needs_escape(c: char, leading: bool) -> bool {
  matches!(c, '%' | '/' | '\\' | ':') || c.is_control() || (leading && c == '.')
}

/// Escape a key value into a single path component. Injective: `%` itself
/// is escaped, and a leading `.` is escaped so no component is hidden, `.`,
/// or `..`.
pub fn escape(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for (i, c) in value.chars().enumerate() {
    if needs_escape(c, i == 0) {
      let mut buf = [0u8; 4];
      for b in c.encode_utf8(&mut buf).bytes() {
        out.push_str(&format!("%{b:02X}"));
      }
    } else {
      out.push(c);
    }
  }
  out
}

/// Inverse of [`escape`].
pub fn unescape(component: &str) -> Result<String> {
  let invalid = || Error::InvalidKey(format!("bad escape in {component:?}"));
  let bytes = component.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' {
      let hex = bytes.get(i + 1..i + 3).ok_or_else(invalid)?;
      let hex = std::str::from_utf8(hex).map_err(|_| invalid())?;
      out.push(u8::from_str_radix(hex, 16).map_err(|_| invalid())?);
      i += 3;
    } else {
      out.push(bytes[i]);
      i += 1;
    }
  }
  String::from_utf8(out).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn roundtrip(key: &PartitionKey) {
    let path = key.relative_path();
    let parsed = PartitionKey::parse(key.kind(), &path).unwrap();
    assert_eq!(&parsed, key, "path {}", path.display());
  }

  #[test]
  fn market_path_layout() {
    let key = PartitionKey::market_bar("yahoo_finance", "AAPL", "1d").unwrap();
    assert_eq!(key.to_string(), "market/yahoo_finance/AAPL/1d.parquet");
    roundtrip(&key);
  }

  #[test]
  fn news_partition_uses_item_time() {
    let published = Utc.with_ymd_and_hms(2024, 9, 30, 23, 59, 59).unwrap();
    let key = PartitionKey::news("reuters", published).unwrap();
    assert_eq!(key.to_string(), "news/reuters/2024/09.parquet");
    roundtrip(&key);
  }

  #[test]
  fn analysis_batch_has_microsecond_file_name() {
    let batch = Utc.with_ymd_and_hms(2024, 1, 3, 10, 15, 0).unwrap()
      + TimeDelta::microseconds(42);
    let key = PartitionKey::analysis("sentiment", "MSFT", batch).unwrap();
    assert_eq!(
      key.to_string(),
      "analysis/sentiment/MSFT/20240103T101500_000042.parquet"
    );
    roundtrip(&key);
    roundtrip(&key.next_batch());
    assert_ne!(key.next_batch().relative_path(), key.relative_path());
  }

  #[test]
  fn metric_path_layout() {
    let key = PartitionKey::metric("volatility", "SPY").unwrap();
    assert_eq!(key.to_string(), "metrics/volatility/SPY.parquet");
    roundtrip(&key);
  }

  #[test]
  fn awkward_symbols_are_escaped_and_recovered() {
    for symbol in ["BTC/USDT", "^GSPC", "BRK.B", ".hidden", "..", "100%", "a:b\\c"] {
      let key = PartitionKey::market_bar("binance", symbol, "1h").unwrap();
      let path = key.relative_path();
      assert_eq!(path.components().count(), 4, "{symbol}");
      roundtrip(&key);
    }
  }

  #[test]
  fn empty_fields_are_invalid() {
    assert!(matches!(
      PartitionKey::market_bar("", "AAPL", "1d"),
      Err(Error::InvalidKey(_))
    ));
    assert!(matches!(PartitionKey::metric("vol", " "), Err(Error::InvalidKey(_))));
  }

  #[test]
  fn foreign_paths_do_not_parse() {
    let bad = [
      "market/yahoo/AAPL/1d.csv",
      "news/reuters/2024/13.parquet",
      "news/reuters/2024/9.parquet",
      "metrics/vol/SPY/extra.parquet",
      "market/yahoo/AAPL/.1d.parquet.tmp",
      "news/../2024/01.parquet",
    ];
    for p in bad {
      let kind = p.split('/').next().unwrap().parse().unwrap();
      assert!(PartitionKey::parse(kind, Path::new(p)).is_err(), "{p}");
    }
  }

  #[test]
  fn news_bounds_cover_the_whole_month() {
    let key = PartitionKey::News { source: "x".into(), year: 2023, month: 12 };
    let (start, end) = key.time_bounds().unwrap();
    assert_eq!(start, Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
    assert_eq!(
      end,
      Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() - TimeDelta::microseconds(1)
    );
  }
}
