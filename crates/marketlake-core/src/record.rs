//! Row types, one explicit record type per table kind.
//!
//! Rows are immutable once written. A "mutation" of a partition is always a
//! re-derivation of the file from old rows plus new rows minus duplicates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
  Error, Result,
  fingerprint::{Fingerprint, KeyPart},
  partition::PartitionKey,
  table::TableKind,
};

// ─── Row trait ───────────────────────────────────────────────────────────────

/// Behaviour shared by every row type the store accepts.
pub trait Row:
  Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
  const KIND: TableKind;

  /// The row's own semantic timestamp (never the time it was written).
  ///
  /// Stored at microsecond precision. Rows with a finer timestamp are
  /// rejected by [`Row::partition_key`] rather than silently truncated.
  fn timestamp(&self) -> DateTime<Utc>;

  fn symbol(&self) -> Option<&str> { None }

  fn source(&self) -> Option<&str> { None }

  /// The per-kind sub-type the query filter's `facet` matches against
  /// (see [`TableKind::facet_name`]).
  fn facet(&self) -> &str;

  /// The natural-key fields, in [`TableKind::natural_key_fields`] order.
  fn natural_key(&self) -> Vec<KeyPart<'_>>;

  /// Derive the partition this row belongs in, validating the key fields
  /// and the timestamp's precision. `written_at` is only consulted by kinds
  /// partitioned by write batch.
  fn partition_key(&self, written_at: DateTime<Utc>) -> Result<PartitionKey>;

  fn into_rows(rows: Vec<Self>) -> Rows;

  fn from_rows(rows: Rows) -> Result<Vec<Self>>;

  fn fingerprint(&self) -> Fingerprint {
    Fingerprint::of(&self.natural_key())
  }
}

fn require_micros(timestamp: DateTime<Utc>) -> Result<()> {
  if timestamp.timestamp_subsec_nanos() % 1_000 != 0 {
    return Err(Error::InvalidKey(format!(
      "timestamp {} is finer than a microsecond",
      timestamp.to_rfc3339()
    )));
  }
  Ok(())
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str> {
  if value.trim().is_empty() {
    Err(Error::InvalidKey(format!("{field} must not be empty")))
  } else {
    Ok(value)
  }
}

// ─── MarketBar ───────────────────────────────────────────────────────────────

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketBar {
  pub timestamp: DateTime<Utc>,
  pub symbol:    String,
  /// Data vendor, e.g. `yahoo_finance`.
  pub source:    String,
  /// Bar width, e.g. `1d` or `5m`.
  pub interval:  String,
  pub open:      f64,
  pub high:      f64,
  pub low:       f64,
  pub close:     f64,
  pub volume:    f64,
  #[serde(default)]
  pub vwap:      Option<f64>,
  #[serde(default)]
  pub trades:    Option<u64>,
}

impl Row for MarketBar {
  const KIND: TableKind = TableKind::MarketBar;

  fn timestamp(&self) -> DateTime<Utc> { self.timestamp }

  fn symbol(&self) -> Option<&str> { Some(&self.symbol) }

  fn source(&self) -> Option<&str> { Some(&self.source) }

  fn facet(&self) -> &str { &self.interval }

  fn natural_key(&self) -> Vec<KeyPart<'_>> {
    vec![
      KeyPart::Text(&self.symbol),
      KeyPart::Instant(self.timestamp),
      KeyPart::Text(&self.source),
      KeyPart::Text(&self.interval),
    ]
  }

  fn partition_key(&self, _written_at: DateTime<Utc>) -> Result<PartitionKey> {
    require_micros(self.timestamp)?;
    PartitionKey::market_bar(&self.source, &self.symbol, &self.interval)
  }

  fn into_rows(rows: Vec<Self>) -> Rows { Rows::MarketBar(rows) }

  fn from_rows(rows: Rows) -> Result<Vec<Self>> {
    match rows {
      Rows::MarketBar(rows) => Ok(rows),
      other => Err(Error::KindMismatch {
        expected: Self::KIND,
        actual:   other.kind(),
      }),
    }
  }
}

// ─── NewsItem ────────────────────────────────────────────────────────────────

/// A news or RSS item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewsItem {
  /// Publication time of the item. Decides the partition month.
  pub timestamp:   DateTime<Utc>,
  pub source:      String,
  pub category:    String,
  pub title:       String,
  pub link:        String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub author:      Option<String>,
  #[serde(default)]
  pub tags:        Vec<String>,
}

impl Row for NewsItem {
  const KIND: TableKind = TableKind::News;

  fn timestamp(&self) -> DateTime<Utc> { self.timestamp }

  fn source(&self) -> Option<&str> { Some(&self.source) }

  fn facet(&self) -> &str { &self.category }

  fn natural_key(&self) -> Vec<KeyPart<'_>> {
    vec![KeyPart::Text(&self.link), KeyPart::Instant(self.timestamp)]
  }

  fn partition_key(&self, _written_at: DateTime<Utc>) -> Result<PartitionKey> {
    require_micros(self.timestamp)?;
    require("link", &self.link)?;
    PartitionKey::news(&self.source, self.timestamp)
  }

  fn into_rows(rows: Vec<Self>) -> Rows { Rows::News(rows) }

  fn from_rows(rows: Rows) -> Result<Vec<Self>> {
    match rows {
      Rows::News(rows) => Ok(rows),
      other => Err(Error::KindMismatch {
        expected: Self::KIND,
        actual:   other.kind(),
      }),
    }
  }
}

// ─── AnalysisResult ──────────────────────────────────────────────────────────

/// A model output for a symbol at a point in time. The store only keeps
/// these; it never computes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisResult {
  pub timestamp:     DateTime<Utc>,
  pub symbol:        String,
  /// e.g. `sentiment`.
  pub analysis_type: String,
  pub model_name:    String,
  pub model_version: String,
  /// The model's label or rendered value, e.g. `positive`.
  pub prediction:    String,
  pub confidence:    f64,
  #[serde(default)]
  pub features:      serde_json::Value,
  #[serde(default)]
  pub metadata:      serde_json::Value,
}

impl Row for AnalysisResult {
  const KIND: TableKind = TableKind::Analysis;

  fn timestamp(&self) -> DateTime<Utc> { self.timestamp }

  fn symbol(&self) -> Option<&str> { Some(&self.symbol) }

  fn facet(&self) -> &str { &self.analysis_type }

  fn natural_key(&self) -> Vec<KeyPart<'_>> {
    vec![
      KeyPart::Text(&self.symbol),
      KeyPart::Instant(self.timestamp),
      KeyPart::Text(&self.analysis_type),
      KeyPart::Text(&self.model_version),
    ]
  }

  fn partition_key(&self, written_at: DateTime<Utc>) -> Result<PartitionKey> {
    require_micros(self.timestamp)?;
    require("model_version", &self.model_version)?;
    PartitionKey::analysis(&self.analysis_type, &self.symbol, written_at)
  }

  fn into_rows(rows: Vec<Self>) -> Rows { Rows::Analysis(rows) }

  fn from_rows(rows: Rows) -> Result<Vec<Self>> {
    match rows {
      Rows::Analysis(rows) => Ok(rows),
      other => Err(Error::KindMismatch {
        expected: Self::KIND,
        actual:   other.kind(),
      }),
    }
  }
}

// ─── Metric ──────────────────────────────────────────────────────────────────

/// A derived metric value, e.g. a rolling volatility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metric {
  pub timestamp:   DateTime<Utc>,
  pub symbol:      String,
  pub metric_type: String,
  pub metric_name: String,
  pub value:       f64,
  /// Look-back window the metric was computed over, e.g. `20d`.
  pub period:      String,
  #[serde(default)]
  pub metadata:    serde_json::Value,
}

impl Row for Metric {
  const KIND: TableKind = TableKind::Metric;

  fn timestamp(&self) -> DateTime<Utc> { self.timestamp }

  fn symbol(&self) -> Option<&str> { Some(&self.symbol) }

  fn facet(&self) -> &str { &self.metric_type }

  fn natural_key(&self) -> Vec<KeyPart<'_>> {
    vec![
      KeyPart::Text(&self.symbol),
      KeyPart::Instant(self.timestamp),
      KeyPart::Text(&self.metric_type),
    ]
  }

  fn partition_key(&self, _written_at: DateTime<Utc>) -> Result<PartitionKey> {
    require_micros(self.timestamp)?;
    PartitionKey::metric(&self.metric_type, &self.symbol)
  }

  fn into_rows(rows: Vec<Self>) -> Rows { Rows::Metric(rows) }

  fn from_rows(rows: Rows) -> Result<Vec<Self>> {
    match rows {
      Rows::Metric(rows) => Ok(rows),
      other => Err(Error::KindMismatch {
        expected: Self::KIND,
        actual:   other.kind(),
      }),
    }
  }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// A batch of rows of a single table kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum Rows {
  MarketBar(Vec<MarketBar>),
  News(Vec<NewsItem>),
  Analysis(Vec<AnalysisResult>),
  Metric(Vec<Metric>),
}

impl Rows {
  pub fn empty(kind: TableKind) -> Self {
    match kind {
      TableKind::MarketBar => Self::MarketBar(Vec::new()),
      TableKind::News => Self::News(Vec::new()),
      TableKind::Analysis => Self::Analysis(Vec::new()),
      TableKind::Metric => Self::Metric(Vec::new()),
    }
  }

  pub fn kind(&self) -> TableKind {
    match self {
      Self::MarketBar(_) => TableKind::MarketBar,
      Self::News(_) => TableKind::News,
      Self::Analysis(_) => TableKind::Analysis,
      Self::Metric(_) => TableKind::Metric,
    }
  }

  pub fn len(&self) -> usize {
    match self {
      Self::MarketBar(rows) => rows.len(),
      Self::News(rows) => rows.len(),
      Self::Analysis(rows) => rows.len(),
      Self::Metric(rows) => rows.len(),
    }
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Timestamp of the newest row, or `None` for an empty batch.
  pub fn newest(&self) -> Option<DateTime<Utc>> {
    fn newest<R: Row>(rows: &[R]) -> Option<DateTime<Utc>> {
      rows.iter().map(Row::timestamp).max()
    }

    match self {
      Self::MarketBar(rows) => newest(rows),
      Self::News(rows) => newest(rows),
      Self::Analysis(rows) => newest(rows),
      Self::Metric(rows) => newest(rows),
    }
  }

  /// Parse newline-delimited JSON into rows of `kind`. Blank lines are
  /// ignored; unknown or missing fields are rejected.
  pub fn from_json_lines(kind: TableKind, text: &str) -> Result<Self> {
    fn parse<R: Row>(text: &str) -> Result<Rows> {
      let rows = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<R>)
        .collect::<Result<Vec<_>, _>>()?;
      Ok(R::into_rows(rows))
    }

    match kind {
      TableKind::MarketBar => parse::<MarketBar>(text),
      TableKind::News => parse::<NewsItem>(text),
      TableKind::Analysis => parse::<AnalysisResult>(text),
      TableKind::Metric => parse::<Metric>(text),
    }
  }

  /// Serialise each row as one compact JSON object per line.
  pub fn to_json_lines(&self) -> Result<Vec<String>> {
    fn render<R: Row>(rows: &[R]) -> Result<Vec<String>> {
      rows
        .iter()
        .map(|row| serde_json::to_string(row).map_err(Error::from))
        .collect()
    }

    match self {
      Self::MarketBar(rows) => render(rows),
      Self::News(rows) => render(rows),
      Self::Analysis(rows) => render(rows),
      Self::Metric(rows) => render(rows),
    }
  }
}
