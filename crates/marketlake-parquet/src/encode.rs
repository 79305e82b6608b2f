//! Conversion between row types and Arrow record batches.
//!
//! Decoding is strict: a missing column, a column of the wrong type, or a
//! null in a required column is a [`Error::Schema`] error rather than a
//! silently defaulted value.

use std::sync::Arc;

use arrow::{
  array::{
    Array, ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray,
    UInt64Array,
  },
  record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use marketlake_core::record::{AnalysisResult, MarketBar, Metric, NewsItem, Row, Rows};
use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result, schema::schema};

// ─── Encoding ────────────────────────────────────────────────────────────────

fn timestamps<R: Row>(rows: &[R]) -> ArrayRef {
  let micros: Vec<i64> =
    rows.iter().map(|r| r.timestamp().timestamp_micros()).collect();
  Arc::new(TimestampMicrosecondArray::from(micros).with_timezone("UTC"))
}

fn texts<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
  Arc::new(StringArray::from_iter_values(values))
}

fn optional_texts<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
  Arc::new(values.collect::<StringArray>())
}

fn floats(values: impl Iterator<Item = f64>) -> ArrayRef {
  Arc::new(Float64Array::from(values.collect::<Vec<_>>()))
}

fn json_texts<'a, T: Serialize + 'a>(
  values: impl Iterator<Item = &'a T>,
) -> Result<ArrayRef> {
  let encoded = values
    .map(serde_json::to_string)
    .collect::<Result<Vec<_>, _>>()?;
  Ok(Arc::new(StringArray::from(encoded)))
}

/// Encode a batch of rows as one Arrow record batch with the kind's schema.
pub fn encode(rows: &Rows) -> Result<RecordBatch> {
  let columns: Vec<ArrayRef> = match rows {
    Rows::MarketBar(rows) => vec![
      timestamps(rows),
      texts(rows.iter().map(|r| r.symbol.as_str())),
      texts(rows.iter().map(|r| r.source.as_str())),
      texts(rows.iter().map(|r| r.interval.as_str())),
      floats(rows.iter().map(|r| r.open)),
      floats(rows.iter().map(|r| r.high)),
      floats(rows.iter().map(|r| r.low)),
      floats(rows.iter().map(|r| r.close)),
      floats(rows.iter().map(|r| r.volume)),
      Arc::new(Float64Array::from(rows.iter().map(|r| r.vwap).collect::<Vec<_>>())),
      Arc::new(UInt64Array::from(rows.iter().map(|r| r.trades).collect::<Vec<_>>())),
    ],
    Rows::News(rows) => vec![
      timestamps(rows),
      texts(rows.iter().map(|r| r.source.as_str())),
      texts(rows.iter().map(|r| r.category.as_str())),
      texts(rows.iter().map(|r| r.title.as_str())),
      texts(rows.iter().map(|r| r.link.as_str())),
      optional_texts(rows.iter().map(|r| r.description.as_deref())),
      optional_texts(rows.iter().map(|r| r.author.as_deref())),
      json_texts(rows.iter().map(|r| &r.tags))?,
    ],
    Rows::Analysis(rows) => vec![
      timestamps(rows),
      texts(rows.iter().map(|r| r.symbol.as_str())),
      texts(rows.iter().map(|r| r.analysis_type.as_str())),
      texts(rows.iter().map(|r| r.model_name.as_str())),
      texts(rows.iter().map(|r| r.model_version.as_str())),
      texts(rows.iter().map(|r| r.prediction.as_str())),
      floats(rows.iter().map(|r| r.confidence)),
      json_texts(rows.iter().map(|r| &r.features))?,
      json_texts(rows.iter().map(|r| &r.metadata))?,
    ],
    Rows::Metric(rows) => vec![
      timestamps(rows),
      texts(rows.iter().map(|r| r.symbol.as_str())),
      texts(rows.iter().map(|r| r.metric_type.as_str())),
      texts(rows.iter().map(|r| r.metric_name.as_str())),
      floats(rows.iter().map(|r| r.value)),
      texts(rows.iter().map(|r| r.period.as_str())),
      json_texts(rows.iter().map(|r| &r.metadata))?,
    ],
  };

  Ok(RecordBatch::try_new(schema(rows.kind()), columns)?)
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// A named, typed view of one column.
struct Col<'a, A> {
  name:  &'a str,
  array: &'a A,
}

fn column<'a, A: Array + 'static>(
  batch: &'a RecordBatch,
  name: &'a str,
) -> Result<Col<'a, A>> {
  let array = batch
    .column_by_name(name)
    .and_then(|c| c.as_any().downcast_ref::<A>())
    .ok_or_else(|| Error::Schema(format!("missing or mistyped column {name:?}")))?;
  Ok(Col { name, array })
}

impl<A: Array> Col<'_, A> {
  fn required(&self, i: usize) -> Result<()> {
    if self.array.is_null(i) {
      Err(Error::Schema(format!("null in required column {:?}", self.name)))
    } else {
      Ok(())
    }
  }
}

impl Col<'_, StringArray> {
  fn text(&self, i: usize) -> Result<String> {
    self.required(i)?;
    Ok(self.array.value(i).to_string())
  }

  fn optional_text(&self, i: usize) -> Option<String> {
    (!self.array.is_null(i)).then(|| self.array.value(i).to_string())
  }

  fn json<T: DeserializeOwned>(&self, i: usize) -> Result<T> {
    self.required(i)?;
    Ok(serde_json::from_str(self.array.value(i))?)
  }
}

impl Col<'_, Float64Array> {
  fn float(&self, i: usize) -> Result<f64> {
    self.required(i)?;
    Ok(self.array.value(i))
  }

  fn optional_float(&self, i: usize) -> Option<f64> {
    (!self.array.is_null(i)).then(|| self.array.value(i))
  }
}

impl Col<'_, UInt64Array> {
  fn optional_uint(&self, i: usize) -> Option<u64> {
    (!self.array.is_null(i)).then(|| self.array.value(i))
  }
}

impl Col<'_, TimestampMicrosecondArray> {
  fn instant(&self, i: usize) -> Result<DateTime<Utc>> {
    self.required(i)?;
    let micros = self.array.value(i);
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
      Error::Schema(format!("{:?} out of range: {micros}", self.name))
    })
  }
}

fn decode_market(batch: &RecordBatch, out: &mut Vec<MarketBar>) -> Result<()> {
  let timestamp = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
  let symbol = column::<StringArray>(batch, "symbol")?;
  let source = column::<StringArray>(batch, "source")?;
  let interval = column::<StringArray>(batch, "interval")?;
  let open = column::<Float64Array>(batch, "open")?;
  let high = column::<Float64Array>(batch, "high")?;
  let low = column::<Float64Array>(batch, "low")?;
  let close = column::<Float64Array>(batch, "close")?;
  let volume = column::<Float64Array>(batch, "volume")?;
  let vwap = column::<Float64Array>(batch, "vwap")?;
  let trades = column::<UInt64Array>(batch, "trades")?;

  for i in 0..batch.num_rows() {
    out.push(MarketBar {
      timestamp: timestamp.instant(i)?,
      symbol:    symbol.text(i)?,
      source:    source.text(i)?,
      interval:  interval.text(i)?,
      open:      open.float(i)?,
      high:      high.float(i)?,
      low:       low.float(i)?,
      close:     close.float(i)?,
      volume:    volume.float(i)?,
      vwap:      vwap.optional_float(i),
      trades:    trades.optional_uint(i),
    });
  }
  Ok(())
}

fn decode_news(batch: &RecordBatch, out: &mut Vec<NewsItem>) -> Result<()> {
  let timestamp = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
  let source = column::<StringArray>(batch, "source")?;
  let category = column::<StringArray>(batch, "category")?;
  let title = column::<StringArray>(batch, "title")?;
  let link = column::<StringArray>(batch, "link")?;
  let description = column::<StringArray>(batch, "description")?;
  let author = column::<StringArray>(batch, "author")?;
  let tags = column::<StringArray>(batch, "tags")?;

  for i in 0..batch.num_rows() {
    out.push(NewsItem {
      timestamp:   timestamp.instant(i)?,
      source:      source.text(i)?,
      category:    category.text(i)?,
      title:       title.text(i)?,
      link:        link.text(i)?,
      description: description.optional_text(i),
      author:      author.optional_text(i),
      tags:        tags.json(i)?,
    });
  }
  Ok(())
}

fn decode_analysis(batch: &RecordBatch, out: &mut Vec<AnalysisResult>) -> Result<()> {
  let timestamp = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
  let symbol = column::<StringArray>(batch, "symbol")?;
  let analysis_type = column::<StringArray>(batch, "analysis_type")?;
  let model_name = column::<StringArray>(batch, "model_name")?;
  let model_version = column::<StringArray>(batch, "model_version")?;
  let prediction = column::<StringArray>(batch, "prediction")?;
  let confidence = column::<Float64Array>(batch, "confidence")?;
  let features = column::<StringArray>(batch, "features")?;
  let metadata = column::<StringArray>(batch, "metadata")?;

  for i in 0..batch.num_rows() {
    out.push(AnalysisResult {
      timestamp:     timestamp.instant(i)?,
      symbol:        symbol.text(i)?,
      analysis_type: analysis_type.text(i)?,
      model_name:    model_name.text(i)?,
      model_version: model_version.text(i)?,
      prediction:    prediction.text(i)?,
      confidence:    confidence.float(i)?,
      features:      features.json(i)?,
      metadata:      metadata.json(i)?,
    });
  }
  Ok(())
}

fn decode_metric(batch: &RecordBatch, out: &mut Vec<Metric>) -> Result<()> {
  let timestamp = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
  let symbol = column::<StringArray>(batch, "symbol")?;
  let metric_type = column::<StringArray>(batch, "metric_type")?;
  let metric_name = column::<StringArray>(batch, "metric_name")?;
  let value = column::<Float64Array>(batch, "value")?;
  let period = column::<StringArray>(batch, "period")?;
  let metadata = column::<StringArray>(batch, "metadata")?;

  for i in 0..batch.num_rows() {
    out.push(Metric {
      timestamp:   timestamp.instant(i)?,
      symbol:      symbol.text(i)?,
      metric_type: metric_type.text(i)?,
      metric_name: metric_name.text(i)?,
      value:       value.float(i)?,
      period:      period.text(i)?,
      metadata:    metadata.json(i)?,
    });
  }
  Ok(())
}

/// Decode `batch` and append its rows to `rows`, whose variant decides the
/// expected schema.
pub fn decode_into(rows: &mut Rows, batch: &RecordBatch) -> Result<()> {
  match rows {
    Rows::MarketBar(out) => decode_market(batch, out),
    Rows::News(out) => decode_news(batch, out),
    Rows::Analysis(out) => decode_analysis(batch, out),
    Rows::Metric(out) => decode_metric(batch, out),
  }
}
