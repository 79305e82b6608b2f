//! Arrow schemas for each table kind.
//!
//! Column names are fixed per kind; every partition file of a kind carries
//! exactly these columns. Timestamps are microseconds in UTC. JSON-valued
//! fields and tag lists are stored as compact JSON text.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use marketlake_core::table::TableKind;

fn timestamp(name: &str) -> Field {
  Field::new(
    name,
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
    false,
  )
}

fn text(name: &str, nullable: bool) -> Field {
  Field::new(name, DataType::Utf8, nullable)
}

fn float(name: &str, nullable: bool) -> Field {
  Field::new(name, DataType::Float64, nullable)
}

pub fn schema(kind: TableKind) -> SchemaRef {
  let fields = match kind {
    TableKind::MarketBar => vec![
      timestamp("timestamp"),
      text("symbol", false),
      text("source", false),
      text("interval", false),
      float("open", false),
      float("high", false),
      float("low", false),
      float("close", false),
      float("volume", false),
      float("vwap", true),
      Field::new("trades", DataType::UInt64, true),
    ],
    TableKind::News => vec![
      timestamp("timestamp"),
      text("source", false),
      text("category", false),
      text("title", false),
      text("link", false),
      text("description", true),
      text("author", true),
      text("tags", false), // JSON array of strings
    ],
    TableKind::Analysis => vec![
      timestamp("timestamp"),
      text("symbol", false),
      text("analysis_type", false),
      text("model_name", false),
      text("model_version", false),
      text("prediction", false),
      float("confidence", false),
      text("features", false), // JSON
      text("metadata", false), // JSON
    ],
    TableKind::Metric => vec![
      timestamp("timestamp"),
      text("symbol", false),
      text("metric_type", false),
      text("metric_name", false),
      float("value", false),
      text("period", false),
      text("metadata", false), // JSON
    ],
  };
  Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn natural_key_columns_exist_in_schema() {
    for kind in TableKind::ALL {
      let schema = schema(kind);
      for field in kind.natural_key_fields() {
        assert!(schema.field_with_name(field).is_ok(), "{kind}: {field}");
      }
      assert!(schema.field_with_name(kind.facet_name()).is_ok());
    }
  }
}
