//! Reading and atomically replacing a single partition file.

use std::{fs::File, io, path::Path};

use marketlake_core::{record::Rows, table::TableKind};
use parquet::{
  arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
  basic::Compression,
  file::properties::WriterProperties,
};

use crate::{
  Error, Result,
  encode::{decode_into, encode},
};

/// Read every row of a partition file.
///
/// Any failure (missing or unreadable file, corrupt Parquet, unexpected
/// schema) is reported as [`Error::PartitionUnavailable`].
pub fn read_segment(path: &Path, kind: TableKind) -> Result<Rows> {
  let file = File::open(path).map_err(|e| Error::unavailable(path, e))?;
  decode_file(path, kind, file)
}

/// Like [`read_segment`], but a file that no longer exists yields `None`.
///
/// For readers racing a sweep or a drop: a listed partition that vanished
/// before it was opened was deleted, not damaged. Once opened, the file
/// stays readable even if it is unlinked.
pub fn read_segment_if_present(path: &Path, kind: TableKind) -> Result<Option<Rows>> {
  let file = match File::open(path) {
    Ok(file) => file,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      tracing::debug!(path = %path.display(), "partition vanished before read");
      return Ok(None);
    }
    Err(e) => return Err(Error::unavailable(path, e)),
  };
  decode_file(path, kind, file).map(Some)
}

fn decode_file(path: &Path, kind: TableKind, file: File) -> Result<Rows> {
  let reader = ParquetRecordBatchReaderBuilder::try_new(file)
    .and_then(|builder| builder.build())
    .map_err(|e| Error::unavailable(path, e))?;

  let mut rows = Rows::empty(kind);
  for batch in reader {
    let batch = batch.map_err(|e| Error::unavailable(path, e))?;
    decode_into(&mut rows, &batch).map_err(|e| Error::unavailable(path, e))?;
  }

  tracing::debug!(path = %path.display(), rows = rows.len(), "read partition");
  Ok(rows)
}

/// Whether a partition file exists. An error probing the path is surfaced,
/// not folded into "absent".
pub fn exists(path: &Path) -> Result<bool> {
  path.try_exists().map_err(|e| Error::unavailable(path, e))
}

/// Replace the partition file at `path` with `rows`.
///
/// The rows are written to a hidden temporary file in the same directory,
/// flushed to disk, then renamed over `path`. Readers see either the old
/// file or the new one. Callers must hold the partition lock.
pub fn write_segment(path: &Path, rows: &Rows) -> Result<()> {
  let dir = path.parent().ok_or_else(|| {
    Error::Io {
      path:   path.to_path_buf(),
      source: io::Error::new(io::ErrorKind::InvalidInput, "partition has no parent"),
    }
  })?;
  std::fs::create_dir_all(dir).map_err(Error::io(dir))?;

  let batch = encode(rows)?;
  let props = WriterProperties::builder()
    .set_compression(Compression::SNAPPY)
    .build();

  let mut tmp = tempfile::Builder::new()
    .prefix(".")
    .suffix(".tmp")
    .tempfile_in(dir)
    .map_err(Error::io(dir))?;

  let mut writer = ArrowWriter::try_new(tmp.as_file_mut(), batch.schema(), Some(props))?;
  writer.write(&batch)?;
  writer.close()?;
  tmp.as_file().sync_all().map_err(Error::io(tmp.path()))?;

  tmp.persist(path).map_err(|e| Error::Io {
    path:   path.to_path_buf(),
    source: e.error,
  })?;

  tracing::debug!(path = %path.display(), rows = rows.len(), "wrote partition");
  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use marketlake_core::record::Metric;

  use super::*;

  fn metrics() -> Rows {
    Rows::Metric(vec![Metric {
      timestamp:   Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
      symbol:      "SPY".into(),
      metric_type: "volatility".into(),
      metric_name: "realized_vol".into(),
      value:       0.2,
      period:      "20d".into(),
      metadata:    serde_json::Value::Null,
    }])
  }

  #[test]
  fn missing_file_is_absent_only_for_the_lenient_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics/volatility/SPY.parquet");

    assert!(read_segment_if_present(&path, TableKind::Metric).unwrap().is_none());
    assert!(matches!(
      read_segment(&path, TableKind::Metric),
      Err(Error::PartitionUnavailable { .. })
    ));
  }

  #[test]
  fn corrupt_file_is_unavailable_for_both_readers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SPY.parquet");
    std::fs::write(&path, b"not parquet").unwrap();

    assert!(matches!(
      read_segment_if_present(&path, TableKind::Metric),
      Err(Error::PartitionUnavailable { .. })
    ));
  }

  #[test]
  fn written_segment_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics/volatility/SPY.parquet");

    write_segment(&path, &metrics()).unwrap();
    assert_eq!(read_segment_if_present(&path, TableKind::Metric).unwrap(), Some(metrics()));
  }
}
