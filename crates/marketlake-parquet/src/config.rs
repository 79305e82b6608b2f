//! Store configuration.

use std::{path::PathBuf, time::Duration};

use marketlake_core::{retention::RetentionPolicy, table::TableKind};
use serde::Deserialize;

/// Runtime store configuration, usually deserialised from `marketlake.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// Directory holding one subtree per table kind.
  pub root:                  PathBuf,
  #[serde(default)]
  pub retention_days:        RetentionDays,
  /// How long a writer waits for another writer's partition lock.
  #[serde(default = "default_lock_timeout_ms")]
  pub lock_timeout_ms:       u64,
  /// Lock files older than this are treated as left behind by a crashed
  /// writer and removed.
  #[serde(default = "default_stale_lock_after_secs")]
  pub stale_lock_after_secs: u64,
}

/// Retention horizon per table kind, in days. `0` keeps data forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RetentionDays {
  #[serde(default, alias = "market")]
  pub market_bar: u32,
  #[serde(default)]
  pub news:       u32,
  #[serde(default)]
  pub analysis:   u32,
  #[serde(default, alias = "metrics")]
  pub metric:     u32,
}

fn default_lock_timeout_ms() -> u64 { 10_000 }

fn default_stale_lock_after_secs() -> u64 { 600 }

impl StoreConfig {
  /// A configuration rooted at `root` with defaults everywhere else.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root:                  root.into(),
      retention_days:        RetentionDays::default(),
      lock_timeout_ms:       default_lock_timeout_ms(),
      stale_lock_after_secs: default_stale_lock_after_secs(),
    }
  }

  pub fn retention_policy(&self) -> RetentionPolicy {
    let days = self.retention_days;
    RetentionPolicy::keep_forever()
      .with_days(TableKind::MarketBar, days.market_bar)
      .with_days(TableKind::News, days.news)
      .with_days(TableKind::Analysis, days.analysis)
      .with_days(TableKind::Metric, days.metric)
  }

  pub fn lock_timeout(&self) -> Duration {
    Duration::from_millis(self.lock_timeout_ms)
  }

  pub fn stale_lock_after(&self) -> Duration {
    Duration::from_secs(self.stale_lock_after_secs)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeDelta;

  use super::*;

  #[test]
  fn deserialises_with_defaults() {
    let cfg: StoreConfig = serde_json::from_value(serde_json::json!({
      "root": "/tmp/lake",
      "retention_days": { "news": 365 },
    }))
    .unwrap();

    assert_eq!(cfg.lock_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.stale_lock_after(), Duration::from_secs(600));

    let policy = cfg.retention_policy();
    assert_eq!(policy.max_age(TableKind::News), Some(TimeDelta::days(365)));
    assert_eq!(policy.max_age(TableKind::MarketBar), None);
  }
}
