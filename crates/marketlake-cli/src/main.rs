//! `marketlake`: maintenance CLI for a marketlake store.
//!
//! # Usage
//!
//! ```
//! marketlake --root ~/data/lake summary
//! marketlake query market_bar --symbol AAPL --start 2024-01-01 --limit 10
//! marketlake import news items.ndjson
//! marketlake sweep news --max-age-days 365
//! ```
//!
//! Configuration is read from `marketlake.toml` (or `--config`) and
//! `MARKETLAKE_*` environment variables, e.g. `MARKETLAKE_ROOT` or
//! `MARKETLAKE_RETENTION_DAYS__NEWS`.

use std::{
  path::{Path, PathBuf},
  process::ExitCode,
};

use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use marketlake_core::{
  query::QueryFilter,
  record::Rows,
  retention::SweepReport,
  store::PartitionStore,
  table::TableKind,
};
use marketlake_parquet::{ParquetStore, StoreConfig};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Exit code for a sweep that completed with per-partition failures.
const SWEEP_FAILED: u8 = 2;

/// How many failed paths a sweep summary prints.
const FAILURE_SAMPLES: usize = 5;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "marketlake", version, about = "Partitioned market data store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "marketlake.toml")]
  config: PathBuf,

  /// Store root; overrides the configured `root`.
  #[arg(long, value_name = "DIR")]
  root: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show every table, its path pattern and natural key.
  Describe,

  /// File count and size per table.
  Summary,

  /// List the partition files of a table.
  Partitions { kind: TableKind },

  /// Print matching rows as JSON lines.
  Query {
    kind: TableKind,
    #[arg(long)]
    symbol: Option<String>,
    #[arg(long)]
    source: Option<String>,
    /// Interval, category, analysis type or metric type.
    #[arg(long)]
    facet: Option<String>,
    /// RFC 3339 instant or YYYY-MM-DD (start of day).
    #[arg(long, value_parser = parse_start)]
    start: Option<DateTime<Utc>>,
    /// RFC 3339 instant or YYYY-MM-DD (end of day).
    #[arg(long, value_parser = parse_end)]
    end: Option<DateTime<Utc>>,
    #[arg(long)]
    limit: Option<usize>,
  },

  /// Store newline-delimited JSON rows of one kind.
  Import { kind: TableKind, file: PathBuf },

  /// Delete expired partitions.
  ///
  /// Without arguments every kind with a configured retention horizon is
  /// swept.
  Sweep {
    kind: Option<TableKind>,
    /// Horizon in days; at least 1. Configure `retention_days` to keep a
    /// table forever.
    #[arg(long, requires = "kind", value_parser = clap::value_parser!(u32).range(1..))]
    max_age_days: Option<u32>,
  },

  /// Remove every partition of a table.
  Drop {
    kind: TableKind,
    /// Confirm the drop.
    #[arg(long)]
    yes: bool,
  },
}

// ─── Entry point ─────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let config = load_config(&cli)?;
  let root = config.root.clone();
  let store = ParquetStore::open(config)
    .with_context(|| format!("failed to open store at {}", root.display()))?;

  run(&store, cli.command)
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
  let settings = config::Config::builder()
    .set_default("root", "~/.marketlake")?
    .add_source(config::File::from(cli.config.as_path()).required(false))
    .add_source(
      config::Environment::with_prefix("MARKETLAKE")
        .prefix_separator("_")
        .separator("__"),
    )
    .set_override_option(
      "root",
      cli.root.as_ref().map(|p| p.to_string_lossy().into_owned()),
    )?
    .build()
    .context("failed to read config file")?;

  let mut config: StoreConfig = settings
    .try_deserialize()
    .context("failed to deserialise StoreConfig")?;
  config.root = expand_tilde(&config.root);
  Ok(config)
}

fn run(store: &ParquetStore, command: Command) -> anyhow::Result<ExitCode> {
  match command {
    Command::Describe => {
      for kind in TableKind::ALL {
        println!("{kind}");
        println!("  path:        {}", kind.path_pattern());
        println!("  natural key: {}", kind.natural_key_fields().join(", "));
        println!("  facet:       {}", kind.facet_name());
        println!("  {}", kind.description());
      }
    }

    Command::Summary => {
      println!("root: {}", store.root().display());
      for table in store.summary()? {
        println!("{:<12} {:>6} files {:>12} bytes", table.kind, table.files, table.bytes);
      }
    }

    Command::Partitions { kind } => {
      for entry in store.partitions(kind)? {
        println!("{:>12}  {}", entry.bytes, entry.key);
      }
    }

    Command::Query { kind, symbol, source, facet, start, end, limit } => {
      let filter = QueryFilter { symbol, source, facet, start, end, limit };
      let rows = store.query(kind, &filter)?;
      for line in rows.to_json_lines()? {
        println!("{line}");
      }
    }

    Command::Import { kind, file } => {
      let text = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
      let rows = Rows::from_json_lines(kind, &text)
        .with_context(|| format!("invalid {kind} rows in {}", file.display()))?;
      for outcome in store.store(rows)? {
        println!(
          "{}  inserted {} skipped {} total {}",
          outcome.key, outcome.inserted, outcome.skipped, outcome.total
        );
      }
    }

    Command::Sweep { kind, max_age_days } => {
      let reports = match (kind, max_age_days) {
        (Some(kind), Some(days)) => {
          vec![store.sweep(kind, TimeDelta::days(i64::from(days)), None)?]
        }
        (Some(kind), None) => match store.retention().max_age(kind) {
          Some(max_age) => vec![store.sweep(kind, max_age, None)?],
          None => {
            println!("{kind}: kept forever, nothing to sweep");
            Vec::new()
          }
        },
        (None, _) => store.sweep_configured(None)?,
      };
      if !print_sweep(&reports) {
        return Ok(ExitCode::from(SWEEP_FAILED));
      }
    }

    Command::Drop { kind, yes } => {
      anyhow::ensure!(yes, "refusing to drop {kind} without --yes");
      let removed = store.drop_table(kind)?;
      println!("dropped {kind}: {removed} partition files removed");
    }
  }

  Ok(ExitCode::SUCCESS)
}

/// Print sweep results. Returns `false` if any partition failed.
fn print_sweep(reports: &[SweepReport]) -> bool {
  let mut clean = true;
  for report in reports {
    println!(
      "{}: examined {} deleted {} failed {} (cutoff {})",
      report.kind,
      report.examined,
      report.deleted.len(),
      report.failures.len(),
      report.cutoff.to_rfc3339(),
    );
    for failure in report.sample_failures(FAILURE_SAMPLES) {
      println!("  failed: {}: {}", failure.path.display(), failure.reason);
    }
    clean &= report.is_clean();
  }
  clean
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn parse_time(s: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
  if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
    return Ok(instant.with_timezone(&Utc));
  }
  let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|_| format!("expected RFC 3339 or YYYY-MM-DD, got {s:?}"))?;
  let time = if end_of_day {
    date.and_hms_micro_opt(23, 59, 59, 999_999)
  } else {
    date.and_hms_opt(0, 0, 0)
  };
  time
    .map(|t| t.and_utc())
    .ok_or_else(|| format!("invalid date {s:?}"))
}

fn parse_start(s: &str) -> Result<DateTime<Utc>, String> { parse_time(s, false) }

fn parse_end(s: &str) -> Result<DateTime<Utc>, String> { parse_time(s, true) }

/// Expand a leading `~/` to `$HOME`.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn dates_cover_whole_days() {
    assert_eq!(
      parse_start("2024-03-01").unwrap(),
      Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    );
    let end = parse_end("2024-03-01").unwrap();
    assert_eq!(
      end,
      Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap()
        + TimeDelta::microseconds(999_999)
    );
  }

  #[test]
  fn rfc3339_is_converted_to_utc() {
    assert_eq!(
      parse_end("2024-03-01T12:00:00+02:00").unwrap(),
      Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    );
    assert!(parse_start("yesterday").is_err());
  }

  #[test]
  fn cli_parses_query_flags() {
    let cli = Cli::try_parse_from([
      "marketlake",
      "--root",
      "/tmp/lake",
      "query",
      "market",
      "--symbol",
      "BTC/USDT",
      "--start",
      "2024-01-01",
      "--limit",
      "5",
    ])
    .unwrap();

    assert_eq!(cli.root, Some(PathBuf::from("/tmp/lake")));
    let Command::Query { kind, symbol, start, limit, .. } = cli.command else {
      panic!("expected query");
    };
    assert_eq!(kind, TableKind::MarketBar);
    assert_eq!(symbol.as_deref(), Some("BTC/USDT"));
    assert!(start.is_some());
    assert_eq!(limit, Some(5));
  }

  #[test]
  fn zero_day_horizon_is_rejected() {
    assert!(
      Cli::try_parse_from(["marketlake", "sweep", "news", "--max-age-days", "0"]).is_err()
    );
    let cli =
      Cli::try_parse_from(["marketlake", "sweep", "news", "--max-age-days", "1"]).unwrap();
    let Command::Sweep { max_age_days, .. } = cli.command else {
      panic!("expected sweep");
    };
    assert_eq!(max_age_days, Some(1));
  }

  #[test]
  fn max_age_requires_a_kind() {
    assert!(Cli::try_parse_from(["marketlake", "sweep", "--max-age-days", "3"]).is_err());
  }

  #[test]
  fn expands_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/lake")), PathBuf::from(home).join("lake"));
    assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
  }
}
