//! Row fingerprints for deduplication.
//!
//! A fingerprint is a SHA-256 digest over a row's natural-key fields only,
//! never the full payload, so two rows with the same identity but drifted
//! payload collide on purpose. Each part is tagged and length-prefixed so
//! `("ab", "c")` and `("a", "bc")` hash differently.

use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// One natural-key field, borrowed from the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPart<'a> {
  Text(&'a str),
  Instant(DateTime<Utc>),
}

/// Hex-encoded SHA-256 over a natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
  pub fn of(parts: &[KeyPart<'_>]) -> Self {
    let mut hasher = Sha256::new();
    for part in parts {
      match part {
        KeyPart::Text(s) => {
          hasher.update([0u8]);
          hasher.update((s.len() as u64).to_le_bytes());
          hasher.update(s.as_bytes());
        }
        KeyPart::Instant(ts) => {
          hasher.update([1u8]);
          hasher.update(ts.timestamp_micros().to_le_bytes());
        }
      }
    }
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn stable_for_equal_parts() {
    let ts = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
    let a = Fingerprint::of(&[KeyPart::Text("AAPL"), KeyPart::Instant(ts)]);
    let b = Fingerprint::of(&[KeyPart::Text("AAPL"), KeyPart::Instant(ts)]);
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 64);
  }

  #[test]
  fn field_boundaries_matter() {
    let a = Fingerprint::of(&[KeyPart::Text("ab"), KeyPart::Text("c")]);
    let b = Fingerprint::of(&[KeyPart::Text("a"), KeyPart::Text("bc")]);
    assert_ne!(a, b);
  }

  #[test]
  fn timestamps_compare_at_microsecond_precision() {
    let ts = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
    let later = ts + chrono::TimeDelta::microseconds(1);
    assert_ne!(
      Fingerprint::of(&[KeyPart::Instant(ts)]),
      Fingerprint::of(&[KeyPart::Instant(later)]),
    );
  }
}
