//! Advisory per-partition write locks.
//!
//! A lock is a `{partition}.lock` file created with `create_new`, so at most
//! one writer (in any process) holds the read-modify-write-rename section
//! for a partition. Readers never take it.
//!
//! Each lock file holds a token unique to its holder. A holder only removes
//! the file if it still carries its own token, and a stale lock is broken by
//! renaming it aside first, so of several waiters only one can break it.

use std::{
  ffi::OsString,
  fs::{self, OpenOptions},
  io::{ErrorKind, Write as _},
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
  thread,
  time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Held for the duration of a write or delete; released on drop.
#[derive(Debug)]
pub struct PartitionLock {
  path:  PathBuf,
  token: String,
}

pub fn lock_path(partition: &Path) -> PathBuf {
  let mut name = OsString::from(partition.as_os_str());
  name.push(".lock");
  PathBuf::from(name)
}

/// `{pid}-{start nanos}-{counter}`: unique across processes and across
/// acquisitions within one process.
fn new_token() -> String {
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or_default();
  let n = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
  format!("{}-{nanos}-{n}", std::process::id())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let mut name = OsString::from(path.as_os_str());
  name.push(suffix);
  PathBuf::from(name)
}

fn is_stale(lock: &Path, stale_after: Duration) -> bool {
  fs::metadata(lock)
    .and_then(|m| m.modified())
    .ok()
    .and_then(|modified| modified.elapsed().ok())
    .is_some_and(|age| age > stale_after)
}

/// Move a stale lock out of the way. Returns whether this caller broke it.
///
/// The rename is atomic, so only one waiter can take a given lock file. If
/// the file it took turns out to be fresh (another waiter broke the stale
/// one and a new holder created this one in between), it is linked back.
fn break_stale(lock: &Path, token: &str, stale_after: Duration) -> bool {
  let aside = with_suffix(lock, &format!(".stale-{token}"));
  if fs::rename(lock, &aside).is_err() {
    return false;
  }

  let broken = is_stale(&aside, stale_after);
  if broken {
    tracing::warn!(lock = %lock.display(), "removed stale partition lock");
  } else if let Err(e) = fs::hard_link(&aside, lock) {
    tracing::warn!(lock = %lock.display(), error = %e, "could not restore a live partition lock");
  }
  fs::remove_file(&aside).ok();
  broken
}

impl PartitionLock {
  /// Block until the lock for `partition` is acquired or `timeout` elapses.
  ///
  /// A lock file older than `stale_after` is assumed to belong to a writer
  /// that crashed and is broken.
  pub fn acquire(
    partition: &Path,
    timeout: Duration,
    stale_after: Duration,
  ) -> Result<Self> {
    let path = lock_path(partition);
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(Error::io(dir))?;

    let token = new_token();
    let deadline = Instant::now() + timeout;
    loop {
      match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
          let written =
            file.write_all(token.as_bytes()).and_then(|()| file.sync_all());
          if let Err(e) = written {
            fs::remove_file(&path).ok();
            return Err(Error::io(&path)(e));
          }
          return Ok(Self { path, token });
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
          if is_stale(&path, stale_after) && break_stale(&path, &token, stale_after) {
            continue;
          }
          if Instant::now() >= deadline {
            return Err(Error::LockTimeout { path: partition.to_path_buf() });
          }
          thread::sleep(POLL_INTERVAL);
        }
        // The directory was pruned by a concurrent sweep.
        Err(e) if e.kind() == ErrorKind::NotFound => {
          fs::create_dir_all(dir).map_err(Error::io(dir))?;
        }
        Err(e) => return Err(Error::io(&path)(e)),
      }
    }
  }

  /// Whether the lock file on disk still carries this holder's token.
  pub fn is_held(&self) -> bool {
    fs::read_to_string(&self.path).is_ok_and(|owner| owner == self.token)
  }
}

impl Drop for PartitionLock {
  fn drop(&mut self) {
    if !self.is_held() {
      tracing::warn!(lock = %self.path.display(), "partition lock was broken while held");
      return;
    }
    if let Err(e) = fs::remove_file(&self.path) {
      tracing::warn!(lock = %self.path.display(), error = %e, "failed to release partition lock");
    }
  }
}
