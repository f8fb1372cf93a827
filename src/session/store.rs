use super::{SessionRecord, SessionStore};
use crate::error::{Result, SnipboxError};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Tokens come from client cookies, so only a conservative alphabet is ever
/// turned into a file name.
fn is_valid_token(token: &str) -> bool {
  !token.is_empty()
    && token.len() <= 128
    && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn session_err(action: &str, path: &Path, err: impl std::fmt::Display) -> SnipboxError {
  SnipboxError::Session(format!("failed to {} {:?}: {}", action, path, err))
}

/// A [`SessionStore`] keeping one JSON file per session in a directory.
///
/// Records survive process restarts. Commits go through a temporary file and a
/// rename, so a concurrent reader sees either the old or the new record. A
/// temporary file left behind by a crash mid-commit is swept by
/// [`purge_expired`](SessionStore::purge_expired) once it is older than the
/// stale-temp age (one hour unless changed).
#[derive(Debug, Clone)]
pub struct FileStore {
  dir: PathBuf,
  stale_temp_after: StdDuration,
}

impl FileStore {
  /// Opens (creating if needed) a store rooted at `dir`.
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(|e| session_err("create", &dir, e))?;
    Ok(Self {
      dir,
      stale_temp_after: StdDuration::from_secs(60 * 60),
    })
  }

  /// How old an orphaned temporary file must be before a purge removes it.
  ///
  /// A commit only holds its temporary file for the length of one write, so
  /// anything much older than that was abandoned.
  pub fn stale_temp_after(mut self, age: StdDuration) -> Self {
    self.stale_temp_after = age;
    self
  }

  fn record_path(&self, token: &str) -> PathBuf {
    self.dir.join(format!("{}.{}", token, RECORD_EXTENSION))
  }
}

impl SessionStore for FileStore {
  fn find(&self, token: &str) -> Result<Option<SessionRecord>> {
    if !is_valid_token(token) {
      return Ok(None);
    }
    let path = self.record_path(token);
    let bytes = match fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(session_err("read", &path, e)),
    };
    let record = serde_json::from_slice(&bytes).map_err(|e| session_err("decode", &path, e))?;
    Ok(Some(record))
  }

  fn commit(&self, token: &str, record: &SessionRecord) -> Result<()> {
    if !is_valid_token(token) {
      return Err(SnipboxError::Session(format!("refusing to store malformed token {:?}", token)));
    }
    let path = self.record_path(token);
    let tmp = self
      .dir
      .join(format!("{}.{}.{}", token, uuid::Uuid::new_v4().simple(), TEMP_EXTENSION));
    let bytes = serde_json::to_vec(record)?;

    fs::write(&tmp, bytes).map_err(|e| session_err("write", &tmp, e))?;
    if let Err(e) = fs::rename(&tmp, &path) {
      let _ = fs::remove_file(&tmp);
      return Err(session_err("replace", &path, e));
    }
    Ok(())
  }

  fn delete(&self, token: &str) -> Result<()> {
    if !is_valid_token(token) {
      return Ok(());
    }
    let path = self.record_path(token);
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(session_err("delete", &path, e)),
    }
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let entries = fs::read_dir(&self.dir).map_err(|e| session_err("list", &self.dir, e))?;

    let mut purged = 0;
    let mut orphans = 0;
    for entry in entries {
      let path = entry.map_err(|e| session_err("list", &self.dir, e))?.path();
      match path.extension().and_then(|s| s.to_str()) {
        Some(RECORD_EXTENSION) => {}
        Some(TEMP_EXTENSION) => {
          if self.remove_if_stale(&path, now.into())? {
            orphans += 1;
          }
          continue;
        }
        _ => continue,
      }
      let record: SessionRecord = match fs::read(&path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
      {
        Ok(record) => record,
        Err(e) => {
          // Possibly deleted under us by a concurrent request.
          log::warn!("Skipping unreadable session file {:?}: {}", path, e);
          continue;
        }
      };
      if record.is_expired(now) {
        match fs::remove_file(&path) {
          Ok(()) => purged += 1,
          Err(e) if e.kind() == ErrorKind::NotFound => {}
          Err(e) => return Err(session_err("delete", &path, e)),
        }
      }
    }
    if orphans > 0 {
      log::debug!("Removed {} orphaned session temp files from {:?}", orphans, self.dir);
    }
    Ok(purged)
  }
}

impl FileStore {
  fn remove_if_stale(&self, path: &Path, now: SystemTime) -> Result<bool> {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
      Ok(modified) => modified,
      // Renamed into place while we were listing.
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
      Err(e) => return Err(session_err("inspect", path, e)),
    };
    // A clock running behind the file's mtime counts as a fresh file.
    let age = now.duration_since(modified).unwrap_or_default();
    if age < self.stale_temp_after {
      return Ok(false);
    }
    match fs::remove_file(path) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
      Err(e) => Err(session_err("delete", path, e)),
    }
  }
}

/// A [`SessionStore`] held in process memory.
///
/// Records are lost on restart, so this is for tests and throwaway setups only.
#[derive(Debug, Default)]
pub struct MemoryStore {
  records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SessionStore for MemoryStore {
  fn find(&self, token: &str) -> Result<Option<SessionRecord>> {
    Ok(self.records.read().get(token).cloned())
  }

  fn commit(&self, token: &str, record: &SessionRecord) -> Result<()> {
    self.records.write().insert(token.to_string(), record.clone());
    Ok(())
  }

  fn delete(&self, token: &str) -> Result<()> {
    self.records.write().remove(token);
    Ok(())
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let mut records = self.records.write();
    let before = records.len();
    records.retain(|_, record| !record.is_expired(now));
    Ok(before - records.len())
  }
}
