use crate::error::{Result, SnipboxError};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single shared text entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
  pub id: i64,
  pub title: String,
  pub content: String,
  pub created: DateTime<Utc>,
  pub expires: DateTime<Utc>,
}

/// Operations handlers need from snippet storage.
pub trait SnippetModel: Send + Sync {
  /// Stores a new snippet that expires `expires_in` from now and returns its id.
  fn insert(&self, title: &str, content: &str, expires_in: Duration) -> Result<i64>;

  /// Fetches a live snippet. Missing and expired ids are both [`SnipboxError::RecordNotFound`].
  fn get(&self, id: i64) -> Result<Snippet>;

  /// The ten most recently created live snippets, newest first.
  fn latest(&self) -> Result<Vec<Snippet>>;
}

/// An in-process [`SnippetModel`].
#[derive(Debug, Default)]
pub struct MemorySnippets {
  rows: RwLock<Vec<Snippet>>,
}

impl MemorySnippets {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SnippetModel for MemorySnippets {
  fn insert(&self, title: &str, content: &str, expires_in: Duration) -> Result<i64> {
    let mut rows = self.rows.write();
    let id = rows.last().map_or(1, |s| s.id + 1);
    let created = Utc::now();
    rows.push(Snippet {
      id,
      title: title.to_string(),
      content: content.to_string(),
      created,
      expires: created + expires_in,
    });
    Ok(id)
  }

  fn get(&self, id: i64) -> Result<Snippet> {
    let now = Utc::now();
    self
      .rows
      .read()
      .iter()
      .find(|s| s.id == id && s.expires > now)
      .cloned()
      .ok_or(SnipboxError::RecordNotFound)
  }

  fn latest(&self) -> Result<Vec<Snippet>> {
    let now = Utc::now();
    let rows = self.rows.read();
    let mut live: Vec<Snippet> = rows.iter().filter(|s| s.expires > now).cloned().collect();
    live.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
    live.truncate(10);
    Ok(live)
  }
}
