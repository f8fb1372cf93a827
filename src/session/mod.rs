//! Session state, persisted outside the process.
//!
//! A [`SessionStore`] is the swappable backend holding whole records by token.
//! [`SessionManager`] layers the lifetime, token issuance and per-token
//! serialization on top of it, and [`Session`] is the per-request handle the
//! rest of the crate talks to.

mod manager;
mod store;

pub use manager::{Session, SessionManager, SessionManagerBuilder, SessionStatus};
pub use store::{FileStore, MemoryStore};

use crate::error::Result;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Session key holding the id of the logged-in user.
pub const AUTHENTICATED_USER_ID: &str = "authenticated_user_id";
/// Session key holding the one-shot flash message.
pub const FLASH: &str = "flash";

/// The server-side value of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
  /// The record is treated as absent from this instant on.
  pub deadline: DateTime<Utc>,
  #[serde(default)]
  pub values: BTreeMap<String, Value>,
}

impl SessionRecord {
  pub fn new(deadline: DateTime<Utc>) -> Self {
    Self {
      deadline,
      values: BTreeMap::new(),
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.deadline <= now
  }
}

/// A durable key-value backend for session records.
///
/// Implementations only store and fetch; expiry decisions and locking belong
/// to [`SessionManager`]. A failure to reach the backing storage must be
/// reported as an error, never as `Ok(None)`.
pub trait SessionStore: Send + Sync {
  /// Fetches the record for `token`, expired or not.
  fn find(&self, token: &str) -> Result<Option<SessionRecord>>;

  /// Inserts or replaces the record for `token`.
  fn commit(&self, token: &str, record: &SessionRecord) -> Result<()>;

  /// Removes the record for `token`. Removing an absent record is not an error.
  fn delete(&self, token: &str) -> Result<()>;

  /// Removes every record whose deadline has passed, returning how many went.
  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}
