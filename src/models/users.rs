use crate::core::data::constant_time_eq;
use crate::error::{Result, SnipboxError};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Operations handlers need from user storage.
pub trait UserModel: Send + Sync {
  /// Registers a user and returns its id.
  ///
  /// Emails are compared case-insensitively; one already registered is
  /// [`SnipboxError::DuplicateEmail`].
  fn insert(&self, name: &str, email: &str, password: &str) -> Result<i64>;

  /// Returns the id of the user with this email and password.
  ///
  /// An unknown email and a wrong password are both
  /// [`SnipboxError::InvalidCredentials`].
  fn authenticate(&self, email: &str, password: &str) -> Result<i64>;

  /// Whether a user with this id is registered.
  fn exists(&self, id: i64) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct StoredUser {
  id: i64,
  #[allow(dead_code)]
  name: String,
  email: String,
  salt: String,
  verifier: String,
  #[allow(dead_code)]
  created: DateTime<Utc>,
}

/// Salted SHA-256 of the password. Opaque to everything but this module.
fn verifier(salt: &str, password: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(salt.as_bytes());
  hasher.update(password.as_bytes());
  hex::encode(hasher.finalize())
}

/// An in-process [`UserModel`]. Passwords are only kept as salted verifiers.
#[derive(Debug, Default)]
pub struct MemoryUsers {
  rows: RwLock<Vec<StoredUser>>,
}

impl MemoryUsers {
  pub fn new() -> Self {
    Self::default()
  }
}

impl UserModel for MemoryUsers {
  fn insert(&self, name: &str, email: &str, password: &str) -> Result<i64> {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let verifier = verifier(&salt, password);

    let mut rows = self.rows.write();
    if rows.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
      return Err(SnipboxError::DuplicateEmail);
    }
    let id = rows.last().map_or(1, |u| u.id + 1);
    rows.push(StoredUser {
      id,
      name: name.to_string(),
      email: email.to_string(),
      salt,
      verifier,
      created: Utc::now(),
    });
    Ok(id)
  }

  fn authenticate(&self, email: &str, password: &str) -> Result<i64> {
    let found = self
      .rows
      .read()
      .iter()
      .find(|u| u.email.eq_ignore_ascii_case(email))
      .map(|u| (u.id, u.salt.clone(), u.verifier.clone()));

    let Some((id, salt, expected)) = found else {
      // Same work as a real check, so unknown emails don't answer faster.
      let _ = verifier("", password);
      return Err(SnipboxError::InvalidCredentials);
    };
    if constant_time_eq(verifier(&salt, password).as_bytes(), expected.as_bytes()) {
      Ok(id)
    } else {
      Err(SnipboxError::InvalidCredentials)
    }
  }

  fn exists(&self, id: i64) -> Result<bool> {
    Ok(self.rows.read().iter().any(|u| u.id == id))
  }
}
