//! Checks for submitted form values.
//!
//! Forms keep a [`FieldErrors`] map next to their values so a page can show
//! each message beside its input. Errors that belong to no single field go in
//! a plain `Vec<String>` on the form.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// The pattern browsers use for `<input type="email">`.
static EMAIL_RX: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
  )
  .expect("email pattern is a valid regex")
});

/// Error messages keyed by form field. The first failed check of a field wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
  /// Records `message` for `field` unless `ok` holds or the field already failed.
  pub fn check(&mut self, ok: bool, field: &str, message: &str) {
    if !ok {
      self.add(field, message);
    }
  }

  pub fn add(&mut self, field: &str, message: &str) {
    self.0.entry(field.to_string()).or_insert_with(|| message.to_string());
  }

  pub fn get(&self, field: &str) -> Option<&str> {
    self.0.get(field).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

pub fn not_blank(value: &str) -> bool {
  !value.trim().is_empty()
}

pub fn max_chars(value: &str, n: usize) -> bool {
  value.chars().count() <= n
}

pub fn min_chars(value: &str, n: usize) -> bool {
  value.chars().count() >= n
}

pub fn permitted<T: PartialEq>(value: &T, allowed: &[T]) -> bool {
  allowed.contains(value)
}

pub fn is_email(value: &str) -> bool {
  EMAIL_RX.is_match(value)
}
