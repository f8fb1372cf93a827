use crate::error::{Result, SnipboxError};

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Read-only access to template source fragments.
///
/// Identifiers are `/`-separated paths relative to the store root, e.g.
/// `base.html` or `pages/home.html`. The same identifiers are used as Tera
/// template names, so `{% extends "base.html" %}` and
/// `{% include "partials/nav.html" %}` resolve against them.
pub trait FragmentStore {
  /// Lists the fragments directly under `dir` whose name ends in `extension`,
  /// sorted by identifier. Subdirectories are not descended into.
  fn enumerate(&self, dir: &str, extension: &str) -> Result<Vec<String>>;

  /// Reads the source text of a single fragment.
  fn read(&self, id: &str) -> Result<String>;
}

/// Where the base layout, the partials and the pages live inside a store.
#[derive(Debug, Clone)]
pub struct FragmentLayout {
  pub base: String,
  pub partials_dir: String,
  pub pages_dir: String,
  pub extension: String,
}

impl Default for FragmentLayout {
  fn default() -> Self {
    Self {
      base: "base.html".to_string(),
      partials_dir: "partials".to_string(),
      pages_dir: "pages".to_string(),
      extension: ".html".to_string(),
    }
  }
}

/// A fragment store backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirFragmentStore {
  root: PathBuf,
}

impl DirFragmentStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

impl FragmentStore for DirFragmentStore {
  fn enumerate(&self, dir: &str, extension: &str) -> Result<Vec<String>> {
    let path = self.root.join(dir);
    let fragment_err = |source: std::io::Error| SnipboxError::Fragment {
      id: format!("{}/*{}", dir, extension),
      source,
    };

    let mut ids = Vec::new();
    for entry in fs::read_dir(&path).map_err(fragment_err)? {
      let entry = entry.map_err(fragment_err)?;
      if !entry.file_type().map_err(fragment_err)?.is_file() {
        continue;
      }
      // Non UTF-8 names cannot be Tera template names; skip them.
      let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
        log::warn!("Skipping fragment with non UTF-8 name in {:?}", path);
        continue;
      };
      if name.ends_with(extension) {
        ids.push(format!("{}/{}", dir, name));
      }
    }
    ids.sort();
    Ok(ids)
  }

  fn read(&self, id: &str) -> Result<String> {
    fs::read_to_string(self.root.join(id)).map_err(|source| SnipboxError::Fragment {
      id: id.to_string(),
      source,
    })
  }
}

/// A fragment store held entirely in memory.
///
/// Useful for fragments compiled into the binary with `include_str!`, and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryFragmentStore {
  fragments: BTreeMap<String, String>,
}

impl MemoryFragmentStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a fragment, replacing any previous fragment with the same identifier.
  pub fn with_fragment(mut self, id: impl Into<String>, source: impl Into<String>) -> Self {
    self.fragments.insert(id.into(), source.into());
    self
  }
}

impl FragmentStore for MemoryFragmentStore {
  fn enumerate(&self, dir: &str, extension: &str) -> Result<Vec<String>> {
    let prefix = format!("{}/", dir);
    Ok(
      self
        .fragments
        .keys()
        .filter(|id| {
          id.strip_prefix(&prefix)
            .is_some_and(|rest| !rest.contains('/') && rest.ends_with(extension))
        })
        .cloned()
        .collect(),
    )
  }

  fn read(&self, id: &str) -> Result<String> {
    self.fragments.get(id).cloned().ok_or_else(|| SnipboxError::Fragment {
      id: id.to_string(),
      source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such fragment"),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn test_dir_store_enumerates_only_direct_matches() {
    let temp_dir = tempdir().unwrap();
    let pages = temp_dir.path().join("pages");
    fs::create_dir_all(pages.join("nested")).unwrap();
    fs::write(pages.join("view.html"), "v").unwrap();
    fs::write(pages.join("home.html"), "h").unwrap();
    fs::write(pages.join("notes.txt"), "n").unwrap();
    fs::write(pages.join("nested").join("deep.html"), "d").unwrap();

    let store = DirFragmentStore::new(temp_dir.path());
    let ids = store.enumerate("pages", ".html").unwrap();

    assert_eq!(ids, vec!["pages/home.html", "pages/view.html"]);
    assert_eq!(store.read("pages/home.html").unwrap(), "h");
  }

  #[test]
  fn test_dir_store_missing_directory_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let store = DirFragmentStore::new(temp_dir.path());

    let result = store.enumerate("pages", ".html");

    assert!(matches!(result, Err(SnipboxError::Fragment { .. })));
  }

  #[test]
  fn test_memory_store_filters_by_directory() {
    let store = MemoryFragmentStore::new()
      .with_fragment("base.html", "b")
      .with_fragment("partials/nav.html", "n")
      .with_fragment("pages/home.html", "h")
      .with_fragment("pages/old/legacy.html", "l");

    assert_eq!(store.enumerate("pages", ".html").unwrap(), vec!["pages/home.html"]);
    assert_eq!(store.enumerate("partials", ".html").unwrap(), vec!["partials/nav.html"]);
    assert!(store.read("pages/missing.html").is_err());
  }
}
