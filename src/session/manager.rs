use super::{SessionRecord, SessionStore};
use crate::error::Result;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

fn new_token() -> String {
  uuid::Uuid::new_v4().simple().to_string()
}

/// Owns the session backend and every rule about lifetimes and tokens.
///
/// A session lives for a fixed lifetime after its last access. Every write
/// extends the deadline, and so does [`touch`](Self::touch), which the HTTP
/// layer calls once per request. Plain reads take no lock and never write.
///
/// Operations on one token are serialized; operations on different tokens
/// never wait on each other.
pub struct SessionManager {
  store: Arc<dyn SessionStore>,
  lifetime: Duration,
  cookie_name: String,
  secure: bool,
  // One mutex per token currently being written. Entries are dropped as soon
  // as nobody holds them.
  locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for SessionManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionManager")
      .field("lifetime", &self.lifetime)
      .field("cookie_name", &self.cookie_name)
      .field("secure", &self.secure)
      .finish_non_exhaustive()
  }
}

/// A builder for creating a configured `SessionManager`.
pub struct SessionManagerBuilder {
  store: Arc<dyn SessionStore>,
  lifetime: Duration,
  cookie_name: String,
  secure: bool,
}

impl SessionManagerBuilder {
  /// How long a session lives after its last access. Defaults to 12 hours.
  pub fn lifetime(mut self, lifetime: Duration) -> Self {
    self.lifetime = lifetime;
    self
  }

  /// Name of the cookie carrying the token. Defaults to `session`.
  pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
    self.cookie_name = name.into();
    self
  }

  /// Whether the cookie is marked `Secure`. Defaults to `true`; turn it off
  /// only when serving plain HTTP in development.
  pub fn secure(mut self, secure: bool) -> Self {
    self.secure = secure;
    self
  }

  pub fn build(self) -> SessionManager {
    SessionManager {
      store: self.store,
      lifetime: self.lifetime,
      cookie_name: self.cookie_name,
      secure: self.secure,
      locks: Mutex::new(HashMap::new()),
    }
  }
}

impl SessionManager {
  pub fn builder(store: Arc<dyn SessionStore>) -> SessionManagerBuilder {
    SessionManagerBuilder {
      store,
      lifetime: Duration::hours(12),
      cookie_name: "session".to_string(),
      secure: true,
    }
  }

  pub fn lifetime(&self) -> Duration {
    self.lifetime
  }

  pub fn cookie_name(&self) -> &str {
    &self.cookie_name
  }

  pub fn secure(&self) -> bool {
    self.secure
  }

  /// Wraps the token a request arrived with into a per-request handle.
  pub fn session(self: &Arc<Self>, token: Option<String>) -> Session {
    Session {
      inner: Arc::new(SessionInner {
        manager: Arc::clone(self),
        state: Mutex::new(SessionState {
          token,
          status: SessionStatus::Unchanged,
        }),
      }),
    }
  }

  /// Reads a raw value. Expired and unknown sessions read as absent.
  pub fn get_value(&self, token: &str, key: &str) -> Result<Option<Value>> {
    Ok(
      self
        .load_live(token, Utc::now())?
        .and_then(|mut record| record.values.remove(key)),
    )
  }

  /// Reads a typed value.
  pub fn get<T: DeserializeOwned>(&self, token: &str, key: &str) -> Result<Option<T>> {
    Ok(self.get_value(token, key)?.map(serde_json::from_value).transpose()?)
  }

  pub fn exists(&self, token: &str, key: &str) -> Result<bool> {
    Ok(self.get_value(token, key)?.is_some())
  }

  /// Records an access: a live session's deadline moves to now plus the
  /// lifetime. Values are left alone. Returns whether the session was live;
  /// an expired record met here is deleted.
  pub fn touch(&self, token: &str) -> Result<bool> {
    let now = Utc::now();
    self.with_token_lock(token, || match self.store.find(token)? {
      Some(mut record) if !record.is_expired(now) => {
        record.deadline = self.deadline_from(now);
        self.store.commit(token, &record)?;
        Ok(true)
      }
      Some(_) => {
        self.store.delete(token)?;
        Ok(false)
      }
      None => Ok(false),
    })
  }

  /// Stores `value` under `key` and returns the token it was stored under.
  ///
  /// Without a token, or when the token's session is unknown or expired, a
  /// fresh token is issued; a client-chosen token is never adopted.
  pub fn put<T: Serialize>(&self, token: Option<&str>, key: &str, value: T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    let now = Utc::now();
    let write = move |record: &mut SessionRecord| {
      record.values.insert(key.to_string(), value);
    };

    let Some(token) = token else {
      return self.create(now, write);
    };
    self.with_token_lock(token, || match self.store.find(token)? {
      Some(mut record) if !record.is_expired(now) => {
        write(&mut record);
        record.deadline = self.deadline_from(now);
        self.store.commit(token, &record)?;
        Ok(token.to_string())
      }
      stale => {
        if stale.is_some() {
          self.store.delete(token)?;
        }
        self.create(now, write)
      }
    })
  }

  /// Removes `key` and returns what it held, in one step with respect to
  /// every other operation on the same token.
  pub fn remove(&self, token: &str, key: &str) -> Result<Option<Value>> {
    let now = Utc::now();
    self.with_token_lock(token, || {
      let Some(mut record) = self.store.find(token)? else {
        return Ok(None);
      };
      if record.is_expired(now) {
        self.store.delete(token)?;
        return Ok(None);
      }
      let taken = record.values.remove(key);
      if taken.is_some() {
        record.deadline = self.deadline_from(now);
        self.store.commit(token, &record)?;
      }
      Ok(taken)
    })
  }

  /// Stores `value` under `key` only if the live session has nothing there.
  ///
  /// Used to hand back a popped value whose consumer failed; a value written
  /// in the meantime wins. Never creates a session.
  pub fn put_if_absent<T: Serialize>(&self, token: &str, key: &str, value: T) -> Result<bool> {
    let value = serde_json::to_value(value)?;
    let now = Utc::now();
    self.with_token_lock(token, || {
      let Some(mut record) = self.load_live(token, now)? else {
        return Ok(false);
      };
      if record.values.contains_key(key) {
        return Ok(false);
      }
      record.values.insert(key.to_string(), value);
      record.deadline = self.deadline_from(now);
      self.store.commit(token, &record)?;
      Ok(true)
    })
  }

  /// Typed read-then-clear: a value popped once is gone for every later caller.
  pub fn pop<T: DeserializeOwned>(&self, token: &str, key: &str) -> Result<Option<T>> {
    Ok(self.remove(token, key)?.map(serde_json::from_value).transpose()?)
  }

  /// Moves the session's data to a freshly issued token and deletes the old one.
  ///
  /// Call this whenever the privilege level changes (login, logout).
  pub fn renew(&self, token: Option<&str>) -> Result<String> {
    let now = Utc::now();
    let fresh = new_token();
    let Some(token) = token else {
      self.store.commit(&fresh, &SessionRecord::new(self.deadline_from(now)))?;
      return Ok(fresh);
    };
    self.with_token_lock(token, || {
      let mut record = self
        .store
        .find(token)?
        .filter(|r| !r.is_expired(now))
        .unwrap_or_else(|| SessionRecord::new(now));
      record.deadline = self.deadline_from(now);
      self.store.commit(&fresh, &record)?;
      self.store.delete(token)?;
      Ok(fresh)
    })
  }

  /// Deletes the session outright.
  pub fn destroy(&self, token: &str) -> Result<()> {
    self.with_token_lock(token, || self.store.delete(token))
  }

  /// Sweeps expired records out of the backend.
  pub fn purge_expired(&self) -> Result<usize> {
    self.store.purge_expired(Utc::now())
  }

  fn load_live(&self, token: &str, now: DateTime<Utc>) -> Result<Option<SessionRecord>> {
    Ok(self.store.find(token)?.filter(|record| !record.is_expired(now)))
  }

  fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_signed(self.lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC)
  }

  fn create(&self, now: DateTime<Utc>, write: impl FnOnce(&mut SessionRecord)) -> Result<String> {
    let token = new_token();
    let mut record = SessionRecord::new(self.deadline_from(now));
    write(&mut record);
    self.store.commit(&token, &record)?;
    Ok(token)
  }

  fn with_token_lock<T>(&self, token: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock = Arc::clone(self.locks.lock().entry(token.to_string()).or_default());
    let result = {
      let _guard = lock.lock();
      f()
    };

    // Our clone is released under the registry lock so the last holder always
    // sees a count of one and removes the entry.
    let mut locks = self.locks.lock();
    drop(lock);
    if locks.get(token).is_some_and(|l| Arc::strong_count(l) == 1) {
      locks.remove(token);
    }
    result
  }

  #[cfg(test)]
  pub(crate) fn held_locks(&self) -> usize {
    self.locks.lock().len()
  }
}

/// What happened to a request's session, so the HTTP layer knows which cookie to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
  Unchanged,
  /// Written or renewed; the cookie must carry the current token.
  Modified,
  /// Destroyed; the cookie must be removed.
  Destroyed,
}

#[derive(Debug)]
struct SessionState {
  token: Option<String>,
  status: SessionStatus,
}

#[derive(Debug)]
struct SessionInner {
  manager: Arc<SessionManager>,
  state: Mutex<SessionState>,
}

/// The session of one request.
///
/// Cheap to clone; all clones share the token, so a token issued by one write
/// is used by every later operation in the same request.
#[derive(Debug, Clone)]
pub struct Session {
  inner: Arc<SessionInner>,
}

impl Session {
  pub fn token(&self) -> Option<String> {
    self.inner.state.lock().token.clone()
  }

  pub fn status(&self) -> SessionStatus {
    self.inner.state.lock().status
  }

  pub fn manager(&self) -> &Arc<SessionManager> {
    &self.inner.manager
  }

  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.token() {
      Some(token) => self.inner.manager.get(&token, key),
      None => Ok(None),
    }
  }

  pub fn get_value(&self, key: &str) -> Result<Option<Value>> {
    match self.token() {
      Some(token) => self.inner.manager.get_value(&token, key),
      None => Ok(None),
    }
  }

  pub fn exists(&self, key: &str) -> Result<bool> {
    Ok(self.get_value(key)?.is_some())
  }

  /// Extends a live session's lifetime and marks it for a fresh cookie.
  pub fn touch(&self) -> Result<bool> {
    let Some(token) = self.token() else {
      return Ok(false);
    };
    let live = self.inner.manager.touch(&token)?;
    if live {
      self.mark(SessionStatus::Modified);
    }
    Ok(live)
  }

  pub fn put<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
    let token = self.token();
    let token = self.inner.manager.put(token.as_deref(), key, value)?;
    self.set_token(Some(token), SessionStatus::Modified);
    Ok(())
  }

  pub fn remove(&self, key: &str) -> Result<Option<Value>> {
    let Some(token) = self.token() else {
      return Ok(None);
    };
    let taken = self.inner.manager.remove(&token, key)?;
    if taken.is_some() {
      self.mark(SessionStatus::Modified);
    }
    Ok(taken)
  }

  pub fn pop<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    Ok(self.remove(key)?.map(serde_json::from_value).transpose()?)
  }

  pub fn put_if_absent<T: Serialize>(&self, key: &str, value: T) -> Result<bool> {
    let Some(token) = self.token() else {
      return Ok(false);
    };
    let stored = self.inner.manager.put_if_absent(&token, key, value)?;
    if stored {
      self.mark(SessionStatus::Modified);
    }
    Ok(stored)
  }

  /// Pops a string value; absent reads as the empty string.
  pub fn pop_string(&self, key: &str) -> Result<String> {
    Ok(self.pop::<String>(key)?.unwrap_or_default())
  }

  pub fn renew(&self) -> Result<()> {
    let token = self.token();
    let token = self.inner.manager.renew(token.as_deref())?;
    self.set_token(Some(token), SessionStatus::Modified);
    Ok(())
  }

  pub fn destroy(&self) -> Result<()> {
    if let Some(token) = self.token() {
      self.inner.manager.destroy(&token)?;
    }
    self.set_token(None, SessionStatus::Destroyed);
    Ok(())
  }

  fn set_token(&self, token: Option<String>, status: SessionStatus) {
    let mut state = self.inner.state.lock();
    state.token = token;
    state.status = status;
  }

  fn mark(&self, status: SessionStatus) {
    self.inner.state.lock().status = status;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::MemoryStore;
  use std::sync::{Barrier, mpsc};
  use std::thread;
  use std::time::Duration as StdDuration;

  fn manager() -> Arc<SessionManager> {
    Arc::new(SessionManager::builder(Arc::new(MemoryStore::new())).build())
  }

  /// Delays or blocks `find` so tests can hold a token's lock open.
  struct SlowStore {
    inner: MemoryStore,
    delay: StdDuration,
    blocked_token: Option<String>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
  }

  impl SlowStore {
    fn delayed(delay: StdDuration) -> Self {
      Self {
        inner: MemoryStore::new(),
        delay,
        blocked_token: None,
        release: Mutex::new(None),
      }
    }
  }

  impl SessionStore for SlowStore {
    fn find(&self, token: &str) -> Result<Option<SessionRecord>> {
      if self.blocked_token.as_deref() == Some(token) {
        if let Some(rx) = self.release.lock().take() {
          let _ = rx.recv();
        }
      }
      thread::sleep(self.delay);
      self.inner.find(token)
    }

    fn commit(&self, token: &str, record: &SessionRecord) -> Result<()> {
      self.inner.commit(token, record)
    }

    fn delete(&self, token: &str) -> Result<()> {
      self.inner.delete(token)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
      self.inner.purge_expired(now)
    }
  }

  #[test]
  fn test_put_without_token_issues_one() {
    let manager = manager();
    let token = manager.put(None, "flash", "Snippet created!").unwrap();

    assert_eq!(manager.get::<String>(&token, "flash").unwrap().as_deref(), Some("Snippet created!"));
    assert_eq!(manager.get::<String>(&token, "other").unwrap(), None);
  }

  #[test]
  fn test_unknown_token_is_never_adopted() {
    let manager = manager();
    let token = manager.put(Some("attacker-chosen"), "k", 1).unwrap();

    assert_ne!(token, "attacker-chosen");
    assert_eq!(manager.get::<i64>("attacker-chosen", "k").unwrap(), None);
  }

  #[test]
  fn test_pop_is_one_shot() {
    let manager = manager();
    let token = manager.put(None, "flash", "hello").unwrap();

    assert_eq!(manager.pop::<String>(&token, "flash").unwrap().as_deref(), Some("hello"));
    assert_eq!(manager.pop::<String>(&token, "flash").unwrap(), None);
  }

  #[test]
  fn test_expired_session_reads_as_absent() {
    let manager = Arc::new(
      SessionManager::builder(Arc::new(MemoryStore::new()))
        .lifetime(Duration::zero())
        .build(),
    );
    let token = manager.put(None, "authenticated_user_id", 7).unwrap();

    assert!(!manager.exists(&token, "authenticated_user_id").unwrap());
    assert_eq!(manager.pop::<i64>(&token, "authenticated_user_id").unwrap(), None);
  }

  #[test]
  fn test_lifetime_counts_from_last_access() {
    let lifetime = StdDuration::from_millis(400);
    let manager = Arc::new(
      SessionManager::builder(Arc::new(MemoryStore::new()))
        .lifetime(Duration::from_std(lifetime).unwrap())
        .build(),
    );
    let token = manager.put(None, "authenticated_user_id", 7).unwrap();

    // A read-only request at three quarters of the lifetime.
    thread::sleep(lifetime * 3 / 4);
    let session = manager.session(Some(token.clone()));
    assert!(session.touch().unwrap());
    assert_eq!(session.status(), SessionStatus::Modified);
    assert!(manager.exists(&token, "authenticated_user_id").unwrap());

    // One and a half lifetimes after the only write.
    thread::sleep(lifetime * 3 / 4);
    assert!(manager.exists(&token, "authenticated_user_id").unwrap());

    // Without another access it lapses.
    thread::sleep(lifetime * 5 / 4);
    assert!(!manager.exists(&token, "authenticated_user_id").unwrap());
  }

  #[test]
  fn test_touch_leaves_values_and_unknown_tokens_alone() {
    let manager = manager();
    let token = manager.put(None, "flash", "still here").unwrap();

    assert!(manager.touch(&token).unwrap());
    assert_eq!(manager.get::<String>(&token, "flash").unwrap().as_deref(), Some("still here"));

    let stranger = manager.session(Some("not-a-session".to_string()));
    assert!(!stranger.touch().unwrap());
    assert_eq!(stranger.status(), SessionStatus::Unchanged);
    assert_eq!(manager.held_locks(), 0);
  }

  #[test]
  fn test_touch_deletes_an_expired_record() {
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::builder(store.clone()).lifetime(Duration::zero()).build();
    let token = manager.put(None, "flash", "late").unwrap();

    assert!(!manager.touch(&token).unwrap());
    assert_eq!(store.find(&token).unwrap(), None);
  }

  #[test]
  fn test_put_if_absent_keeps_newer_value() {
    let manager = manager();
    let token = manager.put(None, "flash", "newer").unwrap();

    assert!(!manager.put_if_absent(&token, "flash", "older").unwrap());
    assert_eq!(manager.get::<String>(&token, "flash").unwrap().as_deref(), Some("newer"));

    manager.remove(&token, "flash").unwrap();
    assert!(manager.put_if_absent(&token, "flash", "older").unwrap());
    assert_eq!(manager.get::<String>(&token, "flash").unwrap().as_deref(), Some("older"));

    // Never brings a session into existence.
    assert!(!manager.put_if_absent("unknown", "flash", "x").unwrap());
    assert_eq!(manager.get::<String>("unknown", "flash").unwrap(), None);
  }

  #[test]
  fn test_oversized_lifetime_saturates_instead_of_overflowing() {
    let manager = SessionManager::builder(Arc::new(MemoryStore::new()))
      .lifetime(Duration::MAX)
      .build();
    let token = manager.put(None, "flash", "forever").unwrap();

    assert!(manager.touch(&token).unwrap());
    assert_eq!(manager.get::<String>(&token, "flash").unwrap().as_deref(), Some("forever"));
  }

  #[test]
  fn test_cookies_are_secure_by_default() {
    assert!(manager().secure());
  }

  #[test]
  fn test_renew_moves_data_to_new_token() {
    let manager = manager();
    let old = manager.put(None, "authenticated_user_id", 42).unwrap();

    let new = manager.renew(Some(&old)).unwrap();

    assert_ne!(old, new);
    assert_eq!(manager.get::<i64>(&new, "authenticated_user_id").unwrap(), Some(42));
    assert_eq!(manager.get::<i64>(&old, "authenticated_user_id").unwrap(), None);
  }

  #[test]
  fn test_session_handle_tracks_token_and_status() {
    let manager = manager();
    let session = manager.session(None);
    assert_eq!(session.status(), SessionStatus::Unchanged);
    assert_eq!(session.pop_string("flash").unwrap(), "");

    session.put("flash", "saved").unwrap();
    let token = session.token().unwrap();
    assert_eq!(session.status(), SessionStatus::Modified);

    // A clone sees the token the first write issued.
    let clone = session.clone();
    assert_eq!(clone.pop_string("flash").unwrap(), "saved");
    assert_eq!(clone.token().unwrap(), token);

    session.destroy().unwrap();
    assert_eq!(session.status(), SessionStatus::Destroyed);
    assert_eq!(session.token(), None);
    assert!(!manager.exists(&token, "flash").unwrap());
  }

  #[test]
  fn test_lock_registry_is_emptied_after_use() {
    let manager = manager();
    let token = manager.put(None, "flash", "x").unwrap();
    manager.put(Some(&token), "flash", "y").unwrap();
    manager.remove(&token, "flash").unwrap();

    assert_eq!(manager.held_locks(), 0);
  }

  #[test]
  fn test_same_token_concurrent_pop_observes_flash_once() {
    let store = Arc::new(SlowStore::delayed(StdDuration::from_millis(20)));
    let manager = Arc::new(SessionManager::builder(store).build());
    let token = manager.put(None, "flash", "only once").unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let manager = Arc::clone(&manager);
        let token = token.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
          barrier.wait();
          manager.pop::<String>(&token, "flash").unwrap()
        })
      })
      .collect();

    let seen: Vec<_> = handles.into_iter().filter_map(|h| h.join().unwrap()).collect();
    assert_eq!(seen, vec!["only once".to_string()]);
  }

  #[test]
  fn test_different_tokens_do_not_block_each_other() {
    let (release_tx, release_rx) = mpsc::channel();

    // The store parks the first `find` on token A until released.
    let token_a = new_token();
    let token_b = new_token();
    let inner = MemoryStore::new();
    for token in [&token_a, &token_b] {
      let record = SessionRecord {
        deadline: Utc::now() + Duration::hours(1),
        values: [("flash".to_string(), Value::String(token.clone()))].into_iter().collect(),
      };
      inner.commit(token, &record).unwrap();
    }
    let store = Arc::new(SlowStore {
      inner,
      delay: StdDuration::ZERO,
      blocked_token: Some(token_a.clone()),
      release: Mutex::new(Some(release_rx)),
    });
    let manager = Arc::new(SessionManager::builder(store).build());

    let blocked = {
      let manager = Arc::clone(&manager);
      let token_a = token_a.clone();
      thread::spawn(move || manager.pop::<String>(&token_a, "flash").unwrap())
    };
    thread::sleep(StdDuration::from_millis(50));

    let (done_tx, done_rx) = mpsc::channel();
    {
      let manager = Arc::clone(&manager);
      let token_b = token_b.clone();
      thread::spawn(move || {
        let _ = done_tx.send(manager.pop::<String>(&token_b, "flash").unwrap());
      });
    }
    let b = done_rx.recv_timeout(StdDuration::from_secs(2));

    release_tx.send(()).unwrap();
    let a = blocked.join().unwrap();

    assert_eq!(b.expect("token B waited on token A"), Some(token_b));
    assert_eq!(a, Some(token_a));
  }
}
