use thiserror::Error;

/// A specialized `Result` type for `snipbox` operations.
pub type Result<T, E = SnipboxError> = std::result::Result<T, E>;

/// The primary error type for all `snipbox` operations.
///
/// Variants fall into four groups: startup failures (`Tera`, `Io`, `Fragment`,
/// `NoPages`), configuration faults (`PageNotFound`), render-time failures
/// (`Render`, `PartialWrite`, `Serialization`) and session backend failures
/// (`Session`). `RecordNotFound`, `InvalidCredentials` and `DuplicateEmail` are
/// domain outcomes; handlers normally turn the last two into form errors.
#[derive(Debug, Error)]
pub enum SnipboxError {
  /// A fragment failed to parse, or a page extends a layout that does not exist.
  #[error("Tera template error: {0}")]
  Tera(#[from] tera::Error),

  /// An I/O error outside of fragment reads (session files, output sinks).
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// A fragment could not be enumerated or read from the fragment store.
  #[error("failed to load fragment '{id}': {source}")]
  Fragment {
    id: String,
    #[source]
    source: std::io::Error,
  },

  /// The fragment store holds no pages at all.
  #[error("no page fragments found under '{0}'")]
  NoPages(String),

  /// A handler asked for a page the cache was never built with.
  #[error("page '{0}' is not in the template cache")]
  PageNotFound(String),

  /// Executing a cached page failed before any output reached the sink.
  #[error("failed to render page '{page}': {source}")]
  Render {
    page: String,
    #[source]
    source: tera::Error,
  },

  /// The sink failed after `written` bytes were already handed to it.
  #[error("output for page '{page}' truncated after {written} bytes: {source}")]
  PartialWrite {
    page: String,
    written: usize,
    #[source]
    source: std::io::Error,
  },

  /// Template data or a session value could not be (de)serialized.
  #[error("serialization error: {0}")]
  Serialization(String),

  /// The session backend could not be reached. Never used for absent or expired sessions.
  #[error("session store error: {0}")]
  Session(String),

  /// A domain record (e.g. a snippet) does not exist.
  #[error("record not found")]
  RecordNotFound,

  /// No user matches the submitted email and password.
  #[error("invalid credentials")]
  InvalidCredentials,

  /// A user with this email address is already registered.
  #[error("duplicate email")]
  DuplicateEmail,
}

impl From<serde_json::Error> for SnipboxError {
  fn from(err: serde_json::Error) -> Self {
    SnipboxError::Serialization(err.to_string())
  }
}
