use crate::error::Result;
use crate::models::Snippet;
use crate::session::{AUTHENTICATED_USER_ID, FLASH, Session};

use chrono::{Datelike, Utc};
use serde::Serialize;
use serde_json::Value;
use tera::Context;

/// Request-scoped state set by middleware before a handler runs.
///
/// The anti-forgery token lives here, not in the session.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
  pub csrf_token: String,
}

impl RequestContext {
  pub fn new(csrf_token: impl Into<String>) -> Self {
    Self {
      csrf_token: csrf_token.into(),
    }
  }

  /// Compares a submitted token against this request's, in constant time.
  pub fn verify_csrf(&self, submitted: &str) -> bool {
    !self.csrf_token.is_empty() && constant_time_eq(self.csrf_token.as_bytes(), submitted.as_bytes())
  }
}

/// Equality whose running time depends only on the lengths of the inputs.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
  a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// What a handler contributes to a page: the parts only it can know.
#[derive(Debug, Clone, Default)]
pub struct PageData {
  snippet: Option<Snippet>,
  snippets: Option<Vec<Snippet>>,
  form: Option<Value>,
}

impl PageData {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn snippet(mut self, snippet: Snippet) -> Self {
    self.snippet = Some(snippet);
    self
  }

  pub fn snippets(mut self, snippets: Vec<Snippet>) -> Self {
    self.snippets = Some(snippets);
    self
  }

  /// Attaches form state (values and field errors) to re-display.
  pub fn form<T: Serialize>(mut self, form: &T) -> Result<Self> {
    self.form = Some(serde_json::to_value(form)?);
    Ok(self)
  }
}

/// Everything a page template can see.
///
/// The field names are the contract with the fragments: a template reaching
/// for any other name fails to render.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateData {
  pub current_year: i32,
  pub snippet: Option<Snippet>,
  pub snippets: Option<Vec<Snippet>>,
  pub form: Option<Value>,
  pub flash: String,
  pub is_authenticated: bool,
  pub csrf_token: String,
}

impl TemplateData {
  /// Builds the data for one render.
  ///
  /// Pops the flash message out of the session, so calling this twice in one
  /// request yields the message only once. The authentication check is a
  /// plain read. The handler's `page` data never touches the computed fields.
  pub fn assemble(session: &Session, request: &RequestContext, page: PageData) -> Result<Self> {
    let PageData { snippet, snippets, form } = page;
    Ok(Self {
      current_year: Utc::now().year(),
      snippet,
      snippets,
      form,
      flash: session.pop_string(FLASH)?,
      is_authenticated: is_authenticated(session)?,
      csrf_token: request.csrf_token.clone(),
    })
  }

  pub fn to_context(&self) -> Result<Context> {
    Ok(Context::from_serialize(self)?)
  }

  /// Hands an unseen flash message back to the session after a failed render.
  ///
  /// A flash set since [`assemble`](Self::assemble) popped this one is kept
  /// instead.
  pub fn return_flash(&self, session: &Session) -> Result<()> {
    if !self.flash.is_empty() {
      session.put_if_absent(FLASH, &self.flash)?;
    }
    Ok(())
  }
}

/// True when the session holds a non-empty user id. Never writes.
pub fn is_authenticated(session: &Session) -> Result<bool> {
  Ok(match session.get_value(AUTHENTICATED_USER_ID)? {
    None | Some(Value::Null) => false,
    Some(Value::String(s)) => !s.is_empty(),
    Some(_) => true,
  })
}
