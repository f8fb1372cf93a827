use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use tera::{Tera, Value};

/// The layout produced by [`human_date`], e.g. `17 Mar 2024 at 10:15`.
pub const HUMAN_DATE_FORMAT: &str = "%d %b %Y at %H:%M";

/// A formatting function callable from templates.
///
/// Plain `fn` pointers only: an entry cannot capture state, so it stays pure
/// while every request thread executes it through the shared cache.
pub type TemplateFn = fn(&Value) -> tera::Result<Value>;

/// The fixed set of named functions made available to every fragment.
///
/// Each entry is attached to Tera twice, as a filter and as a function, so
/// both `{{ snippet.created | human_date }}` and
/// `{{ human_date(value=snippet.created) }}` work.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
  functions: BTreeMap<String, TemplateFn>,
}

impl FunctionRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// The registry every page of the application is built with.
  pub fn standard() -> Self {
    Self::new().with("human_date", human_date_value)
  }

  /// Adds an entry. Consumes the registry so it can only grow before it is shared.
  pub fn with(mut self, name: impl Into<String>, function: TemplateFn) -> Self {
    self.functions.insert(name.into(), function);
    self
  }

  pub fn contains(&self, name: &str) -> bool {
    self.functions.contains_key(name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.functions.keys().map(String::as_str)
  }

  /// Registers every entry on `tera`. Must run before templates are added.
  pub(crate) fn attach(&self, tera: &mut Tera) {
    for (name, &function) in &self.functions {
      tera.register_filter(name, move |value: &Value, _: &HashMap<String, Value>| function(value));
      tera.register_function(name, move |args: &HashMap<String, Value>| {
        function(args.get("value").unwrap_or(&Value::Null))
      });
    }
  }
}

/// Formats a point in time for display, in UTC.
///
/// `None` is the "no value" sentinel and formats as the empty string.
pub fn human_date<Tz: TimeZone>(t: Option<&DateTime<Tz>>) -> String {
  match t {
    Some(t) => t.with_timezone(&Utc).format(HUMAN_DATE_FORMAT).to_string(),
    None => String::new(),
  }
}

/// Template-side [`human_date`]. Accepts RFC 3339 strings (how chrono
/// serializes `DateTime`), with `null` and `""` meaning "no value".
fn human_date_value(value: &Value) -> tera::Result<Value> {
  match value {
    Value::Null => Ok(Value::String(String::new())),
    Value::String(s) if s.is_empty() => Ok(Value::String(String::new())),
    Value::String(s) => {
      let t = DateTime::parse_from_rfc3339(s)
        .map_err(|e| tera::Error::msg(format!("human_date: '{}' is not an RFC 3339 time: {}", s, e)))?;
      Ok(Value::String(human_date(Some(&t))))
    }
    other => Err(tera::Error::msg(format!(
      "human_date: expected a time string, got {}",
      other
    ))),
  }
}
