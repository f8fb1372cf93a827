use crate::core::data::TemplateData;
use crate::core::fragments::{FragmentLayout, FragmentStore};
use crate::core::functions::FunctionRegistry;
use crate::error::{Result, SnipboxError};

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use tera::Tera;

/// One page, fully composed: the base layout, every partial and the page
/// fragment itself, parsed into a dedicated Tera instance.
///
/// Never mutated after construction; rendering only needs `&self`.
#[derive(Debug)]
pub struct RenderableUnit {
  page: String,
  entry: String,
  tera: Tera,
}

impl RenderableUnit {
  fn compose(
    page: String,
    entry: &str,
    fragments: &[(&str, &str)],
    functions: &FunctionRegistry,
  ) -> Result<Self> {
    let mut tera = Tera::default();
    // Functions must be known before parsing.
    functions.attach(&mut tera);
    tera.add_raw_templates(fragments.iter().copied())?;

    Ok(Self {
      page,
      entry: entry.to_string(),
      tera,
    })
  }

  pub fn page(&self) -> &str {
    &self.page
  }

  /// Renders the page to a string. Nothing is written anywhere on failure.
  pub fn render(&self, data: &TemplateData) -> Result<String> {
    let context = data.to_context()?;
    self.tera.render(&self.entry, &context).map_err(|source| SnipboxError::Render {
      page: self.page.clone(),
      source,
    })
  }
}

/// Every page of the application, keyed by the page fragment's file name
/// (extension kept, e.g. `home.html`).
///
/// Built once at startup by [`TemplateCache::build`]. There is no way to add,
/// replace or remove an entry afterwards, so it can be shared across request
/// threads without locking.
#[derive(Debug)]
pub struct TemplateCache {
  units: HashMap<String, RenderableUnit>,
}

impl TemplateCache {
  /// Composes one [`RenderableUnit`] per page found under the layout's pages directory.
  ///
  /// Fails as a whole if the base layout, any partial or any page cannot be
  /// listed, read or parsed, or if there are no pages at all. A cache is only
  /// ever returned complete.
  pub fn build(store: &dyn FragmentStore, layout: &FragmentLayout, functions: &FunctionRegistry) -> Result<Self> {
    let base = store.read(&layout.base)?;
    let partials = store
      .enumerate(&layout.partials_dir, &layout.extension)?
      .into_iter()
      .map(|id| store.read(&id).map(|source| (id, source)))
      .collect::<Result<Vec<_>>>()?;

    let pages = store.enumerate(&layout.pages_dir, &layout.extension)?;
    if pages.is_empty() {
      return Err(SnipboxError::NoPages(layout.pages_dir.clone()));
    }

    let mut units = HashMap::with_capacity(pages.len());
    for id in pages {
      let source = store.read(&id)?;
      let name = page_name(&id).to_string();

      let mut fragments: Vec<(&str, &str)> = Vec::with_capacity(partials.len() + 2);
      fragments.push((layout.base.as_str(), base.as_str()));
      fragments.extend(partials.iter().map(|(id, source)| (id.as_str(), source.as_str())));
      fragments.push((id.as_str(), source.as_str()));

      let unit = RenderableUnit::compose(name.clone(), &id, &fragments, functions)?;
      log::debug!("Composed page '{}' from {} fragments", name, fragments.len());
      units.insert(name, unit);
    }

    log::info!(
      "Template cache ready: {} pages, {} partials, {} functions",
      units.len(),
      partials.len(),
      functions.names().count()
    );
    Ok(Self { units })
  }

  pub fn get(&self, page: &str) -> Result<&RenderableUnit> {
    self
      .units
      .get(page)
      .ok_or_else(|| SnipboxError::PageNotFound(page.to_string()))
  }

  pub fn contains(&self, page: &str) -> bool {
    self.units.contains_key(page)
  }

  /// Page names, sorted.
  pub fn pages(&self) -> Vec<&str> {
    let mut pages: Vec<&str> = self.units.keys().map(String::as_str).collect();
    pages.sort_unstable();
    pages
  }

  pub fn len(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }

  /// Renders `page` into memory. An unknown page is a configuration fault,
  /// reported as [`SnipboxError::PageNotFound`].
  pub fn render_to_string(&self, page: &str, data: &TemplateData) -> Result<String> {
    self.get(page)?.render(data)
  }

  /// Renders `page` and writes it to `sink`.
  ///
  /// The page is rendered into memory first, so a template failure leaves the
  /// sink untouched. A sink that fails after accepting some bytes leaves a
  /// truncated response behind; that is reported as
  /// [`SnipboxError::PartialWrite`] and logged, but cannot be undone.
  pub fn render<W: Write>(&self, page: &str, data: &TemplateData, sink: &mut W) -> Result<()> {
    let body = self.render_to_string(page, data)?;
    let bytes = body.as_bytes();

    let mut written = 0;
    while written < bytes.len() {
      match sink.write(&bytes[written..]) {
        Ok(0) => return Err(write_failure(page, written, ErrorKind::WriteZero.into())),
        Ok(n) => written += n,
        Err(e) if e.kind() == ErrorKind::Interrupted => {}
        Err(e) => return Err(write_failure(page, written, e)),
      }
    }
    sink.flush().map_err(|e| write_failure(page, written, e))
  }
}

fn write_failure(page: &str, written: usize, source: std::io::Error) -> SnipboxError {
  if written == 0 {
    return SnipboxError::Io(source);
  }
  log::error!(
    "Response for page '{}' truncated after {} bytes: {}",
    page,
    written,
    source
  );
  SnipboxError::PartialWrite {
    page: page.to_string(),
    written,
    source,
  }
}

fn page_name(id: &str) -> &str {
  id.rsplit('/').next().unwrap_or(id)
}
