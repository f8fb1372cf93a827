use crate::core::cache::TemplateCache;
use crate::core::data::{PageData, RequestContext, TemplateData};
use crate::core::fragments::{DirFragmentStore, FragmentLayout, FragmentStore};
use crate::core::functions::FunctionRegistry;
use crate::error::Result;
use crate::models::{SnippetModel, UserModel};
use crate::session::{Session, SessionManager};

use std::path::PathBuf;
use std::sync::Arc;

/// A framework-agnostic request to render one cached page.
///
/// Created by [`AppState::render`]. The per-request parts of the template
/// data (flash, authentication, anti-forgery token) are only assembled when
/// the web integration turns this into a response.
pub struct Page {
  pub(crate) app_state: AppState,
  pub(crate) page: String,
  pub(crate) data: PageData,
  pub(crate) status: u16,
}

impl Page {
  pub fn name(&self) -> &str {
    &self.page
  }

  /// Sets the status the page is served with, e.g. 422 when re-displaying a
  /// form with errors. Defaults to 200.
  pub fn with_status(mut self, status: u16) -> Self {
    self.status = status;
    self
  }

  /// Assembles the request's template data and renders the page into memory.
  ///
  /// The flash message is consumed only by a render that succeeds; on failure
  /// it goes back into the session for the next page.
  pub fn render_with(&self, session: &Session, request: &RequestContext) -> Result<String> {
    let data = TemplateData::assemble(session, request, self.data.clone())?;
    self.app_state.templates.render_to_string(&self.page, &data).inspect_err(|_| {
      if let Err(e) = data.return_flash(session) {
        log::error!("Failed to keep flash message after a failed render of '{}': {}", self.page, e);
      }
    })
  }
}

/// The application state shared by every handler.
///
/// Cloning is cheap: every field is behind an `Arc`. Nothing in here changes
/// after [`AppStateBuilder::build`] returns.
#[derive(Clone)]
pub struct AppState {
  pub(crate) templates: Arc<TemplateCache>,
  pub(crate) sessions: Arc<SessionManager>,
  pub(crate) snippets: Arc<dyn SnippetModel>,
  pub(crate) users: Arc<dyn UserModel>,
}

impl AppState {
  /// Creates a new `AppStateBuilder`.
  ///
  /// # Arguments
  ///
  /// * `ui_dir` - The directory holding `base.html`, `partials/` and `pages/`.
  /// * `sessions` - The session manager every request resolves its cookie through.
  /// * `snippets` - The snippet model handlers read from.
  /// * `users` - The user model signup and login go through.
  pub fn builder(
    ui_dir: impl Into<PathBuf>,
    sessions: SessionManager,
    snippets: Arc<dyn SnippetModel>,
    users: Arc<dyn UserModel>,
  ) -> AppStateBuilder {
    AppStateBuilder::new(ui_dir.into(), sessions, snippets, users)
  }

  /// Prepares `page` for rendering with the handler's `data`.
  pub fn render(&self, page: &str, data: PageData) -> Page {
    Page {
      app_state: self.clone(),
      page: page.to_string(),
      data,
      status: 200,
    }
  }

  pub fn templates(&self) -> &TemplateCache {
    &self.templates
  }

  pub fn sessions(&self) -> &Arc<SessionManager> {
    &self.sessions
  }

  pub fn snippets(&self) -> &dyn SnippetModel {
    self.snippets.as_ref()
  }

  pub fn users(&self) -> &dyn UserModel {
    self.users.as_ref()
  }
}

impl std::fmt::Debug for AppState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AppState")
      .field("pages", &self.templates.pages())
      .field("sessions", &self.sessions)
      .finish_non_exhaustive()
  }
}

/// A builder for creating a configured `AppState`.
pub struct AppStateBuilder {
  ui_dir: PathBuf,
  layout: FragmentLayout,
  functions: FunctionRegistry,
  fragment_store: Option<Box<dyn FragmentStore>>,
  sessions: SessionManager,
  snippets: Arc<dyn SnippetModel>,
  users: Arc<dyn UserModel>,
}

impl AppStateBuilder {
  pub(crate) fn new(
    ui_dir: PathBuf,
    sessions: SessionManager,
    snippets: Arc<dyn SnippetModel>,
    users: Arc<dyn UserModel>,
  ) -> Self {
    Self {
      ui_dir,
      layout: FragmentLayout::default(),
      functions: FunctionRegistry::standard(),
      fragment_store: None,
      sessions,
      snippets,
      users,
    }
  }

  /// Overrides where the base layout, partials and pages are looked up.
  pub fn layout(mut self, layout: FragmentLayout) -> Self {
    self.layout = layout;
    self
  }

  /// Replaces the standard function registry.
  pub fn functions(mut self, functions: FunctionRegistry) -> Self {
    self.functions = functions;
    self
  }

  /// Reads fragments from `store` instead of the `ui_dir` on disk.
  pub fn fragment_store(mut self, store: impl FragmentStore + 'static) -> Self {
    self.fragment_store = Some(Box::new(store));
    self
  }

  /// Consumes the builder and composes every page.
  ///
  /// Any fragment that cannot be read or parsed fails the whole build; callers
  /// should abort startup on error.
  pub fn build(self) -> Result<AppState> {
    let store: Box<dyn FragmentStore> = match self.fragment_store {
      Some(store) => store,
      None => Box::new(DirFragmentStore::new(self.ui_dir)),
    };
    let templates = TemplateCache::build(store.as_ref(), &self.layout, &self.functions)?;

    Ok(AppState {
      templates: Arc::new(templates),
      sessions: Arc::new(self.sessions),
      snippets: self.snippets,
      users: self.users,
    })
  }
}
