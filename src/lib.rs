//! # Snipbox
//!
//! A server-rendered snippet sharing site built on Tera and Actix Web.
//!
//! ## How a page is rendered
//!
//! - **Layered fragments:** every page is composed from one base layout, all
//!   shared partials and its own page fragment.
//! - **Built once:** the composed pages are parsed at startup into a
//!   [`TemplateCache`]. A broken fragment stops the process before it serves
//!   anything; nothing is reloaded afterwards.
//! - **Per-request data:** handlers only supply their own [`PageData`]. The
//!   current year, the login state, the one-shot flash message and the
//!   anti-forgery token are filled in when the page is turned into a response.
//! - **Durable sessions:** session records live in a [`session::SessionStore`]
//!   and survive restarts; writes to one session are serialized, different
//!   sessions never wait on each other.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use snipbox::actix::RequestState;
//! use snipbox::models::{MemorySnippets, MemoryUsers};
//! use snipbox::session::{FileStore, SessionManager};
//! use snipbox::{AppState, PageData};
//! use std::sync::Arc;
//!
//! async fn home(app: web::Data<AppState>) -> snipbox::Page {
//!   app.render("home.html", PageData::new())
//! }
//!
//! #[actix_web::main]
//! async fn main() -> anyhow::Result<()> {
//!   let sessions = SessionManager::builder(Arc::new(FileStore::open("data/sessions")?)).build();
//!   let app_state = AppState::builder(
//!     "ui/html",
//!     sessions,
//!     Arc::new(MemorySnippets::new()),
//!     Arc::new(MemoryUsers::new()),
//!   )
//!   .build()?;
//!
//!   HttpServer::new(move || {
//!     App::new()
//!       .app_data(web::Data::new(app_state.clone()))
//!       .wrap(RequestState::new(&app_state))
//!       .route("/", web::get().to(home))
//!   })
//!   .bind(("127.0.0.1", 4000))?
//!   .run()
//!   .await?;
//!   Ok(())
//! }
//! ```

pub mod actix;
pub mod core;
pub mod error;
pub mod handlers;
pub mod models;
pub mod session;
pub mod validator;

pub use crate::core::app::{AppState, AppStateBuilder, Page};
pub use crate::core::cache::{RenderableUnit, TemplateCache};
pub use crate::core::data::{PageData, RequestContext, TemplateData};
pub use crate::core::fragments::{DirFragmentStore, FragmentLayout, FragmentStore, MemoryFragmentStore};
pub use crate::core::functions::{FunctionRegistry, human_date};
pub use crate::error::{Result, SnipboxError};
