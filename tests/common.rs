#![allow(dead_code)]

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::{cookie::Cookie, test};
use snipbox::models::{MemorySnippets, MemoryUsers, UserModel};
use snipbox::session::{MemoryStore, SessionManager, SessionStore};
use snipbox::AppState;
use std::path::PathBuf;
use std::sync::Arc;

/// The fragments the real server ships with.
pub fn ui_dir() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("ui").join("html")
}

pub const EMAIL: &str = "alice@example.com";
pub const PASSWORD: &str = "pa55word!";

/// A user model with one registered user, `EMAIL` / `PASSWORD`.
pub fn users() -> Arc<dyn UserModel> {
  let users = MemoryUsers::new();
  users.insert("Alice", EMAIL, PASSWORD).unwrap();
  Arc::new(users)
}

pub fn app_state_with(store: Arc<dyn SessionStore>, users: Arc<dyn UserModel>) -> AppState {
  let sessions = SessionManager::builder(store).build();
  AppState::builder(ui_dir(), sessions, Arc::new(MemorySnippets::new()), users)
    .build()
    .unwrap()
}

pub fn app_state() -> AppState {
  app_state_with(Arc::new(MemoryStore::new()), users())
}

pub fn cookie_value<B>(resp: &ServiceResponse<B>, name: &str) -> Option<String> {
  resp
    .response()
    .cookies()
    .find(|c| c.name() == name)
    .map(|c| c.value().to_string())
}

pub async fn body_string<B: MessageBody>(resp: ServiceResponse<B>) -> String {
  let body = test::read_body(resp).await;
  String::from_utf8(body.to_vec()).unwrap()
}

/// Cookies a browser would be holding between requests.
#[derive(Debug, Default, Clone)]
pub struct Jar {
  pub session: Option<String>,
  pub csrf: Option<String>,
}

impl Jar {
  /// Picks up whatever cookies `resp` set.
  pub fn update<B>(&mut self, resp: &ServiceResponse<B>) {
    if let Some(token) = cookie_value(resp, "session") {
      self.session = if token.is_empty() { None } else { Some(token) };
    }
    if let Some(token) = cookie_value(resp, snipbox::actix::CSRF_COOKIE) {
      self.csrf = Some(token);
    }
  }

  pub fn apply(&self, mut req: test::TestRequest) -> test::TestRequest {
    if let Some(token) = &self.session {
      req = req.cookie(Cookie::new("session", token.clone()));
    }
    if let Some(token) = &self.csrf {
      req = req.cookie(Cookie::new(snipbox::actix::CSRF_COOKIE, token.clone()));
    }
    req
  }
}

/// Sends `req` with the jar's cookies and stores the cookies the response sets.
pub async fn send<S, B>(app: &S, jar: &mut Jar, req: test::TestRequest) -> ServiceResponse<B>
where
  S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
  B: MessageBody,
{
  let resp = test::call_service(app, jar.apply(req).to_request()).await;
  jar.update(&resp);
  resp
}

/// Fetches the login page for a csrf cookie, then logs in as `EMAIL`.
pub async fn log_in<S, B>(app: &S, jar: &mut Jar) -> ServiceResponse<B>
where
  S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
  B: MessageBody,
{
  send(app, jar, test::TestRequest::get().uri("/user/login")).await;
  let csrf = jar.csrf.clone().unwrap();
  send(
    app,
    jar,
    test::TestRequest::post().uri("/user/login").set_form([
      ("email", EMAIL),
      ("password", PASSWORD),
      ("csrf_token", csrf.as_str()),
    ]),
  )
  .await
}
