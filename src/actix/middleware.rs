use crate::core::app::AppState;
use crate::core::data::RequestContext;
use crate::session::{SessionManager, SessionStatus};

use actix_web::{
  Error, HttpMessage,
  body::MessageBody,
  cookie::{Cookie, SameSite, time::Duration},
  dev::{Service, ServiceRequest, ServiceResponse, Transform},
};
use futures_util::future::{self, LocalBoxFuture};
use std::{rc::Rc, sync::Arc, task::Poll};

/// Name of the cookie carrying the anti-forgery token.
pub const CSRF_COOKIE: &str = "csrf_token";

/// Resolves per-request state before the handler runs and writes the matching
/// cookies after it returns.
///
/// Inserts a [`Session`](crate::session::Session) for the request's session
/// cookie and a [`RequestContext`] carrying the anti-forgery token into the
/// request extensions. A live session is touched on the way in, so its
/// lifetime runs from the latest request.
#[derive(Debug, Clone)]
pub struct RequestState {
  sessions: Arc<SessionManager>,
}

impl RequestState {
  pub fn new(app_state: &AppState) -> Self {
    Self {
      sessions: Arc::clone(app_state.sessions()),
    }
  }
}

impl<S, B> Transform<S, ServiceRequest> for RequestState
where
  S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
  B: MessageBody + 'static,
{
  type Response = ServiceResponse<B>;
  type Error = Error;
  type Transform = RequestStateMiddleware<S>;
  type InitError = ();
  type Future = future::Ready<Result<Self::Transform, Self::InitError>>;

  fn new_transform(&self, service: S) -> Self::Future {
    future::ok(RequestStateMiddleware {
      service: Rc::new(service),
      sessions: Arc::clone(&self.sessions),
    })
  }
}

pub struct RequestStateMiddleware<S> {
  service: Rc<S>,
  sessions: Arc<SessionManager>,
}

impl<S, B> Service<ServiceRequest> for RequestStateMiddleware<S>
where
  S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
  B: MessageBody + 'static,
{
  type Response = ServiceResponse<B>;
  type Error = Error;
  type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

  fn poll_ready(&self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
    self.service.poll_ready(cx)
  }

  fn call(&self, req: ServiceRequest) -> Self::Future {
    let service = self.service.clone();
    let sessions = self.sessions.clone();

    Box::pin(async move {
      let token = req
        .cookie(sessions.cookie_name())
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty());
      let session = sessions.session(token);
      // Every request counts as an access; a live session gets a new deadline
      // and its cookie re-sent.
      if let Err(e) = session.touch() {
        log::error!("Failed to extend session lifetime: {}", e);
      }

      let existing_csrf = req
        .cookie(CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty());
      let csrf_issued = existing_csrf.is_none();
      let csrf_token = existing_csrf.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

      req.extensions_mut().insert(session.clone());
      req.extensions_mut().insert(RequestContext::new(csrf_token.clone()));

      let mut res = service.call(req).await?;

      let session_cookie = match session.status() {
        SessionStatus::Unchanged => None,
        SessionStatus::Modified => session.token().map(|token| {
          base_cookie(sessions.cookie_name().to_string(), token, sessions.secure())
            .max_age(Duration::seconds(sessions.lifetime().num_seconds()))
            .finish()
        }),
        SessionStatus::Destroyed => {
          let mut cookie = base_cookie(sessions.cookie_name().to_string(), String::new(), sessions.secure()).finish();
          cookie.make_removal();
          Some(cookie)
        }
      };
      let csrf_cookie = csrf_issued.then(|| base_cookie(CSRF_COOKIE.to_string(), csrf_token, sessions.secure()).finish());

      for cookie in session_cookie.iter().chain(csrf_cookie.iter()) {
        if let Err(e) = res.response_mut().add_cookie(cookie) {
          log::error!("Failed to set cookie '{}': {}", cookie.name(), e);
        }
      }

      Ok(res)
    })
  }
}

fn base_cookie(name: String, value: String, secure: bool) -> actix_web::cookie::CookieBuilder<'static> {
  Cookie::build(name, value)
    .path("/")
    .http_only(true)
    .secure(secure)
    .same_site(SameSite::Lax)
}
