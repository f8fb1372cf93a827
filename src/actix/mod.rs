use crate::core::app::Page;
use crate::core::data::RequestContext;
use crate::error::{Result, SnipboxError};
use crate::session::Session;

use actix_web::{
  FromRequest, HttpMessage, HttpRequest, HttpResponse, Responder, ResponseError,
  body::BoxBody,
  dev::Payload,
  http::{StatusCode, header::ContentType},
};
use std::future::{Ready, ready};

mod middleware;

pub use middleware::{CSRF_COOKIE, RequestState};

impl Page {
  fn render_for(&self, req: &HttpRequest) -> Result<String> {
    let extensions = req.extensions();
    let (Some(session), Some(context)) = (extensions.get::<Session>(), extensions.get::<RequestContext>()) else {
      return Err(SnipboxError::Session(
        "request has no session; is the RequestState middleware installed?".to_string(),
      ));
    };
    self.render_with(session, context)
  }
}

impl Responder for Page {
  type Body = BoxBody;

  fn respond_to(self, req: &HttpRequest) -> HttpResponse<Self::Body> {
    // Rendered in full before the status line goes out, so a failing page
    // still becomes a clean 500 instead of a truncated 200.
    match self.render_for(req) {
      Ok(body) => HttpResponse::build(StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK))
        .content_type(ContentType::html())
        .body(body),
      Err(e) => e.error_response(),
    }
  }
}

impl ResponseError for SnipboxError {
  fn status_code(&self) -> StatusCode {
    match self {
      SnipboxError::RecordNotFound => StatusCode::NOT_FOUND,
      SnipboxError::InvalidCredentials => StatusCode::UNAUTHORIZED,
      SnipboxError::DuplicateEmail => StatusCode::CONFLICT,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// Clients only ever see the canonical reason phrase; the detail goes to the log.
  fn error_response(&self) -> HttpResponse<BoxBody> {
    let status = self.status_code();
    if status.is_server_error() {
      match self {
        SnipboxError::PageNotFound(_) => log::error!("Template cache misconfiguration: {}", self),
        _ => log::error!("{}", self),
      }
    }
    HttpResponse::build(status)
      .content_type(ContentType::plaintext())
      .body(status.canonical_reason().unwrap_or("Error"))
  }
}

fn missing_extension(what: &str) -> actix_web::Error {
  log::error!("No {} on request; is the RequestState middleware installed?", what);
  actix_web::error::ErrorInternalServerError("Internal Server Error")
}

impl FromRequest for Session {
  type Error = actix_web::Error;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
    ready(
      req
        .extensions()
        .get::<Session>()
        .cloned()
        .ok_or_else(|| missing_extension("session")),
    )
  }
}

impl FromRequest for RequestContext {
  type Error = actix_web::Error;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
    ready(
      req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| missing_extension("request context")),
    )
  }
}
