//! HTTP handlers for the snippet site.

use crate::core::app::{AppState, Page};
use crate::core::data::{PageData, RequestContext};
use crate::error::SnipboxError;
use crate::session::{AUTHENTICATED_USER_ID, FLASH, Session};
use crate::validator::{FieldErrors, is_email, max_chars, min_chars, not_blank, permitted};

use actix_web::{
  Either, HttpResponse, Responder, Result, error,
  http::header,
  web::{self, ServiceConfig},
};
use serde::{Deserialize, Serialize};

/// Registers every route of the site.
pub fn configure(cfg: &mut ServiceConfig) {
  cfg
    .route("/", web::get().to(home))
    .route("/ping", web::get().to(ping))
    .route("/snippet/view/{id}", web::get().to(snippet_view))
    .route("/snippet/create", web::get().to(snippet_create))
    .route("/snippet/create", web::post().to(snippet_create_post))
    .route("/user/signup", web::get().to(user_signup))
    .route("/user/signup", web::post().to(user_signup_post))
    .route("/user/login", web::get().to(user_login))
    .route("/user/login", web::post().to(user_login_post))
    .route("/user/logout", web::post().to(user_logout_post));
}

fn see_other(location: &str) -> HttpResponse {
  HttpResponse::SeeOther()
    .insert_header((header::LOCATION, location))
    .finish()
}

fn check_csrf(request: &RequestContext, submitted: &str) -> Result<()> {
  if request.verify_csrf(submitted) {
    Ok(())
  } else {
    log::warn!("Rejected form post with a mismatched anti-forgery token");
    Err(error::ErrorBadRequest("Bad Request"))
  }
}

async fn ping() -> impl Responder {
  "OK"
}

async fn home(app: web::Data<AppState>) -> Result<Page, SnipboxError> {
  let snippets = app.snippets().latest()?;
  Ok(app.render("home.html", PageData::new().snippets(snippets)))
}

async fn snippet_view(app: web::Data<AppState>, path: web::Path<String>) -> Result<Page, SnipboxError> {
  let id = match path.parse::<i64>() {
    Ok(id) if id >= 1 => id,
    _ => return Err(SnipboxError::RecordNotFound),
  };
  let snippet = app.snippets().get(id)?;
  Ok(app.render("view.html", PageData::new().snippet(snippet)))
}

/// Submitted values and per-field errors of the create form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetCreateForm {
  pub title: String,
  pub content: String,
  pub expires: i64,
  #[serde(default, skip_serializing)]
  pub csrf_token: String,
  #[serde(default, skip_deserializing)]
  pub field_errors: FieldErrors,
}

impl Default for SnippetCreateForm {
  fn default() -> Self {
    Self {
      title: String::new(),
      content: String::new(),
      expires: 365,
      csrf_token: String::new(),
      field_errors: FieldErrors::default(),
    }
  }
}

impl SnippetCreateForm {
  fn validate(&mut self) -> bool {
    let errors = &mut self.field_errors;
    errors.check(not_blank(&self.title), "title", "This field cannot be blank");
    errors.check(
      max_chars(&self.title, 100),
      "title",
      "This field cannot be more than 100 characters long",
    );
    errors.check(not_blank(&self.content), "content", "This field cannot be blank");
    errors.check(permitted(&self.expires, &[1, 7, 365]), "expires", "This field must equal 1, 7 or 365");
    errors.is_empty()
  }
}

type PageOrRedirect = Either<HttpResponse, Page>;

/// The logged-in user, if the session names one the user model still knows.
fn authenticated_user(app: &AppState, session: &Session) -> Result<Option<i64>, SnipboxError> {
  match session.get_value(AUTHENTICATED_USER_ID)?.and_then(|v| v.as_i64()) {
    Some(id) if app.users().exists(id)? => Ok(Some(id)),
    _ => Ok(None),
  }
}

fn redirect_unless_authenticated(app: &AppState, session: &Session) -> Result<Option<PageOrRedirect>, SnipboxError> {
  match authenticated_user(app, session)? {
    Some(_) => Ok(None),
    None => Ok(Some(Either::Left(see_other("/user/login")))),
  }
}

async fn snippet_create(app: web::Data<AppState>, session: Session) -> Result<PageOrRedirect, SnipboxError> {
  if let Some(redirect) = redirect_unless_authenticated(&app, &session)? {
    return Ok(redirect);
  }
  let page = PageData::new().form(&SnippetCreateForm::default())?;
  Ok(Either::Right(app.render("create.html", page)))
}

async fn snippet_create_post(
  app: web::Data<AppState>,
  session: Session,
  request: RequestContext,
  form: web::Form<SnippetCreateForm>,
) -> Result<PageOrRedirect> {
  if let Some(redirect) = redirect_unless_authenticated(&app, &session)? {
    return Ok(redirect);
  }
  let mut form = form.into_inner();
  check_csrf(&request, &form.csrf_token)?;

  if !form.validate() {
    let page = PageData::new().form(&form)?;
    return Ok(Either::Right(app.render("create.html", page).with_status(422)));
  }

  let expires_in = chrono::Duration::days(form.expires);
  let id = app.snippets().insert(&form.title, &form.content, expires_in)?;
  session.put(FLASH, "Snippet successfully created!")?;
  Ok(Either::Left(see_other(&format!("/snippet/view/{}", id))))
}

/// Submitted values and errors of the signup form. The password is never echoed back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSignupForm {
  pub name: String,
  pub email: String,
  #[serde(skip_serializing)]
  pub password: String,
  #[serde(skip_serializing)]
  pub csrf_token: String,
  #[serde(skip_deserializing)]
  pub field_errors: FieldErrors,
}

impl UserSignupForm {
  fn validate(&mut self) -> bool {
    let errors = &mut self.field_errors;
    errors.check(not_blank(&self.name), "name", "This field cannot be blank");
    errors.check(not_blank(&self.email), "email", "This field cannot be blank");
    errors.check(is_email(&self.email), "email", "This field must be a valid email address");
    errors.check(not_blank(&self.password), "password", "This field cannot be blank");
    errors.check(
      min_chars(&self.password, 8),
      "password",
      "This field must be at least 8 characters long",
    );
    errors.is_empty()
  }
}

async fn user_signup(app: web::Data<AppState>) -> Result<Page, SnipboxError> {
  let page = PageData::new().form(&UserSignupForm::default())?;
  Ok(app.render("signup.html", page))
}

async fn user_signup_post(
  app: web::Data<AppState>,
  session: Session,
  request: RequestContext,
  form: web::Form<UserSignupForm>,
) -> Result<PageOrRedirect> {
  let mut form = form.into_inner();
  check_csrf(&request, &form.csrf_token)?;

  if form.validate() {
    match app.users().insert(&form.name, &form.email, &form.password) {
      Ok(_) => {
        session.put(FLASH, "Your signup was successful. Please log in.")?;
        return Ok(Either::Left(see_other("/user/login")));
      }
      Err(SnipboxError::DuplicateEmail) => form.field_errors.add("email", "Email address is already in use"),
      Err(e) => return Err(e.into()),
    }
  }

  let page = PageData::new().form(&form)?;
  Ok(Either::Right(app.render("signup.html", page).with_status(422)))
}

/// Submitted values and errors of the login form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserLoginForm {
  pub email: String,
  #[serde(skip_serializing)]
  pub password: String,
  #[serde(skip_serializing)]
  pub csrf_token: String,
  #[serde(skip_deserializing)]
  pub field_errors: FieldErrors,
  #[serde(skip_deserializing)]
  pub non_field_errors: Vec<String>,
}

impl UserLoginForm {
  fn validate(&mut self) -> bool {
    let errors = &mut self.field_errors;
    errors.check(not_blank(&self.email), "email", "This field cannot be blank");
    errors.check(is_email(&self.email), "email", "This field must be a valid email address");
    errors.check(not_blank(&self.password), "password", "This field cannot be blank");
    errors.is_empty()
  }
}

async fn user_login(app: web::Data<AppState>) -> Result<Page, SnipboxError> {
  let page = PageData::new().form(&UserLoginForm::default())?;
  Ok(app.render("login.html", page))
}

async fn user_login_post(
  app: web::Data<AppState>,
  session: Session,
  request: RequestContext,
  form: web::Form<UserLoginForm>,
) -> Result<PageOrRedirect> {
  let mut form = form.into_inner();
  check_csrf(&request, &form.csrf_token)?;

  if form.validate() {
    match app.users().authenticate(&form.email, &form.password) {
      Ok(id) => {
        // New privilege level, new token.
        session.renew()?;
        session.put(AUTHENTICATED_USER_ID, id)?;
        session.put(FLASH, "You've been logged in successfully!")?;
        return Ok(Either::Left(see_other("/snippet/create")));
      }
      Err(SnipboxError::InvalidCredentials) => form.non_field_errors.push("Email or password is incorrect".to_string()),
      Err(e) => return Err(e.into()),
    }
  }

  let page = PageData::new().form(&form)?;
  Ok(Either::Right(app.render("login.html", page).with_status(422)))
}

/// Only the anti-forgery field is read.
#[derive(Debug, Deserialize)]
pub struct TokenForm {
  #[serde(default)]
  pub csrf_token: String,
}

async fn user_logout_post(session: Session, request: RequestContext, form: web::Form<TokenForm>) -> Result<HttpResponse> {
  check_csrf(&request, &form.csrf_token)?;

  session.renew()?;
  session.remove(AUTHENTICATED_USER_ID)?;
  session.put(FLASH, "You've been logged out successfully!")?;
  Ok(see_other("/"))
}
