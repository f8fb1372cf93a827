use actix_web::{App, HttpServer, web};
use anyhow::Context as _;
use clap::Parser;
use snipbox::actix::RequestState;
use snipbox::models::{MemorySnippets, MemoryUsers};
use snipbox::session::{FileStore, SessionManager};
use snipbox::{AppState, handlers};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Serve the snippet site.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Config {
  /// HTTP network address.
  #[arg(long, env = "SNIPBOX_ADDR", default_value = "127.0.0.1:4000")]
  addr: String,

  /// Directory holding base.html, partials/ and pages/.
  #[arg(long, env = "SNIPBOX_UI_DIR", default_value = "ui/html")]
  ui_dir: PathBuf,

  /// Directory session records are persisted in.
  #[arg(long, env = "SNIPBOX_SESSION_DIR", default_value = "data/sessions")]
  session_dir: PathBuf,

  /// Hours a session lives after its last request (1 to 8760).
  #[arg(
    long,
    env = "SNIPBOX_SESSION_LIFETIME_HOURS",
    default_value_t = 12,
    value_parser = clap::value_parser!(i64).range(1..=8760)
  )]
  session_lifetime_hours: i64,

  /// Send cookies without the Secure flag, for plain-HTTP development.
  #[arg(long, env = "SNIPBOX_INSECURE_COOKIES")]
  insecure_cookies: bool,

  /// Seconds between sweeps of expired session records.
  #[arg(long, env = "SNIPBOX_PURGE_INTERVAL_SECS", default_value_t = 300)]
  purge_interval_secs: u64,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
  let config = Config::parse();
  env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

  let store = Arc::new(FileStore::open(&config.session_dir).context("opening session store")?);
  let sessions = SessionManager::builder(store)
    .lifetime(chrono::Duration::hours(config.session_lifetime_hours))
    .secure(!config.insecure_cookies)
    .build();

  // Every page is composed here; a broken fragment aborts startup.
  let app_state = AppState::builder(
    &config.ui_dir,
    sessions,
    Arc::new(MemorySnippets::new()),
    Arc::new(MemoryUsers::new()),
  )
  .build()
  .with_context(|| format!("building template cache from {:?}", config.ui_dir))?;

  let purge_sessions = Arc::clone(app_state.sessions());
  let purge_every = Duration::from_secs(config.purge_interval_secs.max(1));
  actix_web::rt::spawn(async move {
    let mut interval = tokio::time::interval(purge_every);
    loop {
      interval.tick().await;
      match purge_sessions.purge_expired() {
        Ok(0) => {}
        Ok(n) => log::debug!("Purged {} expired sessions", n),
        Err(e) => log::error!("Failed to purge expired sessions: {}", e),
      }
    }
  });

  log::info!("🚀 Starting server at http://{}", config.addr);

  HttpServer::new(move || {
    App::new()
      .app_data(web::Data::new(app_state.clone()))
      .wrap(RequestState::new(&app_state))
      .configure(handlers::configure)
  })
  .bind(&config.addr)?
  .run()
  .await?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::try_parse_from(["snipbox"]).unwrap();
    assert_eq!(config.session_lifetime_hours, 12);
    assert!(!config.insecure_cookies);
  }

  #[test]
  fn test_session_lifetime_is_bounded() {
    for hours in ["0", "-1", "8761", "9223372036854775807"] {
      assert!(
        Config::try_parse_from(["snipbox", "--session-lifetime-hours", hours]).is_err(),
        "{} hours accepted",
        hours
      );
    }
    let config = Config::try_parse_from(["snipbox", "--session-lifetime-hours", "8760"]).unwrap();
    assert_eq!(config.session_lifetime_hours, 8760);
  }
}
