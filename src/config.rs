//! Process configuration read from the environment at startup.

use std::env;

use anyhow::{bail, Context};

use crate::auth::{jwt_secret, AuthError};
use crate::query::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub page_size: u32,
    pub frontend_url: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Startup probes of the database before giving up.
    pub db_connect_attempts: u32,
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // fail fast rather than on the first authenticated request
        match jwt_secret() {
            Ok(_) => {}
            Err(AuthError::MissingSecret) => bail!("JWT_SECRET must be set"),
            Err(e) => bail!(e),
        }
        let page_size = parsed("PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            bail!("PAGE_SIZE must be positive");
        }
        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            page_size,
            frontend_url: env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string()),
            database_url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 5)?,
            db_connect_attempts: parsed("DB_CONNECT_ATTEMPTS", 5)?,
        })
    }
}
