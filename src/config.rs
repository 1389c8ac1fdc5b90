use std::{env, fmt::Display, str::FromStr, time::Duration};

use crate::sse::DEFAULT_CAPACITY;
use crate::votes::DEFAULT_RETRY_LIMIT;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Unset means polls live in process memory.
    pub database_url: Option<String>,
    pub vote_retry_limit: u32,
    pub broadcast_capacity: usize,
    /// Zero disables the server-side duplicate vote check.
    pub vote_token_ttl: Duration,
    pub session_expiry: Duration,
    pub allowed_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            database_url: None,
            vote_retry_limit: DEFAULT_RETRY_LIMIT,
            broadcast_capacity: DEFAULT_CAPACITY,
            vote_token_ttl: Duration::from_secs(24 * 60 * 60),
            session_expiry: Duration::from_secs(60 * 60),
            allowed_origin: None,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            debug!("no .env file loaded: {e}");
        }

        let defaults = Config::default();
        Self {
            port: try_load("PORT", defaults.port),
            database_url: optional("DATABASE_URL"),
            vote_retry_limit: try_load("VOTE_RETRY_LIMIT", defaults.vote_retry_limit),
            broadcast_capacity: try_load("BROADCAST_CAPACITY", defaults.broadcast_capacity),
            vote_token_ttl: Duration::from_secs(try_load(
                "VOTE_TOKEN_TTL_SECS",
                defaults.vote_token_ttl.as_secs(),
            )),
            session_expiry: Duration::from_secs(try_load(
                "SESSION_EXPIRY_SECS",
                defaults.session_expiry.as_secs(),
            )),
            allowed_origin: optional("ALLOWED_ORIGIN"),
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}
