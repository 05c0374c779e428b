use std::{env, time::Duration};

use crate::tx::TxOptions;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    /// Defaults for `Database::transaction` and `Database::batch`.
    pub transaction: TxOptions,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            transaction: TxOptions::default(),
        }
    }

    pub fn from_env() -> Self {
        let defaults = TxOptions::default();
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/codejudge.db".to_string()),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(5),
            busy_timeout: millis("DATABASE_BUSY_TIMEOUT_MS").unwrap_or(Duration::from_secs(5)),
            transaction: TxOptions {
                max_wait: millis("TX_MAX_WAIT_MS").unwrap_or(defaults.max_wait),
                timeout: millis("TX_TIMEOUT_MS").unwrap_or(defaults.timeout),
                ..defaults
            },
        }
    }

    /// Each connection to `:memory:` opens its own empty database.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

fn millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|ms| ms.parse().ok())
        .map(Duration::from_millis)
}
