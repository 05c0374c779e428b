use std::str::FromStr;

use futures::future::BoxFuture;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::{
    config::StoreConfig,
    delegate::{Delegate, Source},
    entity::Entity,
    error::{Error, Result},
    models::{
        ChatHistory, Playlist, Problem, ProblemInPlaylist, ProblemSolved, Submission,
        TestCaseResult, TokenBlacklist, User,
    },
    tx::{BatchOutput, BatchStep, IsolationLevel, Tx, TxOptions},
};

/// Connection pool plus the transaction defaults it was configured with.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    tx_defaults: TxOptions,
}

impl Database {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|err| Error::Initialization(err.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool_options = if config.is_in_memory() {
            // One connection that never closes, otherwise the database vanishes.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            // Ensure the data directory exists
            if let Some(path) = config.database_url.strip_prefix("sqlite:") {
                let path = path.trim_start_matches("//");
                let path = path.split('?').next().unwrap_or(path);
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| Error::Initialization(err.to_string()))?;
                }
            }
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|err| Error::Initialization(err.to_string()))?;

        tracing::info!(url = %config.database_url, "connected to database");
        Ok(Self {
            pool,
            tx_defaults: config.transaction,
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn tx_defaults(&self) -> TxOptions {
        self.tx_defaults
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn delegate<E: Entity>(&self) -> Delegate<'_, E> {
        Delegate::new(Source::Pool(&self.pool))
    }

    pub fn users(&self) -> Delegate<'_, User> {
        self.delegate()
    }

    pub fn token_blacklist(&self) -> Delegate<'_, TokenBlacklist> {
        self.delegate()
    }

    pub fn problems(&self) -> Delegate<'_, Problem> {
        self.delegate()
    }

    pub fn submissions(&self) -> Delegate<'_, Submission> {
        self.delegate()
    }

    pub fn test_case_results(&self) -> Delegate<'_, TestCaseResult> {
        self.delegate()
    }

    pub fn problems_solved(&self) -> Delegate<'_, ProblemSolved> {
        self.delegate()
    }

    pub fn playlists(&self) -> Delegate<'_, Playlist> {
        self.delegate()
    }

    pub fn problems_in_playlist(&self) -> Delegate<'_, ProblemInPlaylist> {
        self.delegate()
    }

    pub fn chat_history(&self) -> Delegate<'_, ChatHistory> {
        self.delegate()
    }

    /// Runs `f` in a transaction with the configured defaults.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, Result<T>>,
    {
        self.transaction_with(self.tx_defaults, f).await
    }

    /// Runs `f` in a transaction: committed when it returns `Ok`, rolled back
    /// when it fails or outlives `options.timeout`.
    pub async fn transaction_with<T, F>(&self, options: TxOptions, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, Result<T>>,
    {
        if options.isolation_level != IsolationLevel::Serializable {
            tracing::debug!(
                level = ?options.isolation_level,
                "sqlite transactions are serializable"
            );
        }
        let begun = tokio::time::timeout(options.max_wait, self.pool.begin()).await;
        let inner = match begun {
            Ok(begun) => begun?,
            Err(_) => return Err(Error::TransactionStart(options.max_wait)),
        };
        let mut tx = Tx { inner };

        let outcome = tokio::time::timeout(options.timeout, f(&mut tx)).await;
        match outcome {
            Ok(Ok(value)) => {
                tx.inner.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "rolling back transaction");
                tx.rollback().await;
                Err(err)
            }
            Err(_) => {
                tracing::warn!(timeout = ?options.timeout, "transaction expired");
                tx.rollback().await;
                Err(Error::TransactionExpired(options.timeout))
            }
        }
    }

    /// Runs `steps` in order inside one transaction; either all of them take
    /// effect or none do.
    pub async fn batch(&self, steps: Vec<BatchStep>) -> Result<Vec<BatchOutput>> {
        self.batch_with(self.tx_defaults, steps).await
    }

    pub async fn batch_with(
        &self,
        options: TxOptions,
        steps: Vec<BatchStep>,
    ) -> Result<Vec<BatchOutput>> {
        self.transaction_with(options, move |tx| {
            Box::pin(async move {
                let mut outputs = Vec::with_capacity(steps.len());
                for step in steps {
                    outputs.push(step(&mut *tx).await?);
                }
                Ok(outputs)
            })
        })
        .await
    }
}
