//! Interactive transactions and ordered batches.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};

use crate::{
    delegate::{BatchCount, Delegate, Source},
    entity::{AnyModel, Entity},
    models::{
        ChatHistory, Playlist, Problem, ProblemInPlaylist, ProblemSolved, Submission,
        TestCaseResult, TokenBlacklist, User,
    },
};

/// Accepted for every transaction. SQLite runs all of them serializably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    #[default]
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    /// How long to wait for a connection and `BEGIN`.
    pub max_wait: Duration,
    /// How long the whole callback may run before it is rolled back.
    pub timeout: Duration,
    pub isolation_level: IsolationLevel,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            isolation_level: IsolationLevel::default(),
        }
    }
}

impl TxOptions {
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }
}

/// An open transaction. Delegates obtained here run inside it.
pub struct Tx {
    pub(crate) inner: Transaction<'static, Sqlite>,
}

impl Tx {
    pub fn delegate<E: Entity>(&mut self) -> Delegate<'_, E> {
        Delegate::new(Source::Conn(&mut *self.inner))
    }

    pub fn users(&mut self) -> Delegate<'_, User> {
        self.delegate()
    }

    pub fn token_blacklist(&mut self) -> Delegate<'_, TokenBlacklist> {
        self.delegate()
    }

    pub fn problems(&mut self) -> Delegate<'_, Problem> {
        self.delegate()
    }

    pub fn submissions(&mut self) -> Delegate<'_, Submission> {
        self.delegate()
    }

    pub fn test_case_results(&mut self) -> Delegate<'_, TestCaseResult> {
        self.delegate()
    }

    pub fn problems_solved(&mut self) -> Delegate<'_, ProblemSolved> {
        self.delegate()
    }

    pub fn playlists(&mut self) -> Delegate<'_, Playlist> {
        self.delegate()
    }

    pub fn problems_in_playlist(&mut self) -> Delegate<'_, ProblemInPlaylist> {
        self.delegate()
    }

    pub fn chat_history(&mut self) -> Delegate<'_, ChatHistory> {
        self.delegate()
    }

    pub(crate) async fn rollback(self) {
        if let Err(err) = self.inner.rollback().await {
            tracing::warn!(error = %err, "rollback failed");
        }
    }
}

/// What one batch step produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchOutput {
    Record(AnyModel),
    Records(Vec<AnyModel>),
    Count(BatchCount),
    Number(u64),
    Empty,
}

impl BatchOutput {
    pub fn record<E: Entity>(record: E) -> Self {
        BatchOutput::Record(record.into_any())
    }

    pub fn records<E: Entity>(records: Vec<E>) -> Self {
        BatchOutput::Records(records.into_iter().map(Entity::into_any).collect())
    }

    pub fn as_record<E: Entity>(&self) -> Option<&E> {
        match self {
            BatchOutput::Record(model) => E::from_any(model),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            BatchOutput::Count(BatchCount { count }) | BatchOutput::Number(count) => Some(*count),
            _ => None,
        }
    }
}

impl From<BatchCount> for BatchOutput {
    fn from(count: BatchCount) -> Self {
        BatchOutput::Count(count)
    }
}

impl From<u64> for BatchOutput {
    fn from(n: u64) -> Self {
        BatchOutput::Number(n)
    }
}

/// One deferred operation of a batch.
pub type BatchStep = Box<
    dyn for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, crate::Result<BatchOutput>> + Send,
>;

/// Boxes a closure as a [`BatchStep`], pinning down its higher-ranked signature.
pub fn step<F>(f: F) -> BatchStep
where
    F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, crate::Result<BatchOutput>> + Send + 'static,
{
    Box::new(f)
}
