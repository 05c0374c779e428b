//! The traits tying a record type to its table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, FromRow};
use uuid::Uuid;

use crate::{
    filter::Filter,
    models::{
        ChatHistory, Playlist, Problem, ProblemInPlaylist, ProblemSolved, Submission,
        TestCaseResult, TokenBlacklist, User,
    },
    schema::{EntityKind, Schema},
    value::Value,
};

/// A persisted record type.
pub trait Entity:
    for<'r> FromRow<'r, SqliteRow> + Serialize + Clone + Send + Sync + Unpin + 'static
{
    /// Unique lookup accepted by `find_unique`, `update`, `upsert` and `delete`.
    type Key: UniqueKey;
    type Create: Insertable;
    type Update: Changes;

    const KIND: EntityKind;

    fn schema() -> &'static Schema {
        Self::KIND.schema()
    }

    fn id(&self) -> &str;

    /// Value of the id or a foreign key column, used to stitch relations.
    fn reference(&self, field: &str) -> Option<&str>;

    fn into_any(self) -> AnyModel;

    fn from_any(model: &AnyModel) -> Option<&Self>;
}

pub trait UniqueKey: Send + Sync + 'static {
    fn into_filter(self) -> Filter;
}

/// Plain string keys address the primary key.
impl UniqueKey for String {
    fn into_filter(self) -> Filter {
        Filter::field("id").equals(self)
    }
}

pub trait Insertable: Send + Sync + 'static {
    /// Every column of the row, with defaults filled in.
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)>;
}

pub trait Changes: Send + Sync + 'static {
    fn into_assignments(self) -> Vec<Assignment>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: &'static str,
    pub op: AssignOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignOp {
    Set(Value),
    /// Append to a string list.
    Push(Vec<String>),
    Increment(i64),
    Decrement(i64),
    Multiply(i64),
    Divide(i64),
}

impl Assignment {
    pub fn set(field: &'static str, value: impl Into<Value>) -> Self {
        Self {
            field,
            op: AssignOp::Set(value.into()),
        }
    }
}

/// Update of a string list column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListUpdate {
    Set(Vec<String>),
    Push(Vec<String>),
}

/// Atomic update of an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntUpdate {
    Set(i32),
    Increment(i32),
    Decrement(i32),
    Multiply(i32),
    Divide(i32),
}

/// Collects the assignments of an update input.
#[derive(Default)]
pub(crate) struct AssignmentList(Vec<Assignment>);

impl AssignmentList {
    pub(crate) fn set<T: Into<Value>>(mut self, field: &'static str, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.0.push(Assignment::set(field, value));
        }
        self
    }

    pub(crate) fn list(mut self, field: &'static str, update: Option<ListUpdate>) -> Self {
        let op = match update {
            Some(ListUpdate::Set(items)) => AssignOp::Set(items.into()),
            Some(ListUpdate::Push(items)) => AssignOp::Push(items),
            None => return self,
        };
        self.0.push(Assignment { field, op });
        self
    }

    pub(crate) fn int(mut self, field: &'static str, update: Option<IntUpdate>) -> Self {
        let op = match update {
            Some(IntUpdate::Set(v)) => AssignOp::Set(v.into()),
            Some(IntUpdate::Increment(v)) => AssignOp::Increment(v.into()),
            Some(IntUpdate::Decrement(v)) => AssignOp::Decrement(v.into()),
            Some(IntUpdate::Multiply(v)) => AssignOp::Multiply(v.into()),
            Some(IntUpdate::Divide(v)) => AssignOp::Divide(v.into()),
            None => return self,
        };
        self.0.push(Assignment { field, op });
        self
    }

    pub(crate) fn build(self) -> Vec<Assignment> {
        self.0
    }
}

pub(crate) fn new_id(id: Option<String>) -> Value {
    Value::Text(id.unwrap_or_else(|| Uuid::new_v4().to_string()))
}

/// Any record, used where the concrete type is only known at runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnyModel {
    User(User),
    TokenBlacklist(TokenBlacklist),
    Problem(Problem),
    Submission(Submission),
    TestCaseResult(TestCaseResult),
    ProblemSolved(ProblemSolved),
    Playlist(Playlist),
    ProblemInPlaylist(ProblemInPlaylist),
    ChatHistory(ChatHistory),
}

macro_rules! dispatch {
    ($model:expr, $inner:ident => $body:expr) => {
        match $model {
            AnyModel::User($inner) => $body,
            AnyModel::TokenBlacklist($inner) => $body,
            AnyModel::Problem($inner) => $body,
            AnyModel::Submission($inner) => $body,
            AnyModel::TestCaseResult($inner) => $body,
            AnyModel::ProblemSolved($inner) => $body,
            AnyModel::Playlist($inner) => $body,
            AnyModel::ProblemInPlaylist($inner) => $body,
            AnyModel::ChatHistory($inner) => $body,
        }
    };
}

impl AnyModel {
    pub fn kind(&self) -> EntityKind {
        match self {
            AnyModel::User(_) => EntityKind::User,
            AnyModel::TokenBlacklist(_) => EntityKind::TokenBlacklist,
            AnyModel::Problem(_) => EntityKind::Problem,
            AnyModel::Submission(_) => EntityKind::Submission,
            AnyModel::TestCaseResult(_) => EntityKind::TestCaseResult,
            AnyModel::ProblemSolved(_) => EntityKind::ProblemSolved,
            AnyModel::Playlist(_) => EntityKind::Playlist,
            AnyModel::ProblemInPlaylist(_) => EntityKind::ProblemInPlaylist,
            AnyModel::ChatHistory(_) => EntityKind::ChatHistory,
        }
    }

    pub fn id(&self) -> &str {
        dispatch!(self, inner => inner.id())
    }

    pub fn reference(&self, field: &str) -> Option<&str> {
        dispatch!(self, inner => inner.reference(field))
    }

    pub fn downcast<E: Entity>(&self) -> Option<&E> {
        E::from_any(self)
    }
}
