use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, types::Json, FromRow, Row};

use crate::{
    entity::{new_id, AnyModel, Assignment, AssignmentList, Changes, Entity, Insertable},
    schema::{EntityKind, Field, FieldKind, Relation, RelationKind, Schema},
    value::Value,
};

pub static SCHEMA: Schema = Schema {
    model: "Submission",
    table: "submissions",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::required("user_id", FieldKind::Id),
        Field::required("problem_id", FieldKind::Id),
        Field::required("source_code", FieldKind::Json),
        Field::required("language", FieldKind::Text),
        Field::optional("stdin", FieldKind::Text),
        Field::optional("stdout", FieldKind::Text),
        Field::optional("stderr", FieldKind::Text),
        Field::optional("compile_output", FieldKind::Text),
        Field::required("status", FieldKind::Text),
        Field::optional("memory", FieldKind::Text),
        Field::optional("time", FieldKind::Text),
        Field::required("created_at", FieldKind::Timestamp),
    ],
    relations: &[
        Relation {
            name: "user",
            target: EntityKind::User,
            kind: RelationKind::BelongsTo {
                foreign_key: "user_id",
            },
        },
        Relation {
            name: "problem",
            target: EntityKind::Problem,
            kind: RelationKind::BelongsTo {
                foreign_key: "problem_id",
            },
        },
        Relation {
            name: "test_case_results",
            target: EntityKind::TestCaseResult,
            kind: RelationKind::HasMany {
                foreign_key: "submission_id",
            },
        },
    ],
    unique: &[],
};

/// A user's attempt at a problem as reported by the judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub problem_id: String,
    pub source_code: serde_json::Value,
    pub language: String,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub status: String,
    pub memory: Option<String>,
    pub time: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Submission {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            problem_id: row.try_get("problem_id")?,
            source_code: row.try_get::<Json<serde_json::Value>, _>("source_code")?.0,
            language: row.try_get("language")?,
            stdin: row.try_get("stdin")?,
            stdout: row.try_get("stdout")?,
            stderr: row.try_get("stderr")?,
            compile_output: row.try_get("compile_output")?,
            status: row.try_get("status")?,
            memory: row.try_get("memory")?,
            time: row.try_get("time")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewSubmission {
    pub id: Option<String>,
    pub user_id: String,
    pub problem_id: String,
    pub source_code: serde_json::Value,
    pub language: String,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub status: String,
    pub memory: Option<String>,
    pub time: Option<String>,
}

impl Insertable for NewSubmission {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        vec![
            ("id", new_id(self.id)),
            ("user_id", self.user_id.into()),
            ("problem_id", self.problem_id.into()),
            ("source_code", self.source_code.into()),
            ("language", self.language.into()),
            ("stdin", self.stdin.into()),
            ("stdout", self.stdout.into()),
            ("stderr", self.stderr.into()),
            ("compile_output", self.compile_output.into()),
            ("status", self.status.into()),
            ("memory", self.memory.into()),
            ("time", self.time.into()),
            ("created_at", now.into()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionUpdate {
    pub source_code: Option<serde_json::Value>,
    pub language: Option<String>,
    pub stdin: Option<Option<String>>,
    pub stdout: Option<Option<String>>,
    pub stderr: Option<Option<String>>,
    pub compile_output: Option<Option<String>>,
    pub status: Option<String>,
    pub memory: Option<Option<String>>,
    pub time: Option<Option<String>>,
}

impl Changes for SubmissionUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .set("source_code", self.source_code)
            .set("language", self.language)
            .set("stdin", self.stdin)
            .set("stdout", self.stdout)
            .set("stderr", self.stderr)
            .set("compile_output", self.compile_output)
            .set("status", self.status)
            .set("memory", self.memory)
            .set("time", self.time)
            .build()
    }
}

impl Entity for Submission {
    type Key = String;
    type Create = NewSubmission;
    type Update = SubmissionUpdate;

    const KIND: EntityKind = EntityKind::Submission;

    fn id(&self) -> &str {
        &self.id
    }

    fn reference(&self, field: &str) -> Option<&str> {
        match field {
            "id" => Some(&self.id),
            "user_id" => Some(&self.user_id),
            "problem_id" => Some(&self.problem_id),
            _ => None,
        }
    }

    fn into_any(self) -> AnyModel {
        AnyModel::Submission(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::Submission(submission) => Some(submission),
            _ => None,
        }
    }
}
