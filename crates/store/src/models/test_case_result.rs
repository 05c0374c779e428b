use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{
        new_id, AnyModel, Assignment, AssignmentList, Changes, Entity, Insertable, IntUpdate,
    },
    schema::{EntityKind, Field, FieldKind, Relation, RelationKind, Schema},
    value::Value,
};

pub static SCHEMA: Schema = Schema {
    model: "TestCaseResult",
    table: "test_case_results",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::required("submission_id", FieldKind::Id),
        Field::required("test_case", FieldKind::Int),
        Field::required("passed", FieldKind::Bool),
        Field::optional("stdout", FieldKind::Text),
        Field::required("expected", FieldKind::Text),
        Field::optional("stderr", FieldKind::Text),
        Field::optional("compile_output", FieldKind::Text),
        Field::required("status", FieldKind::Text),
        Field::optional("memory", FieldKind::Text),
        Field::optional("time", FieldKind::Text),
        Field::required("created_at", FieldKind::Timestamp),
    ],
    relations: &[Relation {
        name: "submission",
        target: EntityKind::Submission,
        kind: RelationKind::BelongsTo {
            foreign_key: "submission_id",
        },
    }],
    unique: &[],
};

/// Outcome of one test case of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TestCaseResult {
    pub id: String,
    pub submission_id: String,
    pub test_case: i32,
    pub passed: bool,
    pub stdout: Option<String>,
    pub expected: String,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub status: String,
    pub memory: Option<String>,
    pub time: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTestCaseResult {
    pub id: Option<String>,
    pub submission_id: String,
    pub test_case: i32,
    pub passed: bool,
    pub stdout: Option<String>,
    pub expected: String,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub status: String,
    pub memory: Option<String>,
    pub time: Option<String>,
}

impl Insertable for NewTestCaseResult {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        vec![
            ("id", new_id(self.id)),
            ("submission_id", self.submission_id.into()),
            ("test_case", self.test_case.into()),
            ("passed", self.passed.into()),
            ("stdout", self.stdout.into()),
            ("expected", self.expected.into()),
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
pub struct TestCaseResultUpdate {
    pub test_case: Option<IntUpdate>,
    pub passed: Option<bool>,
    pub stdout: Option<Option<String>>,
    pub expected: Option<String>,
    pub stderr: Option<Option<String>>,
    pub compile_output: Option<Option<String>>,
    pub status: Option<String>,
    pub memory: Option<Option<String>>,
    pub time: Option<Option<String>>,
}

impl Changes for TestCaseResultUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .int("test_case", self.test_case)
            .set("passed", self.passed)
            .set("stdout", self.stdout)
            .set("expected", self.expected)
            .set("stderr", self.stderr)
            .set("compile_output", self.compile_output)
            .set("status", self.status)
            .set("memory", self.memory)
            .set("time", self.time)
            .build()
    }
}

impl Entity for TestCaseResult {
    type Key = String;
    type Create = NewTestCaseResult;
    type Update = TestCaseResultUpdate;

    const KIND: EntityKind = EntityKind::TestCaseResult;

    fn id(&self) -> &str {
        &self.id
    }

    fn reference(&self, field: &str) -> Option<&str> {
        match field {
            "id" => Some(&self.id),
            "submission_id" => Some(&self.submission_id),
            _ => None,
        }
    }

    fn into_any(self) -> AnyModel {
        AnyModel::TestCaseResult(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::TestCaseResult(result) => Some(result),
            _ => None,
        }
    }
}
