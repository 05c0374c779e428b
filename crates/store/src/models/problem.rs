use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, types::Json, FromRow, Row};

use super::{Difficulty, DIFFICULTY};
use crate::{
    entity::{
        new_id, AnyModel, Assignment, AssignmentList, Changes, Entity, Insertable, ListUpdate,
    },
    schema::{EntityKind, Field, FieldKind, Relation, RelationKind, Schema},
    value::Value,
};

pub static SCHEMA: Schema = Schema {
    model: "Problem",
    table: "problems",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::required("title", FieldKind::Text),
        Field::required("description", FieldKind::Text),
        Field::required("difficulty", DIFFICULTY),
        Field::required("tags", FieldKind::StringList),
        Field::required("user_id", FieldKind::Id),
        Field::required("examples", FieldKind::Json),
        Field::required("constraints", FieldKind::Text),
        Field::optional("hints", FieldKind::Text),
        Field::optional("editorial", FieldKind::Text),
        Field::required("test_cases", FieldKind::Json),
        Field::required("code_snippets", FieldKind::Json),
        Field::required("reference_solutions", FieldKind::Json),
        Field::required("created_at", FieldKind::Timestamp),
        Field::required("updated_at", FieldKind::Timestamp),
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
            name: "in_playlists",
            target: EntityKind::ProblemInPlaylist,
            kind: RelationKind::HasMany {
                foreign_key: "problem_id",
            },
        },
        Relation {
            name: "solved_by",
            target: EntityKind::ProblemSolved,
            kind: RelationKind::HasMany {
                foreign_key: "problem_id",
            },
        },
        Relation {
            name: "submissions",
            target: EntityKind::Submission,
            kind: RelationKind::HasMany {
                foreign_key: "problem_id",
            },
        },
        Relation {
            name: "chat_history",
            target: EntityKind::ChatHistory,
            kind: RelationKind::HasMany {
                foreign_key: "problem_id",
            },
        },
    ],
    unique: &[],
};

/// A judged problem. The JSON documents are owned by the authoring tools and
/// the judge; this layer stores them as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub user_id: String,
    pub examples: serde_json::Value,
    pub constraints: String,
    pub hints: Option<String>,
    pub editorial: Option<String>,
    pub test_cases: serde_json::Value,
    pub code_snippets: serde_json::Value,
    pub reference_solutions: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Problem {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            difficulty: row.try_get("difficulty")?,
            tags: row.try_get::<Json<Vec<String>>, _>("tags")?.0,
            user_id: row.try_get("user_id")?,
            examples: row.try_get::<Json<serde_json::Value>, _>("examples")?.0,
            constraints: row.try_get("constraints")?,
            hints: row.try_get("hints")?,
            editorial: row.try_get("editorial")?,
            test_cases: row.try_get::<Json<serde_json::Value>, _>("test_cases")?.0,
            code_snippets: row.try_get::<Json<serde_json::Value>, _>("code_snippets")?.0,
            reference_solutions: row
                .try_get::<Json<serde_json::Value>, _>("reference_solutions")?
                .0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewProblem {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub user_id: String,
    pub examples: serde_json::Value,
    pub constraints: String,
    pub hints: Option<String>,
    pub editorial: Option<String>,
    pub test_cases: serde_json::Value,
    pub code_snippets: serde_json::Value,
    pub reference_solutions: serde_json::Value,
}

impl NewProblem {
    /// A problem with empty documents, for callers that fill them in later.
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: String::new(),
            difficulty,
            tags: Vec::new(),
            user_id: user_id.into(),
            examples: serde_json::json!({}),
            constraints: String::new(),
            hints: None,
            editorial: None,
            test_cases: serde_json::json!([]),
            code_snippets: serde_json::json!({}),
            reference_solutions: serde_json::json!({}),
        }
    }
}

impl Insertable for NewProblem {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        vec![
            ("id", new_id(self.id)),
            ("title", self.title.into()),
            ("description", self.description.into()),
            ("difficulty", self.difficulty.into()),
            ("tags", self.tags.into()),
            ("user_id", self.user_id.into()),
            ("examples", self.examples.into()),
            ("constraints", self.constraints.into()),
            ("hints", self.hints.into()),
            ("editorial", self.editorial.into()),
            ("test_cases", self.test_cases.into()),
            ("code_snippets", self.code_snippets.into()),
            ("reference_solutions", self.reference_solutions.into()),
            ("created_at", now.into()),
            ("updated_at", now.into()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProblemUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub tags: Option<ListUpdate>,
    pub user_id: Option<String>,
    pub examples: Option<serde_json::Value>,
    pub constraints: Option<String>,
    pub hints: Option<Option<String>>,
    pub editorial: Option<Option<String>>,
    pub test_cases: Option<serde_json::Value>,
    pub code_snippets: Option<serde_json::Value>,
    pub reference_solutions: Option<serde_json::Value>,
}

impl Changes for ProblemUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .set("title", self.title)
            .set("description", self.description)
            .set("difficulty", self.difficulty)
            .list("tags", self.tags)
            .set("user_id", self.user_id)
            .set("examples", self.examples)
            .set("constraints", self.constraints)
            .set("hints", self.hints)
            .set("editorial", self.editorial)
            .set("test_cases", self.test_cases)
            .set("code_snippets", self.code_snippets)
            .set("reference_solutions", self.reference_solutions)
            .build()
    }
}

impl Entity for Problem {
    type Key = String;
    type Create = NewProblem;
    type Update = ProblemUpdate;

    const KIND: EntityKind = EntityKind::Problem;

    fn id(&self) -> &str {
        &self.id
    }

    fn reference(&self, field: &str) -> Option<&str> {
        match field {
            "id" => Some(&self.id),
            "user_id" => Some(&self.user_id),
            _ => None,
        }
    }

    fn into_any(self) -> AnyModel {
        AnyModel::Problem(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::Problem(problem) => Some(problem),
            _ => None,
        }
    }
}
