use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{new_id, AnyModel, Assignment, AssignmentList, Changes, Entity, Insertable, UniqueKey},
    filter::Filter,
    schema::{EntityKind, Field, FieldKind, Relation, RelationKind, Schema},
    value::Value,
};

pub static SCHEMA: Schema = Schema {
    model: "ProblemSolved",
    table: "problem_solved",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::required("user_id", FieldKind::Id),
        Field::required("problem_id", FieldKind::Id),
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
    ],
    unique: &[&["user_id", "problem_id"]],
};

/// Marks that a user has solved a problem at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProblemSolved {
    pub id: String,
    pub user_id: String,
    pub problem_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemSolvedKey {
    Id(String),
    UserProblem { user_id: String, problem_id: String },
}

impl UniqueKey for ProblemSolvedKey {
    fn into_filter(self) -> Filter {
        match self {
            ProblemSolvedKey::Id(id) => Filter::field("id").equals(id),
            ProblemSolvedKey::UserProblem {
                user_id,
                problem_id,
            } => Filter::all([
                Filter::field("user_id").equals(user_id),
                Filter::field("problem_id").equals(problem_id),
            ]),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewProblemSolved {
    pub id: Option<String>,
    pub user_id: String,
    pub problem_id: String,
}

impl Insertable for NewProblemSolved {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        vec![
            ("id", new_id(self.id)),
            ("user_id", self.user_id.into()),
            ("problem_id", self.problem_id.into()),
            ("created_at", now.into()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProblemSolvedUpdate {
    pub user_id: Option<String>,
    pub problem_id: Option<String>,
}

impl Changes for ProblemSolvedUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .set("user_id", self.user_id)
            .set("problem_id", self.problem_id)
            .build()
    }
}

impl Entity for ProblemSolved {
    type Key = ProblemSolvedKey;
    type Create = NewProblemSolved;
    type Update = ProblemSolvedUpdate;

    const KIND: EntityKind = EntityKind::ProblemSolved;

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
        AnyModel::ProblemSolved(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::ProblemSolved(solved) => Some(solved),
            _ => None,
        }
    }
}
