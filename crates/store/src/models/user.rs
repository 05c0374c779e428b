use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{UserRole, ROLE};
use crate::{
    entity::{new_id, AnyModel, AssignmentList, Assignment, Changes, Entity, Insertable, UniqueKey},
    filter::Filter,
    schema::{EntityKind, Field, FieldKind, Relation, RelationKind, Schema},
    value::Value,
};

pub static SCHEMA: Schema = Schema {
    model: "User",
    table: "users",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::optional("name", FieldKind::Text),
        Field::required("email", FieldKind::Text),
        Field::optional("image", FieldKind::Text),
        Field::required("role", ROLE),
        Field::required("password", FieldKind::Text),
        Field::required("created_at", FieldKind::Timestamp),
        Field::required("updated_at", FieldKind::Timestamp),
    ],
    relations: &[
        Relation {
            name: "playlists",
            target: EntityKind::Playlist,
            kind: RelationKind::HasMany {
                foreign_key: "user_id",
            },
        },
        Relation {
            name: "problems",
            target: EntityKind::Problem,
            kind: RelationKind::HasMany {
                foreign_key: "user_id",
            },
        },
        Relation {
            name: "solved_problems",
            target: EntityKind::ProblemSolved,
            kind: RelationKind::HasMany {
                foreign_key: "user_id",
            },
        },
        Relation {
            name: "submissions",
            target: EntityKind::Submission,
            kind: RelationKind::HasMany {
                foreign_key: "user_id",
            },
        },
        Relation {
            name: "chat_history",
            target: EntityKind::ChatHistory,
            kind: RelationKind::HasMany {
                foreign_key: "user_id",
            },
        },
    ],
    unique: &[&["email"]],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: String,
    pub image: Option<String>,
    pub role: UserRole,
    /// Password hash, never serialized.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserKey {
    Id(String),
    Email(String),
}

impl UniqueKey for UserKey {
    fn into_filter(self) -> Filter {
        match self {
            UserKey::Id(id) => Filter::field("id").equals(id),
            UserKey::Email(email) => Filter::field("email").equals(email),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: String,
    pub image: Option<String>,
    pub role: Option<UserRole>,
    pub password: String,
}

impl Insertable for NewUser {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        vec![
            ("id", new_id(self.id)),
            ("name", self.name.into()),
            ("email", self.email.into()),
            ("image", self.image.into()),
            ("role", self.role.unwrap_or_default().into()),
            ("password", self.password.into()),
            ("created_at", now.into()),
            ("updated_at", now.into()),
        ]
    }
}

/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<Option<String>>,
    pub email: Option<String>,
    pub image: Option<Option<String>>,
    pub role: Option<UserRole>,
    pub password: Option<String>,
}

impl Changes for UserUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .set("name", self.name)
            .set("email", self.email)
            .set("image", self.image)
            .set("role", self.role)
            .set("password", self.password)
            .build()
    }
}

impl Entity for User {
    type Key = UserKey;
    type Create = NewUser;
    type Update = UserUpdate;

    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &str {
        &self.id
    }

    fn reference(&self, field: &str) -> Option<&str> {
        match field {
            "id" => Some(&self.id),
            _ => None,
        }
    }

    fn into_any(self) -> AnyModel {
        AnyModel::User(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::User(user) => Some(user),
            _ => None,
        }
    }
}
