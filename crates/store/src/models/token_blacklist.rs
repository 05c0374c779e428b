use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{new_id, AnyModel, Assignment, AssignmentList, Changes, Entity, Insertable, UniqueKey},
    filter::Filter,
    schema::{EntityKind, Field, FieldKind, Schema},
    value::Value,
};

pub static SCHEMA: Schema = Schema {
    model: "TokenBlacklist",
    table: "token_blacklist",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::required("token", FieldKind::Text),
        Field::required("expires_at", FieldKind::Timestamp),
        Field::required("created_at", FieldKind::Timestamp),
    ],
    relations: &[],
    unique: &[&["token"]],
};

/// A revoked auth token, kept until it would have expired anyway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TokenBlacklist {
    pub id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenBlacklistKey {
    Id(String),
    Token(String),
}

impl UniqueKey for TokenBlacklistKey {
    fn into_filter(self) -> Filter {
        match self {
            TokenBlacklistKey::Id(id) => Filter::field("id").equals(id),
            TokenBlacklistKey::Token(token) => Filter::field("token").equals(token),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTokenBlacklist {
    pub id: Option<String>,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Insertable for NewTokenBlacklist {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        vec![
            ("id", new_id(self.id)),
            ("token", self.token.into()),
            ("expires_at", self.expires_at.into()),
            ("created_at", now.into()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenBlacklistUpdate {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Changes for TokenBlacklistUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .set("token", self.token)
            .set("expires_at", self.expires_at)
            .build()
    }
}

impl Entity for TokenBlacklist {
    type Key = TokenBlacklistKey;
    type Create = NewTokenBlacklist;
    type Update = TokenBlacklistUpdate;

    const KIND: EntityKind = EntityKind::TokenBlacklist;

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
        AnyModel::TokenBlacklist(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::TokenBlacklist(token) => Some(token),
            _ => None,
        }
    }
}
