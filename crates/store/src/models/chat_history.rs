use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{new_id, AnyModel, Assignment, AssignmentList, Changes, Entity, Insertable},
    schema::{EntityKind, Field, FieldKind, Relation, RelationKind, Schema},
    value::Value,
};

pub const DEFAULT_MESSAGE_TYPE: &str = "general";

pub static SCHEMA: Schema = Schema {
    model: "ChatHistory",
    table: "chat_history",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::required("user_id", FieldKind::Id),
        Field::required("problem_id", FieldKind::Id),
        Field::required("message", FieldKind::Text),
        Field::required("response", FieldKind::Text),
        Field::required("message_type", FieldKind::Text),
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
    unique: &[],
};

/// One exchange with the problem assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatHistory {
    pub id: String,
    pub user_id: String,
    pub problem_id: String,
    pub message: String,
    pub response: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewChatHistory {
    pub id: Option<String>,
    pub user_id: String,
    pub problem_id: String,
    pub message: String,
    pub response: String,
    /// Defaults to `general`.
    pub message_type: Option<String>,
}

impl Insertable for NewChatHistory {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        let message_type = self
            .message_type
            .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string());
        vec![
            ("id", new_id(self.id)),
            ("user_id", self.user_id.into()),
            ("problem_id", self.problem_id.into()),
            ("message", self.message.into()),
            ("response", self.response.into()),
            ("message_type", message_type.into()),
            ("created_at", now.into()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatHistoryUpdate {
    pub message: Option<String>,
    pub response: Option<String>,
    pub message_type: Option<String>,
}

impl Changes for ChatHistoryUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .set("message", self.message)
            .set("response", self.response)
            .set("message_type", self.message_type)
            .build()
    }
}

impl Entity for ChatHistory {
    type Key = String;
    type Create = NewChatHistory;
    type Update = ChatHistoryUpdate;

    const KIND: EntityKind = EntityKind::ChatHistory;

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
        AnyModel::ChatHistory(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::ChatHistory(entry) => Some(entry),
            _ => None,
        }
    }
}
