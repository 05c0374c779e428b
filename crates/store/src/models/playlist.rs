use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{new_id, AnyModel, Assignment, AssignmentList, Changes, Entity, Insertable, UniqueKey},
    filter::Filter,
    schema::{EntityKind, Field, FieldKind, Relation, RelationKind, Schema},
    value::Value,
};

pub static SCHEMA: Schema = Schema {
    model: "Playlist",
    table: "playlists",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::required("name", FieldKind::Text),
        Field::optional("description", FieldKind::Text),
        Field::required("user_id", FieldKind::Id),
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
            name: "problems",
            target: EntityKind::ProblemInPlaylist,
            kind: RelationKind::HasMany {
                foreign_key: "playlist_id",
            },
        },
    ],
    unique: &[&["name", "user_id"]],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistKey {
    Id(String),
    NameUser { name: String, user_id: String },
}

impl UniqueKey for PlaylistKey {
    fn into_filter(self) -> Filter {
        match self {
            PlaylistKey::Id(id) => Filter::field("id").equals(id),
            PlaylistKey::NameUser { name, user_id } => Filter::all([
                Filter::field("name").equals(name),
                Filter::field("user_id").equals(user_id),
            ]),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewPlaylist {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub user_id: String,
}

impl Insertable for NewPlaylist {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        vec![
            ("id", new_id(self.id)),
            ("name", self.name.into()),
            ("description", self.description.into()),
            ("user_id", self.user_id.into()),
            ("created_at", now.into()),
            ("updated_at", now.into()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlaylistUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub user_id: Option<String>,
}

impl Changes for PlaylistUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .set("name", self.name)
            .set("description", self.description)
            .set("user_id", self.user_id)
            .build()
    }
}

impl Entity for Playlist {
    type Key = PlaylistKey;
    type Create = NewPlaylist;
    type Update = PlaylistUpdate;

    const KIND: EntityKind = EntityKind::Playlist;

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
        AnyModel::Playlist(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::Playlist(playlist) => Some(playlist),
            _ => None,
        }
    }
}
