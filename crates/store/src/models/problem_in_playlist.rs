use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{new_id, AnyModel, Assignment, AssignmentList, Changes, Entity, Insertable, UniqueKey},
    filter::Filter,
    schema::{EntityKind, Field, FieldKind, Relation, RelationKind, Schema},
    value::Value,
};

pub static SCHEMA: Schema = Schema {
    model: "ProblemInPlaylist",
    table: "problems_in_playlist",
    fields: &[
        Field::required("id", FieldKind::Id),
        Field::required("playlist_id", FieldKind::Id),
        Field::required("problem_id", FieldKind::Id),
        Field::required("created_at", FieldKind::Timestamp),
    ],
    relations: &[
        Relation {
            name: "playlist",
            target: EntityKind::Playlist,
            kind: RelationKind::BelongsTo {
                foreign_key: "playlist_id",
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
    unique: &[&["playlist_id", "problem_id"]],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProblemInPlaylist {
    pub id: String,
    pub playlist_id: String,
    pub problem_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemInPlaylistKey {
    Id(String),
    PlaylistProblem {
        playlist_id: String,
        problem_id: String,
    },
}

impl UniqueKey for ProblemInPlaylistKey {
    fn into_filter(self) -> Filter {
        match self {
            ProblemInPlaylistKey::Id(id) => Filter::field("id").equals(id),
            ProblemInPlaylistKey::PlaylistProblem {
                playlist_id,
                problem_id,
            } => Filter::all([
                Filter::field("playlist_id").equals(playlist_id),
                Filter::field("problem_id").equals(problem_id),
            ]),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewProblemInPlaylist {
    pub id: Option<String>,
    pub playlist_id: String,
    pub problem_id: String,
}

impl Insertable for NewProblemInPlaylist {
    fn into_row(self, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
        vec![
            ("id", new_id(self.id)),
            ("playlist_id", self.playlist_id.into()),
            ("problem_id", self.problem_id.into()),
            ("created_at", now.into()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProblemInPlaylistUpdate {
    pub playlist_id: Option<String>,
    pub problem_id: Option<String>,
}

impl Changes for ProblemInPlaylistUpdate {
    fn into_assignments(self) -> Vec<Assignment> {
        AssignmentList::default()
            .set("playlist_id", self.playlist_id)
            .set("problem_id", self.problem_id)
            .build()
    }
}

impl Entity for ProblemInPlaylist {
    type Key = ProblemInPlaylistKey;
    type Create = NewProblemInPlaylist;
    type Update = ProblemInPlaylistUpdate;

    const KIND: EntityKind = EntityKind::ProblemInPlaylist;

    fn id(&self) -> &str {
        &self.id
    }

    fn reference(&self, field: &str) -> Option<&str> {
        match field {
            "id" => Some(&self.id),
            "playlist_id" => Some(&self.playlist_id),
            "problem_id" => Some(&self.problem_id),
            _ => None,
        }
    }

    fn into_any(self) -> AnyModel {
        AnyModel::ProblemInPlaylist(self)
    }

    fn from_any(model: &AnyModel) -> Option<&Self> {
        match model {
            AnyModel::ProblemInPlaylist(entry) => Some(entry),
            _ => None,
        }
    }
}
