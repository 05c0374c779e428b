//! Static table metadata used to validate and compile queries.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Text,
    Int,
    Float,
    Bool,
    Timestamp,
    Enum(&'static [&'static str]),
    /// A list of strings stored as a JSON array.
    StringList,
    /// Opaque JSON document.
    Json,
}

impl FieldKind {
    pub(crate) fn is_textual(self) -> bool {
        matches!(self, FieldKind::Id | FieldKind::Text)
    }

    pub(crate) fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Int | FieldKind::Float)
    }

    pub(crate) fn is_orderable(self) -> bool {
        !matches!(self, FieldKind::StringList | FieldKind::Json)
    }

    pub(crate) fn is_document(self) -> bool {
        matches!(self, FieldKind::StringList | FieldKind::Json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl Field {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This table holds `foreign_key` pointing at the target's `id`.
    BelongsTo { foreign_key: &'static str },
    /// The target table holds `foreign_key` pointing at this table's `id`.
    HasMany { foreign_key: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub target: EntityKind,
    pub kind: RelationKind,
}

#[derive(Debug)]
pub struct Schema {
    /// Model name used in messages, e.g. `User`.
    pub model: &'static str,
    pub table: &'static str,
    pub fields: &'static [Field],
    pub relations: &'static [Relation],
    /// Column sets that are unique together, primary key excluded.
    pub unique: &'static [&'static [&'static str]],
}

impl Schema {
    pub fn field(&self, name: &str) -> Result<&'static Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| {
                Error::validation(format!("unknown field `{name}` on {}", self.model))
            })
    }

    pub fn relation(&self, name: &str) -> Result<&'static Relation> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                Error::validation(format!("unknown relation `{name}` on {}", self.model))
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// `"table"."column"`
    pub(crate) fn column(&self, field: &str) -> String {
        format!("\"{}\".\"{}\"", self.table, field)
    }

    pub(crate) fn id_column(&self) -> String {
        self.column("id")
    }
}

/// Every persisted model, used where relations need to name their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    TokenBlacklist,
    Problem,
    Submission,
    TestCaseResult,
    ProblemSolved,
    Playlist,
    ProblemInPlaylist,
    ChatHistory,
}

impl EntityKind {
    pub fn schema(self) -> &'static Schema {
        use crate::models::*;

        match self {
            EntityKind::User => &user::SCHEMA,
            EntityKind::TokenBlacklist => &token_blacklist::SCHEMA,
            EntityKind::Problem => &problem::SCHEMA,
            EntityKind::Submission => &submission::SCHEMA,
            EntityKind::TestCaseResult => &test_case_result::SCHEMA,
            EntityKind::ProblemSolved => &problem_solved::SCHEMA,
            EntityKind::Playlist => &playlist::SCHEMA,
            EntityKind::ProblemInPlaylist => &problem_in_playlist::SCHEMA,
            EntityKind::ChatHistory => &chat_history::SCHEMA,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [EntityKind; 9] = [
        EntityKind::User,
        EntityKind::TokenBlacklist,
        EntityKind::Problem,
        EntityKind::Submission,
        EntityKind::TestCaseResult,
        EntityKind::ProblemSolved,
        EntityKind::Playlist,
        EntityKind::ProblemInPlaylist,
        EntityKind::ChatHistory,
    ];

    #[test]
    fn relations_point_at_real_columns() {
        for kind in ALL {
            let schema = kind.schema();
            assert!(schema.has_field("id"), "{} has no id", schema.model);
            for relation in schema.relations {
                let target = relation.target.schema();
                match relation.kind {
                    RelationKind::BelongsTo { foreign_key } => {
                        assert!(schema.has_field(foreign_key), "{}.{}", schema.model, foreign_key)
                    }
                    RelationKind::HasMany { foreign_key } => {
                        assert!(target.has_field(foreign_key), "{}.{}", target.model, foreign_key)
                    }
                }
            }
            for columns in schema.unique {
                for column in *columns {
                    assert!(schema.has_field(column));
                }
            }
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let schema = EntityKind::User.schema();
        assert!(schema.field("email").is_ok());
        assert!(matches!(schema.field("nope"), Err(Error::Validation(_))));
        assert!(matches!(schema.relation("nope"), Err(Error::Validation(_))));
    }
}
