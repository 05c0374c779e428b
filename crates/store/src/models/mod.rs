//! Record types, their inputs and table metadata.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{schema::FieldKind, value::Value};

pub mod chat_history;
pub mod playlist;
pub mod problem;
pub mod problem_in_playlist;
pub mod problem_solved;
pub mod submission;
pub mod test_case_result;
pub mod token_blacklist;
pub mod user;

pub use chat_history::{ChatHistory, ChatHistoryUpdate, NewChatHistory};
pub use playlist::{NewPlaylist, Playlist, PlaylistKey, PlaylistUpdate};
pub use problem::{NewProblem, Problem, ProblemUpdate};
pub use problem_in_playlist::{
    NewProblemInPlaylist, ProblemInPlaylist, ProblemInPlaylistKey, ProblemInPlaylistUpdate,
};
pub use problem_solved::{NewProblemSolved, ProblemSolved, ProblemSolvedKey, ProblemSolvedUpdate};
pub use submission::{NewSubmission, Submission, SubmissionUpdate};
pub use test_case_result::{NewTestCaseResult, TestCaseResult, TestCaseResultUpdate};
pub use token_blacklist::{
    NewTokenBlacklist, TokenBlacklist, TokenBlacklistKey, TokenBlacklistUpdate,
};
pub use user::{NewUser, User, UserKey, UserUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    #[default]
    User,
}

impl UserRole {
    pub const VARIANTS: &'static [&'static str] = &["ADMIN", "USER"];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::User => "USER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const VARIANTS: &'static [&'static str] = &["EASY", "MEDIUM", "HARD"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "EASY",
            Difficulty::Medium => "MEDIUM",
            Difficulty::Hard => "HARD",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("`{0}` is not a recognised value")]
pub struct ParseEnumError(String);

impl FromStr for UserRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(UserRole::Admin),
            "USER" => Ok(UserRole::User),
            _ => Err(ParseEnumError(s.to_string())),
        }
    }
}

impl FromStr for Difficulty {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EASY" => Ok(Difficulty::Easy),
            "MEDIUM" => Ok(Difficulty::Medium),
            "HARD" => Ok(Difficulty::Hard),
            _ => Err(ParseEnumError(s.to_string())),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<UserRole> for Value {
    fn from(role: UserRole) -> Self {
        Value::Text(role.as_str().to_string())
    }
}

impl From<Difficulty> for Value {
    fn from(difficulty: Difficulty) -> Self {
        Value::Text(difficulty.as_str().to_string())
    }
}

pub(crate) const ROLE: FieldKind = FieldKind::Enum(UserRole::VARIANTS);
pub(crate) const DIFFICULTY: FieldKind = FieldKind::Enum(Difficulty::VARIANTS);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("hard".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert_eq!("Admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert!("root".parse::<UserRole>().is_err());
        assert_eq!(Value::from(Difficulty::Medium), Value::Text("MEDIUM".into()));
        assert_eq!(
            serde_json::to_string(&Difficulty::Easy).unwrap(),
            "\"EASY\""
        );
    }
}
