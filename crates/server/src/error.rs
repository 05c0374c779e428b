use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database is busy, try again")]
    Busy,

    #[error("{0}")]
    Internal(String),
}

impl From<codejudge_store::Error> for AppError {
    fn from(err: codejudge_store::Error) -> Self {
        use codejudge_store::Error;

        match err {
            Error::NotFound { model } => AppError::NotFound(format!("{model} not found")),
            Error::UniqueViolation { target } => AppError::Conflict(format!(
                "A record with this {} already exists",
                field_names(&target)
            )),
            Error::ForeignKeyViolation => {
                AppError::Validation("Referenced record does not exist".to_string())
            }
            Error::OutOfRange { target } => {
                AppError::Validation(format!("{} is out of range", field_names(&target)))
            }
            Error::Validation(message) => AppError::Validation(message),
            Error::TransactionStart(_) | Error::TransactionExpired(_) => {
                tracing::warn!(error = %err, "transaction did not complete");
                AppError::Busy
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Strips table names from a constraint target such as
/// `playlists.name, playlists.user_id`.
fn field_names(target: &str) -> String {
    let fields: Vec<&str> = target
        .split(',')
        .map(|column| column.trim().rsplit('.').next().unwrap_or_default())
        .filter(|field| !field.is_empty())
        .collect();
    if fields.is_empty() {
        "value".to_string()
    } else {
        fields.join(" and ")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(message) => {
                tracing::error!("internal error: {message}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codejudge_store::Error;

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (Error::NotFound { model: "Problem" }, StatusCode::NOT_FOUND),
            (
                Error::UniqueViolation {
                    target: "users.email".into(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::ForeignKeyViolation, StatusCode::BAD_REQUEST),
            (
                Error::OutOfRange {
                    target: "test_case".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                Error::TransactionExpired(std::time::Duration::from_secs(5)),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::Initialization("gone".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn conflicts_name_fields_not_tables() {
        let err = AppError::from(Error::UniqueViolation {
            target: "users.email".into(),
        });
        assert_eq!(err.to_string(), "A record with this email already exists");

        let err = AppError::from(Error::UniqueViolation {
            target: "playlists.name, playlists.user_id".into(),
        });
        assert_eq!(err.to_string(), "A record with this name and user_id already exists");

        let err = AppError::from(Error::UniqueViolation {
            target: String::new(),
        });
        assert_eq!(err.to_string(), "A record with this value already exists");
    }
}
