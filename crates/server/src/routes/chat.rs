use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use codejudge_store::{
    models::{ChatHistory, NewChatHistory},
    Filter, FindArgs, OrderBy,
};
use serde::Deserialize;

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/:problem_id", get(list_messages).post(append_message))
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub message: String,
    pub response: String,
    pub message_type: Option<String>,
}

async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(problem_id): Path<String>,
) -> Result<Json<Vec<ChatHistory>>> {
    let messages = state
        .db
        .chat_history()
        .find_many(
            FindArgs::new()
                .filter(Filter::all([
                    Filter::field("user_id").equals(user.id),
                    Filter::field("problem_id").equals(problem_id),
                ]))
                .order_by(OrderBy::asc("created_at")),
        )
        .await?;
    Ok(Json(messages))
}

async fn append_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(problem_id): Path<String>,
    Json(body): Json<AppendMessageRequest>,
) -> Result<Json<ChatHistory>> {
    if body.message.trim().is_empty() {
        return Err(AppError::Validation("Message is required".to_string()));
    }
    state
        .db
        .problems()
        .find_unique_or_throw(problem_id.clone())
        .await?;

    let entry = state
        .db
        .chat_history()
        .create(NewChatHistory {
            id: None,
            user_id: user.id,
            problem_id,
            message: body.message,
            response: body.response,
            message_type: body.message_type,
        })
        .await?;
    Ok(Json(entry))
}
