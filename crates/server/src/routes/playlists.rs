use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use codejudge_store::{
    models::{NewPlaylist, NewProblemInPlaylist, Playlist, PlaylistKey},
    BatchCount, Database, Filter, FindArgs, Include, Loaded, OrderBy,
};
use serde::Deserialize;

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_playlists).post(create_playlist))
        .route("/:id", get(get_playlist).delete(delete_playlist))
        .route(
            "/:id/problems",
            axum::routing::post(add_problems).delete(remove_problems),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreatePlaylistRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProblemIdsRequest {
    pub problem_ids: Vec<String>,
}

fn with_problems() -> Vec<Include> {
    vec![Include::new("problems")
        .order_by(OrderBy::asc("created_at"))
        .include(Include::new("problem"))]
}

// Helper to load a playlist owned by the user
async fn owned_playlist(db: &Database, id: &str, user_id: &str) -> Result<Playlist> {
    db.playlists()
        .find_first(FindArgs::new().filter(Filter::all([
            Filter::field("id").equals(id),
            Filter::field("user_id").equals(user_id),
        ])))
        .await?
        .ok_or_else(|| AppError::NotFound("Playlist not found".to_string()))
}

async fn list_playlists(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Loaded<Playlist>>>> {
    let playlists = state
        .db
        .playlists()
        .find_many_including(
            FindArgs::new()
                .filter(Filter::field("user_id").equals(user.id))
                .order_by(OrderBy::asc("name")),
            with_problems(),
        )
        .await?;
    Ok(Json(playlists))
}

async fn create_playlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreatePlaylistRequest>,
) -> Result<Json<Playlist>> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Playlist name is required".to_string()));
    }
    let playlist = state
        .db
        .playlists()
        .create(NewPlaylist {
            id: None,
            name: body.name,
            description: body.description,
            user_id: user.id,
        })
        .await
        .map_err(|err| match err {
            codejudge_store::Error::UniqueViolation { .. } => {
                AppError::Conflict("A playlist with this name already exists".to_string())
            }
            other => other.into(),
        })?;
    Ok(Json(playlist))
}

async fn get_playlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Loaded<Playlist>>> {
    let playlist = state
        .db
        .playlists()
        .find_first_including(
            FindArgs::new().filter(Filter::all([
                Filter::field("id").equals(id),
                Filter::field("user_id").equals(user.id),
            ])),
            with_problems(),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Playlist not found".to_string()))?;
    Ok(Json(playlist))
}

async fn delete_playlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    let playlist = owned_playlist(&state.db, &id, &user.id).await?;
    state.db.playlists().delete(PlaylistKey::Id(playlist.id)).await?;
    Ok(Json(()))
}

/// Problems already in the playlist are skipped and not counted.
async fn add_problems(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<ProblemIdsRequest>,
) -> Result<Json<BatchCount>> {
    let playlist = owned_playlist(&state.db, &id, &user.id).await?;
    let entries = body
        .problem_ids
        .into_iter()
        .map(|problem_id| NewProblemInPlaylist {
            id: None,
            playlist_id: playlist.id.clone(),
            problem_id,
        })
        .collect();
    let added = state
        .db
        .problems_in_playlist()
        .create_many(entries, true)
        .await?;
    Ok(Json(added))
}

async fn remove_problems(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<ProblemIdsRequest>,
) -> Result<Json<BatchCount>> {
    let playlist = owned_playlist(&state.db, &id, &user.id).await?;
    let removed = state
        .db
        .problems_in_playlist()
        .delete_many(Filter::all([
            Filter::field("playlist_id").equals(playlist.id),
            Filter::field("problem_id").is_in(body.problem_ids),
        ]))
        .await?;
    Ok(Json(removed))
}
