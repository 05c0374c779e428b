use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use codejudge_store::{
    models::{Difficulty, NewProblem, Problem, ProblemUpdate},
    AggregateSelection, Direction, Filter, FindArgs, GroupByArgs, GroupOrder, ListUpdate, OrderBy,
    QueryMode, TextOp, Value,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

const MAX_PAGE: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_problems).post(create_problem))
        .route("/stats", get(problem_stats))
        .route("/solved", get(solved_problems))
        .route(
            "/:id",
            get(get_problem).patch(update_problem).delete(delete_problem),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct ProblemQuery {
    pub difficulty: Option<Difficulty>,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub take: Option<i64>,
    pub skip: Option<u64>,
}

impl ProblemQuery {
    fn into_find_args(self) -> FindArgs<String> {
        let mut filters = Vec::new();
        if let Some(difficulty) = self.difficulty {
            filters.push(Filter::field("difficulty").equals(difficulty));
        }
        if let Some(tag) = self.tag {
            filters.push(Filter::field("tags").has(tag));
        }
        if let Some(search) = self.search.filter(|s| !s.trim().is_empty()) {
            filters.push(Filter::field("title").text(
                TextOp::Contains,
                search,
                QueryMode::Insensitive,
            ));
        }
        let mut args = FindArgs::new()
            .filter(Filter::all(filters))
            .order_by(OrderBy::asc("created_at"))
            .take(self.take.unwrap_or(MAX_PAGE).clamp(1, MAX_PAGE));
        if let Some(skip) = self.skip {
            args = args.skip(skip);
        }
        args
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProblemRequest {
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub examples: serde_json::Value,
    #[serde(default)]
    pub constraints: String,
    pub hints: Option<String>,
    pub editorial: Option<String>,
    pub test_cases: serde_json::Value,
    #[serde(default)]
    pub code_snippets: serde_json::Value,
    #[serde(default)]
    pub reference_solutions: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProblemRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub tags: Option<Vec<String>>,
    /// Appended to the existing tags.
    pub add_tags: Option<Vec<String>>,
    pub examples: Option<serde_json::Value>,
    pub constraints: Option<String>,
    pub hints: Option<String>,
    pub editorial: Option<String>,
    pub test_cases: Option<serde_json::Value>,
    pub code_snippets: Option<serde_json::Value>,
    pub reference_solutions: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ProblemListResponse {
    pub problems: Vec<Problem>,
}

#[derive(Debug, Serialize)]
pub struct ProblemStatsResponse {
    pub total: u64,
    pub by_difficulty: BTreeMap<String, u64>,
}

async fn list_problems(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ProblemQuery>,
) -> Result<Json<ProblemListResponse>> {
    let problems = state.db.problems().find_many(query.into_find_args()).await?;
    Ok(Json(ProblemListResponse { problems }))
}

async fn get_problem(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Problem>> {
    let problem = state.db.problems().find_unique_or_throw(id).await?;
    Ok(Json(problem))
}

async fn problem_stats(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<ProblemStatsResponse>> {
    let groups = state
        .db
        .problems()
        .group_by(
            GroupByArgs::by(["difficulty"])
                .select(AggregateSelection::new().count_all())
                .order_by(GroupOrder::CountAll(Direction::Desc)),
        )
        .await?;

    let mut by_difficulty = BTreeMap::new();
    for group in groups {
        if let (Some(Value::Text(difficulty)), Some(count)) =
            (group.get("difficulty"), group.aggregates.count_all)
        {
            by_difficulty.insert(difficulty.clone(), count);
        }
    }
    Ok(Json(ProblemStatsResponse {
        total: by_difficulty.values().sum(),
        by_difficulty,
    }))
}

async fn solved_problems(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProblemListResponse>> {
    let problems = state
        .db
        .problems()
        .find_many(
            FindArgs::new()
                .filter(
                    Filter::relation("solved_by").some(Filter::field("user_id").equals(user.id)),
                )
                .order_by(OrderBy::asc("title")),
        )
        .await?;
    Ok(Json(ProblemListResponse { problems }))
}

async fn create_problem(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateProblemRequest>,
) -> Result<Json<Problem>> {
    user.require_admin()?;
    if body.title.trim().is_empty() {
        return Err(AppError::Validation("Problem title is required".to_string()));
    }
    if !body.test_cases.is_array() {
        return Err(AppError::Validation(
            "Test cases must be a list".to_string(),
        ));
    }

    let problem = state
        .db
        .problems()
        .create(NewProblem {
            tags: body.tags,
            description: body.description,
            examples: object_or_empty(body.examples),
            constraints: body.constraints,
            hints: body.hints,
            editorial: body.editorial,
            test_cases: body.test_cases,
            code_snippets: object_or_empty(body.code_snippets),
            reference_solutions: object_or_empty(body.reference_solutions),
            ..NewProblem::new(user.id, body.title, body.difficulty)
        })
        .await?;
    tracing::info!(problem = %problem.id, "created problem");
    Ok(Json(problem))
}

fn object_or_empty(value: serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        serde_json::json!({})
    } else {
        value
    }
}

async fn update_problem(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateProblemRequest>,
) -> Result<Json<Problem>> {
    user.require_admin()?;

    let tags = match (body.tags, body.add_tags) {
        (Some(_), Some(_)) => {
            return Err(AppError::Validation(
                "Use either tags or add_tags, not both".to_string(),
            ))
        }
        (Some(tags), None) => Some(ListUpdate::Set(tags)),
        (None, Some(tags)) => Some(ListUpdate::Push(tags)),
        (None, None) => None,
    };

    let problem = state
        .db
        .problems()
        .update(
            id,
            ProblemUpdate {
                title: body.title,
                description: body.description,
                difficulty: body.difficulty,
                tags,
                examples: body.examples,
                constraints: body.constraints,
                hints: body.hints.map(Some),
                editorial: body.editorial.map(Some),
                test_cases: body.test_cases,
                code_snippets: body.code_snippets,
                reference_solutions: body.reference_solutions,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(problem))
}

async fn delete_problem(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    user.require_admin()?;
    // Submissions, playlist entries and chat history go with it.
    state.db.problems().delete(id).await?;
    Ok(Json(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_bounded() {
        let args = ProblemQuery {
            take: Some(10_000),
            ..Default::default()
        }
        .into_find_args();
        assert_eq!(args.take, Some(MAX_PAGE));

        let args = ProblemQuery {
            take: Some(-5),
            skip: Some(20),
            ..Default::default()
        }
        .into_find_args();
        assert_eq!(args.take, Some(1));
        assert_eq!(args.skip, Some(20));
    }
}
