use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use codejudge_store::{
    models::{
        NewProblemSolved, NewSubmission, NewTestCaseResult, ProblemSolvedKey, Submission,
        TestCaseResult,
    },
    Filter, FindArgs, Include, Loaded, OrderBy,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_submissions).post(create_submission))
        .route("/:id", get(get_submission))
        .route("/problem/:problem_id/count", get(count_for_problem))
}

#[derive(Debug, Deserialize)]
pub struct TestCaseRequest {
    pub passed: bool,
    pub stdout: Option<String>,
    pub expected: String,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub status: String,
    pub memory: Option<String>,
    pub time: Option<String>,
}

/// A submission that has already been judged, with one entry per test case
/// in execution order.
#[derive(Debug, Deserialize)]
pub struct CreateSubmissionRequest {
    pub problem_id: String,
    pub source_code: serde_json::Value,
    pub language: String,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub status: String,
    pub memory: Option<String>,
    pub time: Option<String>,
    pub test_cases: Vec<TestCaseRequest>,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionQuery {
    pub problem_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    #[serde(flatten)]
    pub submission: Submission,
    pub test_cases: Vec<TestCaseResult>,
    pub solved: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmissionListResponse {
    pub submissions: Vec<Submission>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

async fn create_submission(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateSubmissionRequest>,
) -> Result<Json<SubmissionResponse>> {
    if body.language.trim().is_empty() {
        return Err(AppError::Validation("Language is required".to_string()));
    }
    if body.test_cases.is_empty() {
        return Err(AppError::Validation(
            "At least one test case result is required".to_string(),
        ));
    }
    // Fail with 404 rather than a foreign key error.
    state
        .db
        .problems()
        .find_unique_or_throw(body.problem_id.clone())
        .await?;

    let solved = body.test_cases.iter().all(|case| case.passed);
    let user_id = user.id;

    let (submission, test_cases) = state
        .db
        .transaction(move |tx| {
            Box::pin(async move {
                let submission = tx
                    .submissions()
                    .create(NewSubmission {
                        id: None,
                        user_id: user_id.clone(),
                        problem_id: body.problem_id.clone(),
                        source_code: body.source_code,
                        language: body.language,
                        stdin: body.stdin,
                        stdout: body.stdout,
                        stderr: body.stderr,
                        compile_output: body.compile_output,
                        status: body.status,
                        memory: body.memory,
                        time: body.time,
                    })
                    .await?;

                let results = body
                    .test_cases
                    .into_iter()
                    .enumerate()
                    .map(|(index, case)| NewTestCaseResult {
                        id: None,
                        submission_id: submission.id.clone(),
                        test_case: index as i32,
                        passed: case.passed,
                        stdout: case.stdout,
                        expected: case.expected,
                        stderr: case.stderr,
                        compile_output: case.compile_output,
                        status: case.status,
                        memory: case.memory,
                        time: case.time,
                    })
                    .collect();
                tx.test_case_results().create_many(results, false).await?;

                if solved {
                    tx.problems_solved()
                        .upsert(
                            ProblemSolvedKey::UserProblem {
                                user_id: user_id.clone(),
                                problem_id: body.problem_id.clone(),
                            },
                            NewProblemSolved {
                                id: None,
                                user_id,
                                problem_id: body.problem_id,
                            },
                            Default::default(),
                        )
                        .await?;
                }

                let test_cases = tx
                    .test_case_results()
                    .find_many(
                        FindArgs::new()
                            .filter(Filter::field("submission_id").equals(submission.id.clone()))
                            .order_by(OrderBy::asc("test_case")),
                    )
                    .await?;
                Ok((submission, test_cases))
            })
        })
        .await?;

    tracing::info!(
        submission = %submission.id,
        cases = test_cases.len(),
        solved,
        "recorded submission"
    );
    Ok(Json(SubmissionResponse {
        submission,
        test_cases,
        solved,
    }))
}

async fn list_submissions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SubmissionQuery>,
) -> Result<Json<SubmissionListResponse>> {
    let mut filter = Filter::field("user_id").equals(user.id);
    if let Some(problem_id) = query.problem_id {
        filter = filter.and(Filter::field("problem_id").equals(problem_id));
    }
    let submissions = state
        .db
        .submissions()
        .find_many(
            FindArgs::new()
                .filter(filter)
                .order_by(OrderBy::desc("created_at")),
        )
        .await?;
    Ok(Json(SubmissionListResponse { submissions }))
}

async fn get_submission(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Loaded<Submission>>> {
    let loaded = state
        .db
        .submissions()
        .find_first_including(
            FindArgs::new().filter(Filter::all([
                Filter::field("id").equals(id),
                Filter::field("user_id").equals(user.id),
            ])),
            vec![Include::new("test_case_results").order_by(OrderBy::asc("test_case"))],
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Submission not found".to_string()))?;
    Ok(Json(loaded))
}

async fn count_for_problem(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(problem_id): Path<String>,
) -> Result<Json<CountResponse>> {
    let count = state
        .db
        .submissions()
        .count(Some(Filter::field("problem_id").equals(problem_id)))
        .await?;
    Ok(Json(CountResponse { count }))
}
