use std::net::SocketAddr;

use axum::{middleware as axum_middleware, routing::get, Router};
use codejudge_store::Database;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod middleware;
mod routes;
mod services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "codejudge_server=debug,codejudge_store=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env();

    // Initialize database
    let db = Database::connect(&config.store).await?;
    db.run_migrations().await?;

    services::blacklist::spawn_purge(db.clone(), config.blacklist_purge_interval);

    let state = AppState {
        db,
        config: config.clone(),
    };
    let app = build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    // Build protected routes (require authentication)
    let protected_routes = Router::new()
        .nest("/problems", routes::problems::router())
        .nest("/submissions", routes::submissions::router())
        .nest("/playlists", routes::playlists::router())
        .nest("/chat", routes::chat::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Build API router
    let api_router = Router::new()
        .nest("/auth", routes::auth::router(state.clone()))
        .merge(protected_routes);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: config::Config,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use codejudge_store::{
        models::{UserKey, UserRole, UserUpdate},
        StoreConfig,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    async fn test_app() -> (Router, AppState) {
        let config = config::Config {
            port: 0,
            jwt_secret: "test-secret".to_string(),
            token_ttl_hours: 1,
            blacklist_purge_interval: Duration::from_secs(3600),
            store: StoreConfig::new("sqlite::memory:"),
        };
        let db = Database::connect(&config.store).await.unwrap();
        db.run_migrations().await.unwrap();
        let state = AppState { db, config };
        (build_router(state.clone()), state)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn register(app: &Router, email: &str) -> (String, String) {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": email, "name": "Ada", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn admin(app: &Router, state: &AppState, email: &str) -> String {
        let (token, id) = register(app, email).await;
        state
            .db
            .users()
            .update(
                UserKey::Id(id),
                UserUpdate {
                    role: Some(UserRole::Admin),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        token
    }

    async fn create_problem(app: &Router, token: &str, title: &str, difficulty: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/problems",
            Some(token),
            Some(json!({
                "title": title,
                "description": "Add two numbers",
                "difficulty": difficulty,
                "tags": ["math"],
                "test_cases": [{ "input": "1 2", "output": "3" }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_check_responds() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn auth_flow_and_logout_revokes_token() {
        let (app, _) = test_app().await;
        let (token, id) = register(&app, "ada@example.com").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "ada@example.com", "password": "another one" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["role"], "USER");
        assert!(body.get("password").is_none());

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "wrong password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, Method::POST, "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let fresh = body["token"].as_str().unwrap();
        let (status, _) = call(&app, Method::GET, "/api/auth/me", Some(fresh), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let (app, _) = test_app().await;
        let (status, _) = call(&app, Method::GET, "/api/problems", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, Method::GET, "/api/problems", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn only_admins_manage_problems() {
        let (app, state) = test_app().await;
        let (user_token, _) = register(&app, "user@example.com").await;
        let admin_token = admin(&app, &state, "admin@example.com").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/problems",
            Some(&user_token),
            Some(json!({
                "title": "Two Sum",
                "description": "",
                "difficulty": "EASY",
                "test_cases": [],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let two_sum = create_problem(&app, &admin_token, "Two Sum", "EASY").await;
        create_problem(&app, &admin_token, "Max Flow", "HARD").await;
        create_problem(&app, &admin_token, "Three Sum", "EASY").await;

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/problems?difficulty=EASY&search=sum",
            Some(&user_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let titles: Vec<&str> = body["problems"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, ["Two Sum", "Three Sum"]);

        let (_, stats) = call(
            &app,
            Method::GET,
            "/api/problems/stats",
            Some(&user_token),
            None,
        )
        .await;
        assert_eq!(
            stats,
            json!({ "total": 3, "by_difficulty": { "EASY": 2, "HARD": 1 } })
        );

        let (status, body) = call(
            &app,
            Method::PATCH,
            &format!("/api/problems/{two_sum}"),
            Some(&admin_token),
            Some(json!({ "add_tags": ["hash-map"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tags"], json!(["math", "hash-map"]));

        let uri = format!("/api/problems/{two_sum}");
        let (status, _) = call(&app, Method::DELETE, &uri, Some(&user_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, Method::DELETE, &uri, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, &uri, Some(&user_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn passing_submission_marks_problem_solved() {
        let (app, state) = test_app().await;
        let admin_token = admin(&app, &state, "admin@example.com").await;
        let problem = create_problem(&app, &admin_token, "Two Sum", "EASY").await;
        let (token, _) = register(&app, "solver@example.com").await;

        let submit = |passed: [bool; 3]| {
            json!({
                "problem_id": problem,
                "source_code": { "RUST": "fn main() {}" },
                "language": "RUST",
                "status": if passed.iter().all(|p| *p) { "Accepted" } else { "Wrong Answer" },
                "test_cases": passed.iter().map(|p| json!({
                    "passed": p,
                    "expected": "3",
                    "stdout": "3",
                    "status": "Accepted",
                })).collect::<Vec<_>>(),
            })
        };

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/submissions",
            Some(&token),
            Some(submit([true, false, true])),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["solved"], false);
        let (_, solved) = call(&app, Method::GET, "/api/problems/solved", Some(&token), None).await;
        assert_eq!(solved["problems"], json!([]));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/submissions",
            Some(&token),
            Some(submit([true, true, true])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["solved"], true);
        let submission = body["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/submissions/{submission}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let cases: Vec<i64> = body["test_case_results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["test_case"].as_i64().unwrap())
            .collect();
        assert_eq!(cases, [0, 1, 2]);

        let (_, solved) = call(&app, Method::GET, "/api/problems/solved", Some(&token), None).await;
        assert_eq!(solved["problems"][0]["id"], problem.as_str());

        let (_, count) = call(
            &app,
            Method::GET,
            &format!("/api/submissions/problem/{problem}/count"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(count, json!({ "count": 2 }));

        // Other users cannot read it.
        let (other, _) = register(&app, "other@example.com").await;
        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/submissions/{submission}"),
            Some(&other),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn playlists_skip_duplicate_problems() {
        let (app, state) = test_app().await;
        let admin_token = admin(&app, &state, "admin@example.com").await;
        let first = create_problem(&app, &admin_token, "Two Sum", "EASY").await;
        let second = create_problem(&app, &admin_token, "Max Flow", "HARD").await;
        let (token, _) = register(&app, "ada@example.com").await;

        let (status, playlist) = call(
            &app,
            Method::POST,
            "/api/playlists",
            Some(&token),
            Some(json!({ "name": "Daily" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/playlists",
            Some(&token),
            Some(json!({ "name": "Daily" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/api/playlists/{}/problems", playlist["id"].as_str().unwrap());
        let (_, added) = call(
            &app,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({ "problem_ids": [first] })),
        )
        .await;
        assert_eq!(added, json!({ "count": 1 }));
        let (_, added) = call(
            &app,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({ "problem_ids": [first, second] })),
        )
        .await;
        assert_eq!(added, json!({ "count": 1 }));

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/playlists/{}", playlist["id"].as_str().unwrap()),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let titles: Vec<&str> = body["problems"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["problem"]["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, ["Two Sum", "Max Flow"]);

        let (_, removed) = call(
            &app,
            Method::DELETE,
            &uri,
            Some(&token),
            Some(json!({ "problem_ids": [first] })),
        )
        .await;
        assert_eq!(removed, json!({ "count": 1 }));
    }

    #[tokio::test]
    async fn chat_history_is_per_user_and_problem() {
        let (app, state) = test_app().await;
        let admin_token = admin(&app, &state, "admin@example.com").await;
        let problem = create_problem(&app, &admin_token, "Two Sum", "EASY").await;
        let (token, _) = register(&app, "ada@example.com").await;
        let uri = format!("/api/chat/{problem}");

        let (status, entry) = call(
            &app,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({ "message": "hint?", "response": "try a hash map" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(entry["message_type"], "general");

        let (_, mine) = call(&app, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(mine.as_array().map(Vec::len), Some(1));
        let (_, theirs) = call(&app, Method::GET, &uri, Some(&admin_token), None).await;
        assert_eq!(theirs, json!([]));

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/chat/missing",
            Some(&token),
            Some(json!({ "message": "hint?", "response": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
