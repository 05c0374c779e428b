use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use codejudge_store::{
    models::{NewTokenBlacklist, NewUser, User, UserKey},
    Error as StoreError,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    middleware::auth::{auth_middleware, AuthUser},
    AppState,
};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_middleware))
        .route("/register", post(register))
        .route("/login", post(login))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub exp: usize,
    /// Unique per token so that a fresh login never reproduces a revoked one.
    pub jti: String,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn create_token(user: &User, secret: &str, ttl_hours: i64) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(ttl_hours))
        .ok_or_else(|| AppError::Internal("Token lifetime out of range".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        exp: expiration,
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>> {
    // Validate input
    if body.email.is_empty() || !body.email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let password = hash_password(&body.password)?;
    let created = state
        .db
        .users()
        .create(NewUser {
            email: body.email,
            name: body.name.filter(|name| !name.trim().is_empty()),
            password,
            ..Default::default()
        })
        .await;
    let user = match created {
        Ok(user) => user,
        Err(StoreError::UniqueViolation { .. }) => {
            return Err(AppError::Conflict("Email already registered".to_string()))
        }
        Err(err) => return Err(err.into()),
    };
    tracing::info!(user = %user.id, "registered user");

    let token = create_token(&user, &state.config.jwt_secret, state.config.token_ttl_hours)?;
    Ok(Json(AuthResponse { token, user }))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = state
        .db
        .users()
        .find_unique(UserKey::Email(body.email))
        .await?
        .ok_or(AppError::Unauthorized)?;

    // Verify password
    if !verify_password(&body.password, &user.password)? {
        return Err(AppError::Unauthorized);
    }

    let token = create_token(&user, &state.config.jwt_secret, state.config.token_ttl_hours)?;
    Ok(Json(AuthResponse { token, user }))
}

/// Revokes the presented token until it would have expired anyway.
async fn logout(State(state): State<AppState>, user: AuthUser) -> Result<Json<()>> {
    state
        .db
        .token_blacklist()
        .create(NewTokenBlacklist {
            id: None,
            token: user.token,
            expires_at: user.expires_at,
        })
        .await?;
    Ok(Json(()))
}

async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<User>> {
    let user = state
        .db
        .users()
        .find_unique_or_throw(UserKey::Id(user.id))
        .await?;
    Ok(Json(user))
}
