use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{DateTime, Utc};
use codejudge_store::models::{TokenBlacklistKey, UserKey, UserRole};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::{
    error::{AppError, Result},
    routes::auth::Claims,
    AppState,
};

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub role: UserRole,
    /// The bearer token of this request, kept so logout can revoke it.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<()> {
        match self.role {
            UserRole::Admin => Ok(()),
            UserRole::User => Err(AppError::Forbidden(
                "Only admins can manage problems".to_string(),
            )),
        }
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AppError::Unauthorized)?;
    let token = bearer.token().to_string();

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized)?;

    let revoked = state
        .db
        .token_blacklist()
        .find_unique(TokenBlacklistKey::Token(token.clone()))
        .await?;
    if revoked.is_some() {
        tracing::debug!(user = %token_data.claims.sub, "rejected revoked token");
        return Err(AppError::Unauthorized);
    }

    // The account may have been removed since the token was issued.
    let user = state
        .db
        .users()
        .find_unique(UserKey::Id(token_data.claims.sub))
        .await?
        .ok_or(AppError::Unauthorized)?;

    let expires_at =
        DateTime::from_timestamp(token_data.claims.exp as i64, 0).ok_or(AppError::Unauthorized)?;

    request.extensions_mut().insert(AuthUser {
        id: user.id,
        email: user.email,
        role: user.role,
        token,
        expires_at,
    });

    Ok(next.run(request).await)
}

// Extractor for getting the authenticated user from request extensions
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
