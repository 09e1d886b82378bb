//! Bearer credential extraction for the two auth schemes sharing the
//! `Authorization` header: user JWTs and opaque work package access tokens.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::repository::AuthContext;

use super::AppState;

/// Claims of an inbound user bearer token.
#[derive(Debug, Clone, serde::Deserialize)]
struct AuthClaims {
    id: String,
    name: String,
    email: String,
    #[serde(default)]
    title: Option<String>,
}

/// Rejection for requests without usable credentials.
///
/// A missing credential is a 403, a present but unverifiable one a 401.
#[derive(Debug)]
pub struct AuthRejection {
    status: StatusCode,
    detail: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthRejection> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or(AuthRejection {
            status: StatusCode::FORBIDDEN,
            detail: "Not authenticated",
        })
}

/// Requires a verified user bearer token and yields the user's identity.
pub struct UserContext(pub AuthContext);

impl FromRequestParts<AppState> for UserContext {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims: AuthClaims = state.auth_key.decode(token).map_err(|_| AuthRejection {
            status: StatusCode::UNAUTHORIZED,
            detail: "Invalid authentication credentials",
        })?;
        Ok(UserContext(AuthContext {
            id: claims.id,
            name: claims.name,
            email: claims.email,
            title: claims.title,
        }))
    }
}

/// Requires a work package access token and yields the raw credential.
///
/// The token is opaque here; the repository compares its hash against the
/// stored one.
pub struct WorkPackageAccessToken(pub String);

impl FromRequestParts<AppState> for WorkPackageAccessToken {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(WorkPackageAccessToken(bearer_token(parts)?.to_string()))
    }
}
