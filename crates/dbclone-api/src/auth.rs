//! Superuser authentication extractor.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::{debug, warn};

use dbclone_core::Session;

use crate::{ApiError, AppState};

/// Bearer token from the `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor that requires a session with the superuser role.
///
/// Rejects with 401 when the token is missing or unknown and 403 when the
/// session lacks the role. Runs before any other extractor that touches
/// the request.
#[derive(Debug, Clone)]
pub struct Superuser {
    pub session: Session,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Superuser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

        let session = match state.sessions.get_session(token).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return Err(ApiError::Unauthorized(
                    "Invalid or expired session".to_string(),
                ))
            }
            Err(e) => {
                warn!(subsystem = "api", component = "auth", error = %e, "Session lookup failed");
                return Err(ApiError::Internal(
                    "Session could not be verified".to_string(),
                ));
            }
        };

        if !session.is_superuser() {
            debug!(
                subsystem = "api",
                component = "auth",
                role = %session.user.role,
                "Rejected non-superuser"
            );
            return Err(ApiError::Forbidden("Superuser role required".to_string()));
        }

        Ok(Superuser { session })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
