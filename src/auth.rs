use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use serde_json::{json, Value};

use crate::{errors::AppError, AppState};

/// Decides whether an HTTP client may open a session, and what the session knows about it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Value, AppError>;
}

/// The value an [`Authenticator`] produced for the current request.
#[derive(Debug, Clone)]
pub struct AuthContext(pub Value);

pub struct BearerTokenAuthenticator {
    token: Arc<str>,
}

impl BearerTokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
        }
    }
}

#[async_trait]
impl Authenticator for BearerTokenAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Value, AppError> {
        let Some(auth) = headers.typed_get::<Authorization<Bearer>>() else {
            return Err(AppError::unauthorized(
                "missing_token",
                "missing authorization header",
            ));
        };

        if auth.token() != self.token.as_ref() {
            return Err(AppError::unauthorized(
                "invalid_token",
                "invalid bearer token",
            ));
        }

        Ok(json!({ "scheme": "bearer" }))
    }
}

pub async fn require_authentication(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(authenticator) = state.authenticator.as_ref() {
        let auth = authenticator.authenticate(request.headers()).await?;
        request.extensions_mut().insert(AuthContext(auth));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::http::{header, HeaderValue};

    use super::*;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[tokio::test]
    async fn bearer_token_must_match() {
        let authenticator = BearerTokenAuthenticator::new("s3cret-token");

        let auth = authenticator
            .authenticate(&headers_with("Bearer s3cret-token"))
            .await
            .expect("valid token");
        assert_eq!(auth["scheme"], "bearer");

        let err = authenticator
            .authenticate(&headers_with("Bearer other"))
            .await
            .expect_err("wrong token");
        assert!(matches!(
            err,
            AppError::Unauthorized {
                code: "invalid_token",
                ..
            }
        ));

        let err = authenticator
            .authenticate(&HeaderMap::new())
            .await
            .expect_err("missing header");
        assert!(matches!(
            err,
            AppError::Unauthorized {
                code: "missing_token",
                ..
            }
        ));
    }
}
