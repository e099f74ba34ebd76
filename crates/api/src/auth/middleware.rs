//! Authentication middleware

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use mcpgw_shared::{ApiKeyId, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameter carrying a key for SSE clients that cannot set headers
const API_KEY_QUERY_PARAM: &str = "api_key";

/// Authenticated caller, inserted into request extensions by [`require_api_key`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub api_key_id: ApiKeyId,
}

/// Read a credential from `Authorization: Bearer` or the `api_key` query parameter
pub fn extract_credential(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        })
        .filter(|token| !token.is_empty());

    bearer.or_else(|| {
        url::form_urlencoded::parse(query?.as_bytes())
            .find(|(name, _)| name == API_KEY_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty())
    })
}

/// Middleware that requires a valid API key
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credential = extract_credential(request.headers(), request.uri().query())
        .ok_or(ApiError::Unauthorized)?;

    let user = state.auth.authenticate(&credential).await?;
    tracing::debug!(user_id = %user.user_id, "API key authenticated");

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer mk_abc"));
        assert_eq!(extract_credential(&headers, None).as_deref(), Some("mk_abc"));
    }

    #[test]
    fn test_query_parameter_fallback() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_credential(&headers, Some("x=1&api_key=mk_q%2Bz")).as_deref(),
            Some("mk_q+z")
        );
        assert_eq!(extract_credential(&headers, Some("api_key=")), None);
        assert_eq!(extract_credential(&headers, None), None);
    }

    #[test]
    fn test_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer mk_header"));
        assert_eq!(
            extract_credential(&headers, Some("api_key=mk_query")).as_deref(),
            Some("mk_header")
        );
    }

    #[test]
    fn test_non_bearer_scheme_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_credential(&headers, None), None);
    }
}
