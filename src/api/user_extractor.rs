use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};

use crate::api::handlers::ErrorResponse;
use crate::model::Caller;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_LEVEL_HEADER: &str = "x-user-level";

/// Axum extractor for the authenticated caller.
///
/// Identity is issued upstream and forwarded in two headers:
/// - X-User-Id: numeric user id
/// - X-User-Level: privilege level, 0 being super
///
/// A missing or unparsable header rejects the request with 401.
#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers).ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "missing or invalid X-User-Id / X-User-Level headers",
                )),
            )
        })
    }
}

fn caller_from_headers(headers: &HeaderMap) -> Option<Caller> {
    let user_id = extract_header_value(headers, USER_ID_HEADER)?.parse().ok()?;
    let level = extract_header_value(headers, USER_LEVEL_HEADER)?.parse().ok()?;
    Some(Caller::new(user_id, level))
}

/// Extract header value as trimmed string
fn extract_header_value<'a>(headers: &'a HeaderMap, header_name: &str) -> Option<&'a str> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    #[test]
    fn test_caller_extraction() {
        let caller = caller_from_headers(&headers(&[
            (USER_ID_HEADER, "42"),
            (USER_LEVEL_HEADER, " 0 "),
        ]));
        assert_eq!(caller, Some(Caller::new(42, 0)));
        assert!(caller.unwrap().is_super());
    }

    #[test]
    fn test_missing_or_malformed_headers() {
        assert_eq!(caller_from_headers(&headers(&[(USER_ID_HEADER, "42")])), None);
        assert_eq!(
            caller_from_headers(&headers(&[
                (USER_ID_HEADER, "alice"),
                (USER_LEVEL_HEADER, "1"),
            ])),
            None
        );
    }
}
