use axum::http::{header, header::HeaderMap};
use subtle::ConstantTimeEq;

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

pub(super) fn is_admin_authorized(headers: &HeaderMap, expected_token: &str) -> bool {
    if expected_token.is_empty() {
        return false;
    }
    extract_bearer_token(headers)
        .map(|token| token.as_bytes().ct_eq(expected_token.as_bytes()).into())
        .unwrap_or(false)
}

pub(super) fn signature_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_bearer_token_happy_path() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn extract_bearer_token_rejects_missing_empty_or_wrong_scheme() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);

        let mut empty = HeaderMap::new();
        empty.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&empty), None);

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(extract_bearer_token(&basic), None);
    }

    #[test]
    fn admin_routes_are_closed_without_a_configured_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(!is_admin_authorized(&headers, ""));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer admin"));
        assert!(is_admin_authorized(&headers, "admin"));
        assert!(!is_admin_authorized(&headers, "other"));
        assert!(!is_admin_authorized(&headers, "admin2"));
        assert!(!is_admin_authorized(&headers, "adm"));
        assert!(!is_admin_authorized(&HeaderMap::new(), "admin"));
    }

    #[test]
    fn signature_header_is_read_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", HeaderValue::from_static("t=1,v1=ab"));
        assert_eq!(
            signature_header(&headers, "Stripe-Signature").as_deref(),
            Some("t=1,v1=ab")
        );
    }
}
