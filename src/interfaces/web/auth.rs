//! Caller identity. Authentication happens upstream (gateway); this layer
//! only reads the identity headers the gateway injects and refuses requests
//! that arrive without them.

use axum::http::HeaderMap;

use super::error::ApiError;

pub const USER_HEADER: &str = "x-openship-user";
pub const ORG_HEADER: &str = "x-openship-org";

pub fn caller_user(headers: &HeaderMap) -> Result<String, ApiError> {
    header_value(headers, USER_HEADER)
        .ok_or_else(|| ApiError::Forbidden(format!("missing {USER_HEADER} header")))
}

pub fn caller_org(headers: &HeaderMap) -> Result<String, ApiError> {
    header_value(headers, ORG_HEADER)
        .ok_or_else(|| ApiError::Forbidden(format!("missing {ORG_HEADER} header")))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn identity_headers_are_required_and_trimmed() {
        let mut headers = HeaderMap::new();
        assert!(caller_user(&headers).is_err());

        headers.insert(USER_HEADER, HeaderValue::from_static("  alice  "));
        assert_eq!(caller_user(&headers).unwrap(), "alice");

        headers.insert(ORG_HEADER, HeaderValue::from_static(""));
        assert!(caller_org(&headers).is_err());
    }
}
