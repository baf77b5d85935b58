//! # CORS
//!
//! Storefront origins are echoed back (with credentials); anything else
//! gets the wildcard. Pre-flight requests are answered here and never
//! reach a handler.

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "authorization, content-type, x-client-info, apikey, x-verify";
const MAX_AGE_SECS: &str = "86400";

pub async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|origin| is_storefront_origin(origin, &state.config.storefront_domain))
        .and_then(|origin| HeaderValue::from_str(origin).ok());

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    apply_headers(response.headers_mut(), origin);
    response
}

fn apply_headers(headers: &mut HeaderMap, origin: Option<HeaderValue>) {
    match origin {
        Some(origin) => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        None => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE_SECS));
    headers.append(header::VARY, HeaderValue::from_static("origin"));
}

/// `origin` is the storefront domain itself or one of its subdomains
fn is_storefront_origin(origin: &str, domain: &str) -> bool {
    let Some(host) = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
    else {
        return false;
    };
    let host = host.split(':').next().unwrap_or(host);
    host == domain || host.ends_with(&format!(".{}", domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storefront_origins() {
        let domain = "vedahaircare.in";
        assert!(is_storefront_origin("https://vedahaircare.in", domain));
        assert!(is_storefront_origin("https://www.vedahaircare.in", domain));
        assert!(is_storefront_origin("http://localhost.vedahaircare.in:5173", domain));

        assert!(!is_storefront_origin("https://evilvedahaircare.in", domain));
        assert!(!is_storefront_origin("https://vedahaircare.in.example.com", domain));
        assert!(!is_storefront_origin("vedahaircare.in", domain));
    }

    #[test]
    fn test_wildcard_without_credentials() {
        let mut headers = HeaderMap::new();
        apply_headers(&mut headers, None);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }
}
