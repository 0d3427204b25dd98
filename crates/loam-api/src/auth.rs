//! Shared-secret bearer authentication.

use axum::http::HeaderMap;

use crate::config::AppConfig;
use crate::error::AppError;

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

/// Compare a presented token with the configured secret
pub fn authorize(config: &AppConfig, token: &str) -> Result<(), AppError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("API token is missing"));
    }
    if token != config.api_token {
        return Err(AppError::unauthorized("API token is not valid"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            api_token: "secret".to_string(),
        }
    }

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("bearer  secret "));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "secret");
    }

    #[test]
    fn malformed_headers_are_unauthorized() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn only_configured_token_is_authorized() {
        assert!(authorize(&config(), "secret").is_ok());
        assert!(authorize(&config(), "other").is_err());
        assert!(authorize(&config(), "  ").is_err());
    }
}
