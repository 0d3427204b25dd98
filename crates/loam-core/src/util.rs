//! Small string helpers shared by config and the HTTP adapters.

const ERROR_BODY_LIMIT: usize = 180;

/// Trim optional text, mapping blank values to `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Shorten a response body for inclusion in an error message.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(ERROR_BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_becomes_none() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some(" \t ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some("  token-1 ".to_string())),
            Some("token-1".to_string())
        );
    }

    #[test]
    fn only_http_schemes_are_urls() {
        assert!(is_http_url("http://127.0.0.1:8080"));
        assert!(is_http_url("https://sync.example.com"));
        assert!(!is_http_url("ws://sync.example.com"));
    }

    #[test]
    fn compact_text_limits_length() {
        let body = format!("  {}  ", "x".repeat(500));
        assert_eq!(compact_text(&body).len(), ERROR_BODY_LIMIT);
    }
}
