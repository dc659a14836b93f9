//! Shared error taxonomy used across all CourseGate crates.
//!
//! Provider and network failures are classified at the adapter boundary
//! into the variants below; nothing past that boundary ever sees a raw
//! transport error.

/// Shared error type used across all CourseGate crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or incomplete inbound request. Surfaced immediately;
    /// no upstream call is attempted.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No enabled model descriptor matches the requested id.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// The provider owning the requested model has no usable credentials.
    #[error("missing credentials for provider: {0}")]
    MissingCredentials(String),

    /// The provider did not respond within budget, or the call was
    /// cooperatively cancelled mid-flight.
    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    /// The provider responded with an error status. `message` is the
    /// human-readable `error` field extracted from a JSON body when one
    /// was present.
    #[error("upstream rejected (HTTP {status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    /// The provider returned a non-JSON body where JSON was required.
    /// Raw markup is never forwarded to the caller.
    #[error("upstream returned a malformed body: {0}")]
    UpstreamMalformed(String),

    /// A single tool's failure. Never aborts the agent loop or sibling
    /// tool calls in the same step.
    #[error("tool {name}: {message}")]
    Tool { name: String, message: String },

    /// The edit anchor of a conversation delta cannot be resolved
    /// deterministically (duplicate ids in storage). Fatal for that
    /// persistence call; the stored conversation is left untouched.
    #[error("merge conflict: {0}")]
    MergeConflict(String),

    /// Transient persistence failure (connection reset and friends).
    /// The write path retries these a bounded number of times.
    #[error("storage temporarily unavailable: {0}")]
    StorageUnavailable(String),

    /// Hard persistence failure. Never retried.
    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status the gateway maps this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::UnknownModel(_) => 400,
            Error::MissingCredentials(_) => 401,
            Error::MergeConflict(_) => 409,
            Error::UpstreamTimeout(_) => 504,
            Error::UpstreamRejected { .. } | Error::UpstreamMalformed(_) => 502,
            Error::StorageUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// Whether the persistence write path may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream response classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const EXCERPT_LEN: usize = 200;

/// Truncate a body excerpt on a char boundary for inclusion in an error
/// message.
pub fn truncate_excerpt(s: &str) -> String {
    if s.len() <= EXCERPT_LEN {
        return s.to_string();
    }
    let mut end = EXCERPT_LEN;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Classify a non-success upstream HTTP response by content type.
///
/// A JSON body is parsed for a human-readable `error` field and becomes
/// [`Error::UpstreamRejected`]. A non-JSON body becomes
/// [`Error::UpstreamMalformed`]; HTML bodies get an explicit "HTML"
/// marker so callers can show "backend returned HTML" instead of leaking
/// markup. Shared by every adapter and by the workflow tool.
pub fn classify_upstream_response(status: u16, content_type: &str, body: &str) -> Error {
    let looks_html = content_type.contains("text/html")
        || body.trim_start().starts_with("<!DOCTYPE")
        || body.trim_start().starts_with("<html");

    if looks_html {
        return Error::UpstreamMalformed(format!(
            "upstream returned an HTML error body (HTTP {status})"
        ));
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(v) => {
            let message = extract_error_message(&v)
                .unwrap_or_else(|| truncate_excerpt(body));
            Error::UpstreamRejected { status, message }
        }
        Err(_) => Error::UpstreamMalformed(format!(
            "non-JSON error body (HTTP {status}): {}",
            truncate_excerpt(body)
        )),
    }
}

/// Pull the most specific human-readable message out of a JSON error body.
///
/// Providers disagree on shape: `{"error": "..."}`,
/// `{"error": {"message": "..."}}`, and `{"message": "..."}` all occur.
fn extract_error_message(v: &serde_json::Value) -> Option<String> {
    if let Some(err) = v.get("error") {
        if let Some(s) = err.as_str() {
            return Some(s.to_string());
        }
        if let Some(s) = err.get("message").and_then(|m| m.as_str()) {
            return Some(s.to_string());
        }
    }
    v.get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_body_yields_html_marker() {
        let err = classify_upstream_response(
            503,
            "text/html; charset=utf-8",
            "<html><body>Service Unavailable</body></html>",
        );
        match err {
            Error::UpstreamMalformed(msg) => {
                assert!(msg.contains("HTML"));
                assert!(!msg.contains("<body>"));
            }
            other => panic!("expected UpstreamMalformed, got {other:?}"),
        }
    }

    #[test]
    fn html_detected_without_content_type() {
        let err = classify_upstream_response(502, "", "<!DOCTYPE html><html></html>");
        assert!(matches!(err, Error::UpstreamMalformed(ref m) if m.contains("HTML")));
    }

    #[test]
    fn json_error_field_extracted() {
        let err = classify_upstream_response(
            401,
            "application/json",
            r#"{"error": "invalid api key"}"#,
        );
        match err {
            Error::UpstreamRejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid api key");
            }
            other => panic!("expected UpstreamRejected, got {other:?}"),
        }
    }

    #[test]
    fn nested_json_error_message_extracted() {
        let err = classify_upstream_response(
            429,
            "application/json",
            r#"{"error": {"message": "rate limit", "type": "rate_limit_error"}}"#,
        );
        assert!(matches!(
            err,
            Error::UpstreamRejected { status: 429, ref message } if message == "rate limit"
        ));
    }

    #[test]
    fn plain_text_body_is_malformed() {
        let err = classify_upstream_response(500, "text/plain", "something broke");
        match err {
            Error::UpstreamMalformed(msg) => assert!(msg.contains("something broke")),
            other => panic!("expected UpstreamMalformed, got {other:?}"),
        }
    }

    #[test]
    fn timeout_distinct_from_rejection() {
        let timeout = Error::UpstreamTimeout("deadline exceeded".into());
        let rejected = Error::UpstreamRejected {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(timeout.status_code(), 504);
        assert_eq!(rejected.status_code(), 502);
    }

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(Error::Validation("empty conversation".into()).status_code(), 400);
        assert_eq!(Error::UnknownModel("nope".into()).status_code(), 400);
    }

    #[test]
    fn only_storage_unavailable_is_transient() {
        assert!(Error::StorageUnavailable("reset".into()).is_transient());
        assert!(!Error::Storage("corrupt".into()).is_transient());
        assert!(!Error::UpstreamTimeout("t".into()).is_transient());
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let excerpt = truncate_excerpt(&long);
        assert!(excerpt.len() <= 204);
        assert!(excerpt.ends_with('…'));
    }
}
