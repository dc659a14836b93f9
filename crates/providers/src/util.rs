//! Shared utility functions for provider adapters.

use cg_domain::error::{classify_upstream_response, Error};

/// Normalize a provider base URL: strip surrounding whitespace and any
/// trailing slashes.
///
/// Idempotent — endpoints are frequently stored pre-normalized and
/// re-normalized per call, and the result must not drift.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeouts and cooperative aborts map to [`Error::UpstreamTimeout`] —
/// callers apply a different status code and retry policy to those.
/// Other transport failures (no HTTP response received) map to
/// [`Error::UpstreamRejected`] with status 0.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::UpstreamTimeout(e.to_string())
    } else {
        Error::UpstreamRejected {
            status: 0,
            message: format!("transport error: {e}"),
        }
    }
}

/// Classify a non-success HTTP response into the error taxonomy.
///
/// Reads the body and defers to the shared content-type classification
/// (JSON `error` field vs explicit "HTML" marker).
pub(crate) async fn error_from_response(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    match resp.text().await {
        Ok(body) => classify_upstream_response(status, &content_type, &body),
        Err(e) => from_reqwest(e),
    }
}

/// Build a reqwest client with the per-deployment call timeout.
pub(crate) fn http_client(timeout_ms: u64) -> cg_domain::error::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| Error::Config(format!("http client: {e}")))
}
