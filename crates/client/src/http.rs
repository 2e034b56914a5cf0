//! Response helpers shared by the per-operation clients.

use std::time::Duration;

/// A non-2xx response, with the body kept for debugging.
#[derive(Debug)]
pub(crate) struct StatusFailure {
    pub status: u16,
    pub body: String,
}

/// Build the shared [`reqwest::Client`], applying a per-request timeout
/// only when one is configured.
pub(crate) fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Join a base URL and an endpoint path with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or the status and body text on failure.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, StatusFailure> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(StatusFailure {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Whether `url` parses as an absolute `http`/`https` URL.
pub(crate) fn is_http_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .unwrap_or(false)
}

/// Treat a missing or blank string field as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://h:8000/", "/upload-url"), "http://h:8000/upload-url");
        assert_eq!(join_url("http://h:8000", "upload-url"), "http://h:8000/upload-url");
        assert_eq!(join_url("http://h/api", "/job-status"), "http://h/api/job-status");
    }

    #[test]
    fn http_urls_recognised() {
        assert!(is_http_url("https://bucket.s3.amazonaws.com/k1?X-Amz-Signature=a"));
        assert!(is_http_url("http://localhost:9000/put"));
        assert!(!is_http_url("s3://bucket/key"));
        assert!(!is_http_url("not a url"));
        assert!(!is_http_url(""));
    }

    #[test]
    fn blank_strings_are_absent() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some("k1".into())), Some("k1".to_string()));
    }
}
