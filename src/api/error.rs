use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;

const GENERIC_FAILURE: &str = "The chat service could not complete the request.";
const MAX_DETAIL_CHARS: usize = 300;

/// Failures raised while talking to the chat backend.
#[derive(Debug)]
pub enum ApiError {
    /// The base URL or an endpoint path could not be turned into a URL.
    InvalidUrl(String),

    /// The request never produced an HTTP response (DNS, connect, TLS, ...).
    Transport(reqwest::Error),

    /// The backend answered with a non-2xx status.
    Status {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Raw response body, possibly empty.
        body: String,
    },

    /// The response body did not match the expected payload.
    Decode {
        /// Endpoint whose response failed to decode.
        endpoint: String,
        /// The JSON deserialization error.
        source: serde_json::Error,
    },

    /// No response arrived before the request deadline.
    Timeout(Duration),

    /// The request was cancelled by the caller.
    Cancelled,
}

impl ApiError {
    pub fn status(status: StatusCode, body: impl Into<String>) -> Self {
        ApiError::Status {
            status,
            body: body.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Human readable reason suitable for a notification.
    ///
    /// Backend-provided detail text wins when the body carries one; otherwise a
    /// generic description of the failure class is returned.
    pub fn detail(&self) -> String {
        match self {
            ApiError::Status { status, body } => extract_error_summary(body)
                .filter(|summary| !summary.is_empty())
                .unwrap_or_else(|| match status.canonical_reason() {
                    Some(reason) => format!("{GENERIC_FAILURE} ({} {reason})", status.as_u16()),
                    None => format!("{GENERIC_FAILURE} (status {})", status.as_u16()),
                }),
            ApiError::Transport(_) => "Could not reach the chat service.".to_string(),
            ApiError::Decode { endpoint, .. } => {
                format!("Unexpected response from {endpoint}.")
            }
            ApiError::Timeout(deadline) => {
                format!("No response within {} seconds.", deadline.as_secs())
            }
            ApiError::Cancelled => "Request cancelled.".to_string(),
            ApiError::InvalidUrl(url) => format!("Invalid service URL: {url}"),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidUrl(url) => write!(f, "invalid service URL: {url}"),
            ApiError::Transport(err) => write!(f, "request failed: {err}"),
            ApiError::Status { status, body } => {
                let body = body.trim();
                if body.is_empty() {
                    write!(f, "request failed with status {status}")
                } else {
                    write!(f, "request failed with status {status}: {body}")
                }
            }
            ApiError::Decode { endpoint, source } => {
                write!(f, "failed to decode response from {endpoint}: {source}")
            }
            ApiError::Timeout(deadline) => {
                write!(f, "request timed out after {}s", deadline.as_secs())
            }
            ApiError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ApiError::Transport(err) => Some(err),
            ApiError::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err)
    }
}

/// Pull the most specific message out of an error body.
///
/// Understands `{"detail": "..."}`, `{"detail": [{"msg": "..."}]}`,
/// `{"error": {"message": "..."}}`, `{"error": "..."}` and `{"message": "..."}`.
/// Non-JSON bodies are used verbatim when short enough to be readable.
pub(crate) fn extract_error_summary(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        if trimmed.starts_with('<') {
            return None;
        }
        return Some(collapse(trimmed));
    };

    let summary = value
        .get("detail")
        .and_then(|detail| match detail {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Array(items) => {
                let parts: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|msg| msg.as_str()))
                    .collect();
                (!parts.is_empty()).then(|| parts.join("; "))
            }
            _ => None,
        })
        .or_else(|| {
            value
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        });

    summary.map(|text| collapse(&text))
}

fn collapse(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_DETAIL_CHARS {
        let mut truncated: String = collapsed.chars().take(MAX_DETAIL_CHARS).collect();
        truncated.push('…');
        truncated
    } else {
        collapsed
    }
}
