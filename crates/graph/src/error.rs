use std::fmt;

/// Failure of a Graph call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    /// No usable access token was supplied; nothing was sent.
    #[error("authentication required")]
    AuthRequired,

    /// An absolute URL outside the configured endpoint's origin; nothing was sent.
    #[error("refusing to send credentials to '{0}': not on the Graph endpoint")]
    ForeignUrl(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl GraphError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthRequired | Self::ForeignUrl(_) => None,
            Self::Api(e) => e.status,
        }
    }
}

/// Graph rejected the request, or it never got an answer.
///
/// `status` is `None` for transport failures (DNS, connect, timeout), so those
/// are never mistaken for a 4xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: Option<u16>,
    /// `error.code` from the Graph error body, e.g. `ErrorItemNotFound`.
    pub code: Option<String>,
    pub message: String,
}

/// Longest raw body kept as a message when Graph returns a non-JSON error.
const MAX_RAW_MESSAGE: usize = 300;

impl ApiError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        self.status.is_none()
    }

    /// Build from a non-2xx response body.
    ///
    /// Graph errors look like `{"error":{"code":"..","message":".."}}`; any
    /// other body is kept as truncated text.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));
        let code = error
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str())
            .map(str::to_string);
        let message = error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| raw_message(status, body));
        Self {
            status: Some(status),
            code,
            message,
        }
    }
}

fn raw_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("request failed")
            .to_string();
    }
    match body.char_indices().nth(MAX_RAW_MESSAGE) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code) {
            (None, _) => write!(f, "transport error: {}", self.message),
            (Some(status), Some(code)) => {
                write!(f, "Graph API error {status} ({code}): {}", self.message)
            },
            (Some(status), None) => write!(f, "Graph API error {status}: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}
