use std::time::Duration;

use crate::storage::StoreError;

/// Authentication failures.
///
/// `AuthenticationRequired` is what tool calls see; the flow-level variants
/// are surfaced to whoever started the interactive login.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable credential. Only the interactive flow can fix this.
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("an authentication flow is already in progress")]
    AuthInProgress,

    #[error("timed out after {}s waiting for the OAuth callback", .0.as_secs())]
    AuthTimeout(Duration),

    /// The callback's `state` did not match the one this flow issued.
    #[error("OAuth callback state mismatch")]
    StateMismatch,

    /// The authorization server redirected back with an `error` parameter.
    #[error("authorization failed: {error}{}", describe(.description))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    /// Token endpoint answered with a non-2xx status or an unusable body.
    #[error("token exchange failed (HTTP {status}): {body}")]
    AuthExchangeFailed { status: u16, body: String },

    /// Token endpoint could not be reached.
    #[error("token endpoint unreachable: {0}")]
    TokenEndpoint(String),

    #[error("callback listener error: {0}")]
    Listener(String),

    #[error("invalid auth configuration: {0}")]
    Config(String),

    #[error("token store error: {0}")]
    Store(#[from] StoreError),
}

/// OAuth error codes that mean the refresh token or client registration is no
/// longer accepted.
const CREDENTIAL_ERRORS: &[&str] = &["invalid_grant", "invalid_client", "unauthorized_client"];

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl AuthError {
    /// The OAuth `error` code from a failed token response body, if any.
    pub fn oauth_error_code(&self) -> Option<String> {
        match self {
            Self::AuthExchangeFailed { body, .. } => serde_json::from_str::<serde_json::Value>(body)
                .ok()?
                .get("error")?
                .as_str()
                .map(str::to_string),
            _ => None,
        }
    }

    /// Whether the token endpoint rejected the credential itself (as opposed
    /// to throttling, being unreachable or failing server-side).
    pub fn is_credential_rejected(&self) -> bool {
        matches!(self, Self::AuthExchangeFailed { status: 400 | 401, .. })
            && self
                .oauth_error_code()
                .is_some_and(|code| CREDENTIAL_ERRORS.contains(&code.as_str()))
    }
}
