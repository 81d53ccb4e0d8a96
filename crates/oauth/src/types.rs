use std::{
    collections::BTreeSet,
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Persisted token set. Owned by the [`TokenStore`](crate::TokenStore).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: u64,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl TokenRecord {
    /// Build a record from a token endpoint response received at `now`.
    ///
    /// `previous` supplies the refresh token and scopes when a refresh
    /// response omits them. Returns `None` when the response carries no
    /// lifetime, since the expiry is never guessed.
    pub fn from_response(
        resp: TokenResponse,
        now: u64,
        previous: Option<&TokenRecord>,
    ) -> Option<Self> {
        let expires_in = resp.expires_in?;
        let scopes = match resp.scope.as_deref() {
            Some(s) if !s.trim().is_empty() => s.split_whitespace().map(str::to_string).collect(),
            _ => previous.map(|p| p.scopes.clone()).unwrap_or_default(),
        };
        Some(Self {
            access_token: resp.access_token,
            refresh_token: resp
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            expires_at: now.saturating_add(expires_in),
            scopes,
        })
    }

    /// Usable if it does not expire within `margin_secs` of `now`.
    pub fn is_usable_at(&self, now: u64, margin_secs: u64) -> bool {
        self.expires_at > now.saturating_add(margin_secs)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Token endpoint success body.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// An authorization URL together with the values needed to finish the flow.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub pkce: PkceChallenge,
}

/// In-flight interactive flow. At most one exists at a time; it is consumed
/// when the login completes, fails or is dropped.
#[derive(Debug, Clone, Serialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub created_at: u64,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
