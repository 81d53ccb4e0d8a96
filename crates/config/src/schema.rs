use std::path::PathBuf;

use {
    anyhow::{Context, bail},
    secrecy::Secret,
    serde::Deserialize,
};

pub const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0/";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3333/auth/callback";
pub const DEFAULT_AUTH_SERVER_URL: &str = "http://localhost:3333";
pub const TOKEN_FILE_NAME: &str = ".outlook-mcp-tokens.json";

const LOGIN_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scopes requested when none are configured. `offline_access` is what makes
/// the identity platform hand out a refresh token.
pub const DEFAULT_SCOPES: &[&str] = &[
    "offline_access",
    "User.Read",
    "Mail.Read",
    "Mail.ReadWrite",
    "Mail.Send",
    "Calendars.Read",
    "Calendars.ReadWrite",
    "Team.ReadBasic.All",
    "Channel.ReadBasic.All",
    "ChannelMessage.Read.All",
    "ChannelMessage.Send",
];

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutlookConfig {
    pub auth: AuthConfig,
    pub graph: GraphConfig,
}

/// OAuth application registration and token cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    /// Requested scopes, in order. Joined with spaces on the wire.
    pub scopes: Vec<String>,
    pub token_store_path: PathBuf,
    /// Base URL of the local listener; `{auth_server_url}/auth` redirects to
    /// the upstream authorization page.
    pub auth_server_url: String,
    pub tenant: String,
    /// Overrides the authorization endpoint derived from `tenant`.
    pub authorize_url: Option<String>,
    /// Overrides the token endpoint derived from `tenant`.
    pub token_url: Option<String>,
    /// Tokens expiring within this many seconds are treated as expired.
    pub refresh_margin_secs: u64,
    /// How long the redirect listener waits for the browser callback.
    pub callback_timeout_secs: u64,
    /// Upper bound on a single token-endpoint request.
    pub token_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: Secret::new(String::new()),
            redirect_uri: DEFAULT_REDIRECT_URI.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            token_store_path: default_token_store_path(),
            auth_server_url: DEFAULT_AUTH_SERVER_URL.into(),
            tenant: "common".into(),
            authorize_url: None,
            token_url: None,
            refresh_margin_secs: 300,
            callback_timeout_secs: 300,
            token_timeout_secs: 30,
        }
    }
}

/// Host, port and path the redirect listener binds to, parsed from `redirect_uri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl AuthConfig {
    pub fn authorize_endpoint(&self) -> String {
        self.authorize_url.clone().unwrap_or_else(|| {
            format!("{LOGIN_AUTHORITY}/{}/oauth2/v2.0/authorize", self.tenant_or_common())
        })
    }

    pub fn token_endpoint(&self) -> String {
        self.token_url.clone().unwrap_or_else(|| {
            format!("{LOGIN_AUTHORITY}/{}/oauth2/v2.0/token", self.tenant_or_common())
        })
    }

    /// Scopes joined by a single space, in configured order.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    fn tenant_or_common(&self) -> &str {
        if self.tenant.trim().is_empty() {
            "common"
        } else {
            self.tenant.trim()
        }
    }

    /// Parse the listener address out of `redirect_uri`.
    pub fn redirect_target(&self) -> anyhow::Result<RedirectTarget> {
        let url = url::Url::parse(&self.redirect_uri)
            .with_context(|| format!("invalid redirect_uri '{}'", self.redirect_uri))?;
        if url.scheme() != "http" {
            bail!(
                "redirect_uri '{}' must use http (the listener is local)",
                self.redirect_uri
            );
        }
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("redirect_uri '{}' has no host", self.redirect_uri))?;
        let port = url
            .port()
            .ok_or_else(|| anyhow::anyhow!("redirect_uri '{}' has no port", self.redirect_uri))?;
        Ok(RedirectTarget {
            host: host.to_string(),
            port,
            path: url.path().to_string(),
        })
    }

    /// Checks needed before an interactive flow can start.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_id.trim().is_empty() {
            bail!("client_id is not set (MS_CLIENT_ID)");
        }
        if self.scopes.is_empty() {
            bail!("at least one scope must be configured");
        }
        self.redirect_target()?;
        Ok(())
    }
}

/// Graph endpoint and transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub endpoint: String,
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GRAPH_ENDPOINT.into(),
            request_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff for 429, 5xx and transport failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

fn default_token_store_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
        .join(TOKEN_FILE_NAME)
}
