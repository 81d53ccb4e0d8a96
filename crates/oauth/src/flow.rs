use std::{sync::Arc, time::Duration};

use {
    outlook_config::AuthConfig,
    secrecy::ExposeSecret,
    tracing::{debug, warn},
};

use crate::{
    error::AuthError,
    pkce,
    types::{AuthorizationRequest, TokenRecord, TokenResponse, unix_now},
};

/// Drives the authorization-code exchange against the identity platform.
#[derive(Clone)]
pub struct OAuthFlow {
    config: Arc<AuthConfig>,
    client: reqwest::Client,
}

impl OAuthFlow {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Build the authorization URL with a fresh `state` and PKCE pair.
    pub fn start(&self) -> Result<AuthorizationRequest, AuthError> {
        let state = pkce::generate_state();
        let pkce = pkce::generate();

        let endpoint = self.config.authorize_endpoint();
        let mut url = url::Url::parse(&endpoint)
            .map_err(|e| AuthError::Config(format!("invalid authorize URL '{endpoint}': {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scope_string())
            .append_pair("state", &state)
            .append_pair("response_mode", "query")
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state,
            pkce,
        })
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(&self, code: &str, verifier: &str) -> Result<TokenRecord, AuthError> {
        let scope = self.config.scope_string();
        let mut form = self.client_credentials();
        form.extend([
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", verifier),
            ("scope", scope.as_str()),
        ]);
        self.request_tokens(&form, None).await
    }

    /// Mint a new access token from `previous`'s refresh token.
    pub async fn refresh(&self, previous: &TokenRecord) -> Result<TokenRecord, AuthError> {
        let refresh_token = previous
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::AuthenticationRequired)?;
        let scope = self.config.scope_string();
        let mut form = self.client_credentials();
        form.extend([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ]);
        self.request_tokens(&form, Some(previous)).await
    }

    fn client_credentials(&self) -> Vec<(&'static str, &str)> {
        let mut form = vec![("client_id", self.config.client_id.as_str())];
        let secret = self.config.client_secret.expose_secret();
        if !secret.is_empty() {
            form.push(("client_secret", secret.as_str()));
        }
        form
    }

    async fn request_tokens(
        &self,
        form: &[(&str, &str)],
        previous: Option<&TokenRecord>,
    ) -> Result<TokenRecord, AuthError> {
        let endpoint = self.config.token_endpoint();
        let resp = self
            .client
            .post(&endpoint)
            .timeout(Duration::from_secs(self.config.token_timeout_secs))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?;

        if !status.is_success() {
            let err = AuthError::AuthExchangeFailed {
                status: status.as_u16(),
                body,
            };
            warn!(
                status = status.as_u16(),
                oauth_error = err.oauth_error_code().as_deref().unwrap_or("-"),
                "token endpoint rejected request"
            );
            return Err(err);
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::AuthExchangeFailed {
                status: status.as_u16(),
                body: format!("malformed token response: {e}"),
            })?;
        let record = TokenRecord::from_response(parsed, unix_now(), previous).ok_or_else(|| {
            AuthError::AuthExchangeFailed {
                status: status.as_u16(),
                body: "token response has no expires_in".into(),
            }
        })?;

        debug!(expires_at = record.expires_at, "token endpoint issued access token");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        secrecy::Secret,
        std::collections::HashMap,
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{body_string_contains, method, path},
        },
    };

    fn config(token_url: &str) -> Arc<AuthConfig> {
        Arc::new(AuthConfig {
            client_id: "client-123".into(),
            client_secret: Secret::new("shh".into()),
            redirect_uri: "http://localhost:3333/auth/callback".into(),
            scopes: vec!["offline_access".into(), "Mail.Read".into()],
            token_url: Some(token_url.into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_authorization_url_contents() {
        let flow = OAuthFlow::new(config("http://127.0.0.1:1/token"));
        let req = flow.start().unwrap();
        let url = url::Url::parse(&req.url).unwrap();
        assert!(req.url.starts_with(
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize?"
        ));
        let q: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(q["client_id"], "client-123");
        assert_eq!(q["response_type"], "code");
        assert_eq!(q["redirect_uri"], "http://localhost:3333/auth/callback");
        assert_eq!(q["scope"], "offline_access Mail.Read");
        assert_eq!(q["state"], req.state);
        assert_eq!(q["code_challenge"], req.pkce.challenge);
        assert_eq!(q["code_challenge_method"], "S256");
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("client_secret=shh"))
            .and(body_string_contains("code_verifier=ver"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
                "scope": "Mail.Read User.Read",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let flow = OAuthFlow::new(config(&format!("{}/token", server.uri())));
        let before = unix_now();
        let rec = flow.exchange("the-code", "ver").await.unwrap();
        assert_eq!(rec.access_token, "at-1");
        assert_eq!(rec.refresh_token.as_deref(), Some("rt-1"));
        assert!(rec.expires_at >= before + 3600);
        assert!(rec.scopes.contains("User.Read"));
    }

    #[tokio::test]
    async fn test_exchange_failure_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error":"invalid_grant","error_description":"bad code"}"#),
            )
            .mount(&server)
            .await;

        let flow = OAuthFlow::new(config(&format!("{}/token", server.uri())));
        let err = flow.exchange("bad", "ver").await.unwrap_err();
        match &err {
            AuthError::AuthExchangeFailed { status, body } => {
                assert_eq!(*status, 400);
                assert!(body.contains("bad code"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.oauth_error_code().as_deref(), Some("invalid_grant"));
    }

    #[tokio::test]
    async fn test_exchange_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let flow = OAuthFlow::new(config(&format!("{}/token", server.uri())));
        let err = flow.exchange("c", "v").await.unwrap_err();
        assert!(matches!(err, AuthError::AuthExchangeFailed { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_refresh_uses_refresh_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-new",
                "expires_in": 60
            })))
            .expect(1)
            .mount(&server)
            .await;

        let flow = OAuthFlow::new(config(&format!("{}/token", server.uri())));
        let previous = TokenRecord {
            access_token: "at-old".into(),
            refresh_token: Some("rt-old".into()),
            expires_at: 0,
            scopes: ["Mail.Read".to_string()].into(),
        };
        let rec = flow.refresh(&previous).await.unwrap();
        assert_eq!(rec.access_token, "at-new");
        assert_eq!(rec.refresh_token.as_deref(), Some("rt-old"));
        assert_eq!(rec.scopes, previous.scopes);
    }

    #[tokio::test]
    async fn test_hung_token_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "access_token": "late",
                        "expires_in": 3600
                    }))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let flow = OAuthFlow::new(Arc::new(AuthConfig {
            token_timeout_secs: 1,
            ..(*config(&format!("{}/token", server.uri()))).clone()
        }));
        let started = std::time::Instant::now();
        let err = flow.exchange("c", "v").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenEndpoint(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint() {
        let flow = OAuthFlow::new(config("http://127.0.0.1:1/token"));
        let err = flow.exchange("c", "v").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenEndpoint(_)));
    }
}
