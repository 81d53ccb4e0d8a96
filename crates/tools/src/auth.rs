use std::sync::Arc;

use {
    async_trait::async_trait,
    outlook_oauth::{AuthError, AuthStatus, SessionManager},
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{info, warn},
};

use crate::{
    context::decode_args,
    tool::{Tool, ToolOutput},
};

/// Starts the interactive login. The callback is awaited in a background task
/// so the tool returns as soon as the local link is ready.
pub struct Authenticate {
    session: Arc<SessionManager>,
}

impl Authenticate {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[derive(Deserialize)]
struct AuthenticateArgs {
    #[serde(default)]
    force: bool,
}

#[async_trait]
impl Tool for Authenticate {
    fn name(&self) -> &str {
        "authenticate"
    }

    fn description(&self) -> &str {
        "Authenticate with Microsoft Graph API to access Outlook and Teams data"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "force": {
                    "type": "boolean",
                    "description": "Force re-authentication even if already authenticated"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolOutput> {
        let args: AuthenticateArgs = match decode_args(args) {
            Ok(args) => args,
            Err(message) => return Ok(ToolOutput::error(message)),
        };

        if !args.force && matches!(self.session.status(), AuthStatus::Valid { .. }) {
            return Ok(ToolOutput::text(
                "Already authenticated. Use force=true to sign in again.",
            ));
        }

        let login = match self.session.begin_login().await {
            Ok(login) => login,
            Err(AuthError::AuthInProgress) => {
                return Ok(ToolOutput::error(
                    "An authentication flow is already in progress. Finish it in the browser or wait for it to time out.",
                ));
            },
            Err(e) => return Ok(ToolOutput::error(format!("Failed to start authentication: {e}"))),
        };

        let start_url = login.start_url().to_string();
        tokio::spawn(async move {
            match login.complete().await {
                Ok(_) => info!("authentication finished"),
                Err(e) => warn!(error = %e, "authentication failed"),
            }
        });

        Ok(ToolOutput::text(format!(
            "Authentication required. Please visit the following URL to authenticate with Microsoft: {start_url}\n\n\
             After authentication, you will be redirected back to this application."
        )))
    }
}

pub struct CheckAuthStatus {
    session: Arc<SessionManager>,
}

impl CheckAuthStatus {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

pub fn describe_status(status: &AuthStatus) -> String {
    match status {
        AuthStatus::NoToken => "Not authenticated".to_string(),
        AuthStatus::Valid { expires_in_secs } => format!(
            "Authenticated and ready (access token valid for {} more minutes)",
            expires_in_secs / 60
        ),
        AuthStatus::Expired { refreshable: true } => {
            "Authenticated; the access token has expired and will be refreshed on the next call"
                .to_string()
        },
        AuthStatus::Expired { refreshable: false } => {
            "Access token expired. Please use the 'authenticate' tool.".to_string()
        },
    }
}

#[async_trait]
impl Tool for CheckAuthStatus {
    fn name(&self) -> &str {
        "check-auth-status"
    }

    fn description(&self) -> &str {
        "Check the current authentication status with Microsoft Graph API"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<ToolOutput> {
        Ok(ToolOutput::text(describe_status(&self.session.status())))
    }
}

pub struct Logout {
    session: Arc<SessionManager>,
}

impl Logout {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for Logout {
    fn name(&self) -> &str {
        "logout"
    }

    fn description(&self) -> &str {
        "Remove the cached Microsoft Graph tokens"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<ToolOutput> {
        self.session.logout().await?;
        Ok(ToolOutput::text("Logged out. Cached tokens were removed."))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::teams::tests::harness};

    #[tokio::test]
    async fn test_status_and_logout() {
        let h = harness("http://127.0.0.1:1", true);
        let status = CheckAuthStatus::new(h.ctx.session.clone());
        let out = status.execute(json!({})).await.unwrap();
        assert!(out.text.starts_with("Authenticated and ready"), "{}", out.text);

        Logout::new(h.ctx.session.clone())
            .execute(json!({}))
            .await
            .unwrap();
        let out = status.execute(json!({})).await.unwrap();
        assert_eq!(out.text, "Not authenticated");
    }

    #[tokio::test]
    async fn test_authenticate_skips_when_valid() {
        let h = harness("http://127.0.0.1:1", true);
        let out = Authenticate::new(h.ctx.session.clone())
            .execute(json!({}))
            .await
            .unwrap();
        assert!(out.text.starts_with("Already authenticated"));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_malformed_args() {
        let h = harness("http://127.0.0.1:1", true);
        let out = Authenticate::new(h.ctx.session.clone())
            .execute(json!({"force": "yes"}))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.text.starts_with("invalid arguments"), "{}", out.text);
    }

    #[test]
    fn test_describe_expired() {
        assert!(
            describe_status(&AuthStatus::Expired { refreshable: false }).contains("authenticate")
        );
        assert_eq!(
            describe_status(&AuthStatus::Valid {
                expires_in_secs: 600
            }),
            "Authenticated and ready (access token valid for 10 more minutes)"
        );
    }
}
