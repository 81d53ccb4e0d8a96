use std::sync::Arc;

use {
    outlook_graph::{ApiError, GraphClient, GraphError, GraphQuery, GraphResponse, Method},
    outlook_oauth::{AuthError, SessionManager},
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tracing::warn,
};

use crate::tool::ToolOutput;

pub const AUTH_REQUIRED_MESSAGE: &str =
    "Authentication required. Please use the 'authenticate' tool first.";

/// Shared state every tool handler runs against.
pub struct ToolContext {
    pub session: Arc<SessionManager>,
    pub graph: GraphClient,
}

/// Why a tool call could not produce its result.
#[derive(Debug)]
pub enum Failure {
    /// No usable token; the user has to run `authenticate`.
    AuthRequired,
    /// Token acquisition failed for a reason other than a missing token
    /// (token endpoint down, unreadable cache).
    Auth(AuthError),
    Graph(ApiError),
    InvalidArgs(String),
}

/// Decode tool arguments; a missing argument object counts as `{}`.
pub(crate) fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))
}

pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, Failure> {
    decode_args(args).map_err(Failure::InvalidArgs)
}

impl From<AuthError> for Failure {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AuthenticationRequired => Self::AuthRequired,
            other => Self::Auth(other),
        }
    }
}

impl From<GraphError> for Failure {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::AuthRequired => Self::AuthRequired,
            GraphError::Api(api) => Self::Graph(api),
            foreign @ GraphError::ForeignUrl(_) => Self::InvalidArgs(foreign.to_string()),
        }
    }
}

impl ToolContext {
    pub fn new(session: Arc<SessionManager>, graph: GraphClient) -> Self {
        Self { session, graph }
    }

    /// Authenticate, then run one Graph call.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &GraphQuery,
    ) -> Result<GraphResponse, Failure> {
        let token = self.session.ensure_authenticated().await?;
        Ok(self
            .graph
            .call_graph_api(&token, method, path, body, query)
            .await?)
    }
}

/// What a failing tool was doing, used to phrase the error for the user.
pub struct Operation<'a> {
    /// e.g. "list channels"
    pub action: &'a str,
    /// Permission the call needs, named on 403.
    pub scope: &'a str,
    /// Phrase used on 404, naming the ids involved.
    pub not_found: Option<String>,
    /// Phrase used on 400.
    pub invalid: Option<&'a str>,
}

impl Operation<'_> {
    pub fn describe(&self, failure: &Failure) -> String {
        match failure {
            Failure::AuthRequired => AUTH_REQUIRED_MESSAGE.to_string(),
            Failure::InvalidArgs(msg) => msg.clone(),
            Failure::Auth(err) => format!("Failed to {}: {err}", self.action),
            Failure::Graph(err) => match err.status {
                None => format!(
                    "Failed to {}: could not reach Microsoft Graph ({})",
                    self.action, err.message
                ),
                Some(401) => "Authentication failed. Please ensure you are logged in.".to_string(),
                Some(403) => format!(
                    "Insufficient permissions to {}. Please ensure the application has {} permission.",
                    self.action, self.scope
                ),
                Some(404) => self
                    .not_found
                    .clone()
                    .unwrap_or_else(|| format!("Failed to {}: {}", self.action, err.message)),
                Some(400) => self.invalid.map(str::to_string).unwrap_or_else(|| {
                    format!("Invalid request to {}: {}", self.action, err.message)
                }),
                Some(_) => format!("Failed to {}: {err}", self.action),
            },
        }
    }

    /// Render `failure` as the tool result, attaching `ids` to JSON errors.
    pub fn output(&self, failure: Failure, ids: Value) -> ToolOutput {
        if matches!(failure, Failure::AuthRequired) {
            return ToolOutput::error(AUTH_REQUIRED_MESSAGE);
        }
        let message = self.describe(&failure);
        warn!(action = self.action, error = %message, "tool call failed");

        let mut body = json!({ "success": false, "error": message });
        if let (Some(obj), Value::Object(extra)) = (body.as_object_mut(), ids) {
            obj.extend(extra);
        }
        ToolOutput::json_error(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> Operation<'static> {
        Operation {
            action: "list channels",
            scope: "Channel.ReadBasic.All",
            not_found: Some("Team with ID 't1' not found or you don't have access to it.".into()),
            invalid: None,
        }
    }

    fn api(status: Option<u16>) -> Failure {
        Failure::Graph(ApiError {
            status,
            code: None,
            message: "boom".into(),
        })
    }

    #[test]
    fn test_status_mapping() {
        let op = op();
        assert!(op.describe(&api(Some(403))).contains("Channel.ReadBasic.All"));
        assert!(op.describe(&api(Some(404))).contains("'t1'"));
        assert!(op.describe(&api(Some(401))).starts_with("Authentication failed"));
        assert!(op.describe(&api(Some(400))).starts_with("Invalid request"));
        assert!(op.describe(&api(None)).contains("could not reach Microsoft Graph"));
        assert!(op.describe(&api(Some(500))).contains("500"));
    }

    #[test]
    fn test_auth_required_is_plain_text() {
        let out = op().output(Failure::AuthRequired, json!({}));
        assert!(out.is_error);
        assert_eq!(out.text, AUTH_REQUIRED_MESSAGE);
    }

    #[test]
    fn test_ids_are_attached() {
        let out = op().output(api(Some(404)), json!({ "teamId": "t1" }));
        let v: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["teamId"], "t1");
    }

    #[test]
    fn test_error_conversions() {
        assert!(matches!(
            Failure::from(AuthError::AuthenticationRequired),
            Failure::AuthRequired
        ));
        assert!(matches!(
            Failure::from(GraphError::AuthRequired),
            Failure::AuthRequired
        ));
        assert!(matches!(
            Failure::from(AuthError::TokenEndpoint("dns".into())),
            Failure::Auth(_)
        ));
        assert!(matches!(
            Failure::from(GraphError::ForeignUrl("https://evil.example/x".into())),
            Failure::InvalidArgs(_)
        ));
    }
}
