use std::{collections::BTreeMap, sync::Arc};

use {
    anyhow::bail,
    serde::Serialize,
    serde_json::Value,
    tracing::debug,
};

use crate::{
    auth::{Authenticate, CheckAuthStatus, Logout},
    context::ToolContext,
    teams::{ListChannels, ListTeams, ReadChannelMessages, SendChannelMessage},
    tool::{Tool, ToolOutput},
};

/// Tool metadata as advertised to the host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Registry of available tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in tools wired to `ctx`.
    pub fn with_builtin(ctx: Arc<ToolContext>) -> Self {
        let mut reg = Self::new();
        let session = Arc::clone(&ctx.session);
        reg.register(Arc::new(Authenticate::new(Arc::clone(&session))));
        reg.register(Arc::new(CheckAuthStatus::new(Arc::clone(&session))));
        reg.register(Arc::new(Logout::new(session)));
        reg.register(Arc::new(ListTeams::new(Arc::clone(&ctx))));
        reg.register(Arc::new(ListChannels::new(Arc::clone(&ctx))));
        reg.register(Arc::new(SendChannelMessage::new(Arc::clone(&ctx))));
        reg.register(Arc::new(ReadChannelMessages::new(ctx)));
        reg
    }

    /// Register a tool. A later registration with the same name replaces the
    /// earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub async fn call(&self, name: &str, args: Value) -> anyhow::Result<ToolOutput> {
        let Some(tool) = self.get(name) else {
            bail!("unknown tool: {name}");
        };
        debug!(tool = name, "executing tool");
        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::teams::tests::harness, serde_json::json};

    #[test]
    fn test_builtin_tools_are_listed_by_name() {
        let h = harness("http://127.0.0.1:1", false);
        let reg = ToolRegistry::with_builtin(h.ctx.clone());
        let names: Vec<_> = reg.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![
            "authenticate",
            "check-auth-status",
            "logout",
            "teams-list-channels",
            "teams-list-teams",
            "teams-read-channel-messages",
            "teams-send-channel-message",
        ]);
    }

    #[test]
    fn test_descriptor_uses_camel_case() {
        let h = harness("http://127.0.0.1:1", false);
        let reg = ToolRegistry::with_builtin(h.ctx.clone());
        let d = serde_json::to_value(&reg.list()[0]).unwrap();
        assert!(d.get("inputSchema").is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool_errors() {
        let reg = ToolRegistry::new();
        let err = reg.call("nope", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_call_dispatches() {
        let h = harness("http://127.0.0.1:1", false);
        let reg = ToolRegistry::with_builtin(h.ctx.clone());
        let out = reg.call("check-auth-status", json!({})).await.unwrap();
        assert_eq!(out.text, "Not authenticated");
    }
}
