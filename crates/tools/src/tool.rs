use {async_trait::async_trait, serde_json::Value};

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn input_schema(&self) -> Value;

    /// Run the tool. Expected failures (bad arguments, Graph errors, missing
    /// authentication) come back as an error [`ToolOutput`]; `Err` is reserved
    /// for bugs and I/O the caller cannot act on.
    async fn execute(&self, args: Value) -> anyhow::Result<ToolOutput>;
}

/// Text result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Pretty-printed JSON body.
    pub fn json(value: &Value) -> Self {
        Self::text(pretty(value))
    }

    pub fn json_error(value: &Value) -> Self {
        Self::error(pretty(value))
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
