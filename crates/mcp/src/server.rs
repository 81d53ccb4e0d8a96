use std::sync::Arc;

use {
    anyhow::Context,
    outlook_tools::{ToolOutput, ToolRegistry},
    serde_json::{Value, json},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
        sync::mpsc,
        task::JoinSet,
    },
    tracing::{debug, info, warn},
};

use crate::protocol::{ErrorCode, RpcId, RpcMessage, RpcRequest, RpcResponse, parse_message};

pub const SERVER_NAME: &str = "outlook-assistant";
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Dispatches MCP methods to the tool registry.
#[derive(Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
}

impl McpServer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Handle one input line. Notifications and blank lines yield `None`.
    pub async fn handle_line(&self, line: &str) -> Option<RpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match parse_message(line) {
            Ok(RpcMessage::Request(req)) => Some(self.handle_request(req).await),
            Ok(RpcMessage::Notification { method }) => {
                debug!(method, "notification ignored");
                None
            },
            Err(failure) => {
                warn!(error = %failure.message, "rejecting malformed message");
                Some(failure.into_response())
            },
        }
    }

    async fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let RpcRequest {
            id, method, params, ..
        } = req;
        match method.as_str() {
            "initialize" => RpcResponse::success(id, self.initialize(&params)),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => RpcResponse::success(id, json!({ "tools": self.registry.list() })),
            "tools/call" => self.call_tool(id, params).await,
            other => {
                debug!(method = other, "unknown method");
                RpcResponse::error(
                    id,
                    ErrorCode::MethodNotFound,
                    format!("Method not found: {other}"),
                )
            },
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        if let Some(client) = params.get("clientInfo") {
            info!(client = %client, "client connected");
        }
        json!({
            "protocolVersion": version,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    async fn call_tool(&self, id: RpcId, params: Value) -> RpcResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return RpcResponse::error(id, ErrorCode::InvalidParams, "tools/call requires 'name'");
        };
        let Some(tool) = self.registry.get(name) else {
            return RpcResponse::error(
                id,
                ErrorCode::InvalidParams,
                format!("Unknown tool: {name}"),
            );
        };
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        info!(tool = name, "tool call");
        let output = match tool.execute(args).await {
            Ok(out) => out,
            Err(e) => {
                warn!(tool = name, error = %e, "tool failed");
                ToolOutput::error(format!("Error: {e:#}"))
            },
        };
        RpcResponse::success(id, tool_result(&output))
    }

    /// Serve until `reader` hits EOF. Requests run concurrently; responses
    /// are written one line each, in completion order.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<RpcResponse>(64);
        let write_task = tokio::spawn(async move {
            while let Some(resp) = rx.recv().await {
                let mut line = serde_json::to_vec(&resp).context("serialize response")?;
                line.push(b'\n');
                writer.write_all(&line).await.context("write response")?;
                writer.flush().await.context("flush response")?;
            }
            anyhow::Ok(())
        });

        let mut lines = BufReader::new(reader).lines();
        let mut in_flight = JoinSet::new();
        while let Some(line) = lines.next_line().await.context("read request")? {
            let server = self.clone();
            let tx = tx.clone();
            in_flight.spawn(async move {
                if let Some(resp) = server.handle_line(&line).await {
                    let _ = tx.send(resp).await;
                }
            });
            while in_flight.try_join_next().is_some() {}
        }
        info!("input closed, draining in-flight requests");
        while in_flight.join_next().await.is_some() {}
        drop(tx);

        write_task.await.context("response writer panicked")?
    }

    pub async fn serve_stdio(&self) -> anyhow::Result<()> {
        info!(server = SERVER_NAME, "MCP server listening on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }
}

fn tool_result(output: &ToolOutput) -> Value {
    json!({
        "content": [{ "type": "text", "text": output.text }],
        "isError": output.is_error,
    })
}
