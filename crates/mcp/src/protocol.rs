//! JSON-RPC 2.0 message types and parsing.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::debug,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
    Null,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    Internal = -32603,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

impl RpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RpcId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// A request (answered) or a notification (never answered).
#[derive(Debug)]
pub enum RpcMessage {
    Request(RpcRequest),
    Notification { method: String },
}

/// A line that could not be turned into an [`RpcMessage`]. Carries the id
/// when one could be recovered, so the error response can be correlated.
#[derive(Debug)]
pub struct ParseFailure {
    pub id: RpcId,
    pub code: ErrorCode,
    pub message: String,
}

impl ParseFailure {
    pub fn into_response(self) -> RpcResponse {
        RpcResponse::error(self.id, self.code, self.message)
    }
}

pub fn parse_message(line: &str) -> Result<RpcMessage, ParseFailure> {
    let value: Value = serde_json::from_str(line).map_err(|e| ParseFailure {
        id: RpcId::Null,
        code: ErrorCode::ParseError,
        message: format!("Parse error: {e}"),
    })?;

    let id = value
        .get("id")
        .and_then(|v| serde_json::from_value::<RpcId>(v.clone()).ok())
        .unwrap_or(RpcId::Null);
    let invalid = |message: String| ParseFailure {
        id: id.clone(),
        code: ErrorCode::InvalidRequest,
        message,
    };

    let Some(obj) = value.as_object() else {
        return Err(invalid("Invalid Request: message must be a JSON object".into()));
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(invalid("Invalid Request: jsonrpc must be \"2.0\"".into()));
    }
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err(invalid("Invalid Request: missing method".into()));
    };

    if !obj.contains_key("id") {
        debug!(method, "parsed notification");
        return Ok(RpcMessage::Notification {
            method: method.to_string(),
        });
    }

    let request: RpcRequest = serde_json::from_value(value.clone())
        .map_err(|e| invalid(format!("Invalid Request: {e}")))?;
    debug!(method, id = ?request.id, "parsed request");
    Ok(RpcMessage::Request(request))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        let RpcMessage::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.id, RpcId::Number(7));
        assert_eq!(req.method, "tools/list");
        assert!(req.params.is_null());
    }

    #[test]
    fn test_parse_string_id() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","id":"a","method":"ping","params":{}}"#)
            .unwrap();
        assert!(matches!(msg, RpcMessage::Request(RpcRequest { id: RpcId::String(ref s), .. }) if s == "a"));
    }

    #[test]
    fn test_parse_notification() {
        let msg =
            parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(msg, RpcMessage::Notification { ref method } if method == "notifications/initialized"));
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let err = parse_message("{not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        assert_eq!(err.id, RpcId::Null);
    }

    #[test]
    fn test_wrong_version_keeps_id() {
        let err = parse_message(r#"{"jsonrpc":"1.0","id":3,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert_eq!(err.id, RpcId::Number(3));
    }

    #[test]
    fn test_missing_method() {
        let err = parse_message(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_response_serialization() {
        let ok = serde_json::to_value(RpcResponse::success(RpcId::Number(1), serde_json::json!({})))
            .unwrap();
        assert_eq!(ok, serde_json::json!({"jsonrpc":"2.0","id":1,"result":{}}));

        let err = serde_json::to_value(RpcResponse::error(
            RpcId::Null,
            ErrorCode::MethodNotFound,
            "nope",
        ))
        .unwrap();
        assert_eq!(err["error"]["code"], -32601);
        assert!(err["id"].is_null());
        assert!(err.get("result").is_none());
    }
}
