//! JSON-RPC message construction, framing and classification.
//!
//! Every message on a transport is a single JSON object. `encode` produces
//! one compact line; `decode` sorts incoming text into a request,
//! notification or response and rejects anything that is not JSON-RPC 2.0.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use toolflow_types::protocol::{
    CallToolParams, CallToolResult, CancelledParams, ContentBlock, ErrorObject, InitializeParams,
    JSONRPC_VERSION, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, methods,
};

use super::error::ProtocolError;

/// A decoded incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn request(id: RequestId, method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        method: method.to_string(),
        params,
    }
}

pub fn notification(method: &str, params: Option<Value>) -> JsonRpcNotification {
    JsonRpcNotification {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method: method.to_string(),
        params,
    }
}

pub fn initialize_request(id: RequestId, params: &InitializeParams) -> JsonRpcRequest {
    request(id, methods::INITIALIZE, serde_json::to_value(params).ok())
}

pub fn initialized_notification() -> JsonRpcNotification {
    notification(methods::INITIALIZED, None)
}

pub fn list_tools_request(id: RequestId, cursor: Option<&str>) -> JsonRpcRequest {
    let params = cursor.map(|c| serde_json::json!({ "cursor": c }));
    request(id, methods::TOOLS_LIST, params)
}

pub fn call_tool_request(id: RequestId, name: &str, arguments: Map<String, Value>) -> JsonRpcRequest {
    let params = CallToolParams {
        name: name.to_string(),
        arguments,
    };
    request(id, methods::TOOLS_CALL, serde_json::to_value(params).ok())
}

/// `notifications/cancelled` for an abandoned request.
pub fn cancelled_notification(request_id: RequestId, reason: &str) -> JsonRpcNotification {
    let params = CancelledParams {
        request_id,
        reason: Some(reason.to_string()),
    };
    notification(methods::CANCELLED, serde_json::to_value(params).ok())
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Serialize a message to a single line of compact JSON.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Parse(e.to_string()))
}

/// Parse and classify one incoming message.
pub fn decode(text: &str) -> Result<Incoming, ProtocolError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| ProtocolError::Parse(e.to_string()))?;
    let Value::Object(obj) = &value else {
        return Err(ProtocolError::InvalidMessage(
            "expected a JSON object".to_string(),
        ));
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => {
            return Err(ProtocolError::InvalidMessage(
                "missing or unsupported jsonrpc version".to_string(),
            ));
        }
    }

    let invalid = |e: serde_json::Error| ProtocolError::InvalidMessage(e.to_string());
    if obj.contains_key("method") {
        if obj.contains_key("id") {
            serde_json::from_value(value).map(Incoming::Request).map_err(invalid)
        } else {
            serde_json::from_value(value)
                .map(Incoming::Notification)
                .map_err(invalid)
        }
    } else if obj.contains_key("id") {
        match (obj.contains_key("result"), obj.contains_key("error")) {
            (true, false) | (false, true) => serde_json::from_value(value)
                .map(Incoming::Response)
                .map_err(invalid),
            (true, true) => Err(ProtocolError::InvalidMessage(
                "response carries both result and error".to_string(),
            )),
            (false, false) => Err(ProtocolError::InvalidMessage(
                "response carries neither result nor error".to_string(),
            )),
        }
    } else {
        Err(ProtocolError::InvalidMessage(
            "message has neither method nor id".to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Interpretation
// ---------------------------------------------------------------------------

/// Split a response into its result or its error object.
pub fn into_result(response: JsonRpcResponse) -> Result<Value, ErrorObject> {
    match (response.result, response.error) {
        (_, Some(error)) => Err(error),
        (Some(result), None) => Ok(result),
        (None, None) => Ok(Value::Null),
    }
}

/// Deserialize typed params of an incoming request.
pub fn parse_params<T: DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> Result<T, ProtocolError> {
    serde_json::from_value(params.unwrap_or(Value::Object(Map::new()))).map_err(|e| {
        ProtocolError::InvalidPayload {
            method: method.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Turn a `tools/call` result into a node result.
///
/// - `isError: true` is a tool failure carrying the text content
/// - `structuredContent` wins when present
/// - a single text block is parsed as JSON, falling back to the raw string
/// - several text blocks are joined with newlines
/// - anything else is returned as the raw result
pub fn tool_output(result: Value) -> Result<Value, String> {
    let Ok(parsed) = serde_json::from_value::<CallToolResult>(result.clone()) else {
        return Ok(result);
    };

    let texts: Vec<&str> = parsed
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if parsed.is_error {
        let message = if texts.is_empty() {
            "tool reported an error".to_string()
        } else {
            texts.join("\n")
        };
        return Err(message);
    }

    if let Some(structured) = parsed.structured_content {
        return Ok(structured);
    }

    match texts.as_slice() {
        [single] if parsed.content.len() == 1 => Ok(serde_json::from_str(single)
            .unwrap_or_else(|_| Value::String((*single).to_string()))),
        [] => Ok(result),
        many if many.len() == parsed.content.len() => Ok(Value::String(many.join("\n"))),
        _ => Ok(result),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
