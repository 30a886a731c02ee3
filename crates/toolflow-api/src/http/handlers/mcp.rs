//! Inbound tool endpoint: toolflow acting as a tool server.
//!
//! `POST /mcp` accepts one JSON-RPC message per request and exposes a single
//! tool, `run_workflow`, which runs a stored or inline workflow to
//! completion. Requests carrying an `Origin` header that is not a localhost
//! origin are refused with 403.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};

use toolflow_core::protocol::codec::{self, Incoming};
use toolflow_core::protocol::{ProtocolError, is_allowed_origin};
use toolflow_types::protocol::{
    CallToolParams, CallToolResult, ErrorCode, ErrorObject, Implementation, InitializeParams,
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, Tool,
    methods,
};
use toolflow_types::run::RunStatus;
use toolflow_types::workflow::{InvocationRequest, WorkflowSource};

use crate::http::error::AppError;
use crate::state::AppState;

pub const RUN_WORKFLOW_TOOL: &str = "run_workflow";

/// POST /mcp - Handle one JSON-RPC message.
pub async fn handle_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AppError> {
    check_origin(&headers)?;

    let message = match codec::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed inbound message");
            let code = match e {
                ProtocolError::Parse(_) => ErrorCode::ParseError,
                _ => ErrorCode::InvalidRequest,
            };
            let reply = JsonRpcResponse::failure(None, ErrorObject::new(code, e.to_string()));
            return Ok((StatusCode::BAD_REQUEST, json_body(&reply)).into_response());
        }
    };

    match message {
        Incoming::Request(request) => {
            tracing::debug!(method = %request.method, id = %request.id, "inbound request");
            let reply = dispatch(&state, request).await;
            Ok((StatusCode::OK, json_body(&reply)).into_response())
        }
        Incoming::Notification(notification) => {
            tracing::debug!(method = %notification.method, "inbound notification");
            Ok(StatusCode::ACCEPTED.into_response())
        }
        Incoming::Response(_) => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

fn check_origin(headers: &HeaderMap) -> Result<(), AppError> {
    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    match origin.to_str() {
        Ok(origin) if is_allowed_origin(origin) => Ok(()),
        Ok(origin) => {
            tracing::warn!(origin, "refusing request from non-local origin");
            Err(AppError::Forbidden(format!("origin '{origin}' is not allowed")))
        }
        Err(_) => Err(AppError::Forbidden("malformed Origin header".to_string())),
    }
}

fn json_body(reply: &JsonRpcResponse) -> ([(header::HeaderName, &'static str); 1], String) {
    let body = codec::encode(reply).unwrap_or_else(|_| {
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"failed to encode response"}}"#
            .to_string()
    });
    ([(header::CONTENT_TYPE, "application/json")], body)
}

async fn dispatch(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    let outcome = match request.method.as_str() {
        methods::INITIALIZE => initialize(request.params),
        methods::PING => Ok(json!({})),
        methods::TOOLS_LIST => to_value(&ListToolsResult {
            tools: vec![run_workflow_tool()],
            next_cursor: None,
        }),
        methods::TOOLS_CALL => call_tool(state, request.params).await,
        other => Err(ErrorObject::new(
            ErrorCode::MethodNotFound,
            format!("method not found: {other}"),
        )),
    };
    match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(Some(id), error),
    }
}

fn invalid_params(e: ProtocolError) -> ErrorObject {
    ErrorObject::new(ErrorCode::InvalidParams, e.to_string())
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ErrorObject> {
    serde_json::to_value(value).map_err(|e| ErrorObject::new(ErrorCode::InternalError, e.to_string()))
}

fn initialize(params: Option<Value>) -> Result<Value, ErrorObject> {
    let params: InitializeParams =
        codec::parse_params(methods::INITIALIZE, params).map_err(invalid_params)?;
    tracing::info!(
        client = %params.client_info.name,
        version = %params.client_info.version,
        "inbound client initialized"
    );
    to_value(&InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: json!({ "tools": {} }),
        server_info: Implementation {
            name: "toolflow".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        instructions: Some(format!(
            "Call `{RUN_WORKFLOW_TOOL}` with a `workflow_id` or an inline `workflow` definition."
        )),
    })
}

pub fn run_workflow_tool() -> Tool {
    Tool {
        name: RUN_WORKFLOW_TOOL.to_string(),
        description: Some(
            "Run a workflow of tool calls to completion and return its execution result."
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "workflow_id": {
                    "type": "string",
                    "description": "Id of a stored workflow."
                },
                "workflow": {
                    "type": "object",
                    "description": "Inline workflow definition with name, nodes and edges."
                },
                "params": {
                    "type": "object",
                    "description": "Initial parameters, referenced as ${params.<key>}."
                }
            }
        }),
    }
}

async fn call_tool(state: &AppState, params: Option<Value>) -> Result<Value, ErrorObject> {
    let params: CallToolParams =
        codec::parse_params(methods::TOOLS_CALL, params).map_err(invalid_params)?;
    if params.name != RUN_WORKFLOW_TOOL {
        return Err(ErrorObject::new(
            ErrorCode::InvalidParams,
            format!("unknown tool: {}", params.name),
        ));
    }

    let request = match invocation_from_arguments(params.arguments) {
        Ok(request) => request,
        Err(message) => return to_value(&tool_error(message)),
    };

    let result = match state.run_service.invoke(request).await {
        Ok(result) => result,
        Err(e) => return to_value(&tool_error(e.to_string())),
    };

    let structured = to_value(&result)?;
    to_value(&CallToolResult {
        content: vec![toolflow_types::protocol::ContentBlock::Text {
            text: structured.to_string(),
        }],
        is_error: matches!(result.status, RunStatus::Failed | RunStatus::Cancelled),
        structured_content: Some(structured),
    })
}

fn tool_error(message: String) -> CallToolResult {
    CallToolResult {
        is_error: true,
        ..CallToolResult::text(message)
    }
}

/// Build an invocation from `run_workflow` arguments.
fn invocation_from_arguments(mut arguments: Map<String, Value>) -> Result<InvocationRequest, String> {
    let params = match arguments.remove("params") {
        Some(Value::Object(params)) => params,
        Some(Value::Null) | None => Map::new(),
        Some(_) => return Err("`params` must be an object".to_string()),
    };

    let workflow = match (arguments.remove("workflow"), arguments.remove("workflow_id")) {
        (Some(inline), None) => WorkflowSource::Inline(
            serde_json::from_value(inline).map_err(|e| format!("invalid workflow: {e}"))?,
        ),
        (None, Some(Value::String(workflow_id))) => WorkflowSource::Reference { workflow_id },
        (None, Some(_)) => return Err("`workflow_id` must be a string".to_string()),
        (Some(_), Some(_)) => {
            return Err("pass either `workflow` or `workflow_id`, not both".to_string());
        }
        (None, None) => return Err("missing `workflow` or `workflow_id`".to_string()),
    };

    Ok(InvocationRequest {
        workflow,
        params,
        execution_id: None,
    })
}
