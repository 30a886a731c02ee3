//! Streamable HTTP transport.
//!
//! Every outbound message is POSTed to the server URL. The reply is either
//! `202 Accepted` with no body, a JSON body, or a `text/event-stream` whose
//! `data:` payloads are inbound messages. The session id returned by the
//! server is echoed on every later request and the session is deleted when
//! the connection is closed.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use toolflow_core::protocol::codec;
use toolflow_core::protocol::{Connection, InvokeError};
use toolflow_types::protocol::{ErrorCode, ErrorObject, JsonRpcResponse, RequestId};

use super::CHANNEL_CAPACITY;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Open a connection to a Streamable HTTP tool server.
///
/// Nothing is sent until the first outbound message; connection failures
/// surface as error replies to the requests that hit them.
pub fn connect(
    client: reqwest::Client,
    server_id: &str,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<Connection, InvokeError> {
    let connect_error = |reason: String| InvokeError::Connect {
        server: server_id.to_string(),
        reason,
    };

    let url = Url::parse(url).map_err(|e| connect_error(format!("invalid url '{url}': {e}")))?;
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| connect_error(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| connect_error(format!("invalid value for header '{name}': {e}")))?;
        header_map.insert(name, value);
    }

    let endpoint = Arc::new(Endpoint {
        server: server_id.to_string(),
        client,
        url,
        headers: header_map,
        session_id: RwLock::new(None),
    });

    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    tokio::spawn(post_loop(endpoint, outbound_rx, inbound_tx));

    Ok(Connection {
        outbound: outbound_tx,
        inbound: inbound_rx,
    })
}

struct Endpoint {
    server: String,
    client: reqwest::Client,
    url: Url,
    headers: HeaderMap,
    session_id: RwLock<Option<String>>,
}

impl Endpoint {
    fn session_id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session_id(&self, id: &str) {
        let mut slot = self.session_id.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_deref() != Some(id) {
            tracing::debug!(server = %self.server, session_id = id, "http session established");
            *slot = Some(id.to_string());
        }
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.url.clone())
            .headers(self.headers.clone());
        if let Some(id) = self.session_id() {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder
    }

    /// POST one message and forward whatever comes back.
    async fn exchange(&self, message: String, inbound: &mpsc::Sender<String>) -> Result<(), String> {
        let response = self
            .request(reqwest::Method::POST)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(message)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("server answered HTTP {status}"));
        }
        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.set_session_id(id);
        }
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| format!("event stream broke: {e}"))?;
                forward(inbound, &event.data).await?;
            }
            Ok(())
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| format!("failed to read body: {e}"))?;
            forward(inbound, &body).await
        }
    }
}

async fn post_loop(
    endpoint: Arc<Endpoint>,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<String>,
) {
    let mut in_flight = JoinSet::new();
    while let Some(message) = outbound.recv().await {
        while in_flight.try_join_next().is_some() {}

        let endpoint = Arc::clone(&endpoint);
        let inbound = inbound.clone();
        in_flight.spawn(async move {
            let request_id = request_id_of(&message);
            if let Err(reason) = endpoint.exchange(message, &inbound).await {
                tracing::warn!(server = %endpoint.server, %reason, "http exchange failed");
                if let Some(id) = request_id {
                    let reply = JsonRpcResponse::failure(
                        Some(id),
                        ErrorObject::new(ErrorCode::InternalError, format!("http transport: {reason}")),
                    );
                    if let Ok(line) = codec::encode(&reply) {
                        let _ = inbound.send(line).await;
                    }
                }
            }
        });
    }
    in_flight.abort_all();

    if endpoint.session_id().is_some() {
        match endpoint.request(reqwest::Method::DELETE).send().await {
            Ok(response) => {
                tracing::debug!(server = %endpoint.server, status = %response.status(), "http session deleted");
            }
            Err(e) => {
                tracing::debug!(server = %endpoint.server, error = %e, "failed to delete http session");
            }
        }
    }
}

/// Push one body (a message or a batch array) onto the inbound channel.
async fn forward(inbound: &mpsc::Sender<String>, body: &str) -> Result<(), String> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(());
    }
    let messages = if body.starts_with('[') {
        match serde_json::from_str::<Vec<Value>>(body) {
            Ok(batch) => batch.iter().map(Value::to_string).collect(),
            Err(_) => vec![body.to_string()],
        }
    } else {
        vec![body.to_string()]
    };
    for message in messages {
        inbound
            .send(message)
            .await
            .map_err(|_| "connection closed".to_string())?;
    }
    Ok(())
}

fn request_id_of(message: &str) -> Option<RequestId> {
    let value: Value = serde_json::from_str(message).ok()?;
    value.get("method")?;
    serde_json::from_value(value.get("id")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn request_id_only_for_requests() {
        assert_eq!(
            request_id_of(r#"{"jsonrpc":"2.0","id":3,"method":"tools/call"}"#),
            Some(RequestId::Number(3))
        );
        assert_eq!(
            request_id_of(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            None
        );
        assert_eq!(request_id_of(r#"{"jsonrpc":"2.0","id":3,"result":{}}"#), None);
    }

    /// Read one HTTP/1.1 request (head and body) from `stream`.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    async fn respond(stream: &mut TcpStream, status: &str, headers: &str, body: &str) {
        let response = format!(
            "HTTP/1.1 {status}\r\n{headers}Connection: close\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn event_stream_reply_and_session_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let initialize = read_request(&mut first).await;
            respond(
                &mut first,
                "200 OK",
                "Content-Type: text/event-stream\r\nMcp-Session-Id: sess-42\r\n",
                ": keep-alive\n\nevent: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\r\ndata: \"result\":{}}\r\n\r\n",
            )
            .await;

            let (mut second, _) = listener.accept().await.unwrap();
            let notification = read_request(&mut second).await;
            respond(&mut second, "202 Accepted", "", "").await;
            (initialize, notification)
        });

        let mut headers = BTreeMap::new();
        headers.insert("x-api-key".to_string(), "secret".to_string());
        let mut conn = connect(reqwest::Client::new(), "remote", &url, &headers).unwrap();

        conn.outbound
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#.to_string())
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&conn.inbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"], serde_json::json!({}));

        conn.outbound
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
            .await
            .unwrap();

        let (initialize, notification) = server.await.unwrap();
        let initialize = initialize.to_ascii_lowercase();
        assert!(initialize.starts_with("post /mcp"));
        assert!(initialize.contains("accept: application/json, text/event-stream"));
        assert!(initialize.contains("x-api-key: secret"));
        assert!(!initialize.contains("mcp-session-id"));
        assert!(notification.to_ascii_lowercase().contains("mcp-session-id: sess-42"));
    }

    #[tokio::test]
    async fn http_failure_becomes_error_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            respond(&mut stream, "500 Internal Server Error", "", "boom").await;
        });

        let mut conn = connect(reqwest::Client::new(), "remote", &url, &BTreeMap::new()).unwrap();
        conn.outbound
            .send(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call"}"#.to_string())
            .await
            .unwrap();

        let reply: Value = serde_json::from_str(&conn.inbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["error"]["code"], -32603);
        assert!(reply["error"]["message"].as_str().unwrap().contains("500"));
    }

    #[test]
    fn invalid_url_is_a_connect_error() {
        let err = connect(reqwest::Client::new(), "remote", "not a url", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, InvokeError::Connect { .. }));
    }
}
