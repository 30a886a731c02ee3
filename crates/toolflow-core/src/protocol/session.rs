//! Tool-server sessions.
//!
//! `SessionManager` owns one `Session` per configured tool server. A session
//! is opened lazily by the first call to its server and performs the
//! `initialize` handshake exactly once; concurrent first callers wait on the
//! same handshake. Each session has a reader task that routes responses to
//! the outstanding request with the matching id, answers server `ping`
//! requests, and fails everything outstanding when the transport closes.
//!
//! # Session lifecycle
//!
//! `Uninitialized -> Handshaking -> Ready -> Closed`, or
//! `Handshaking -> Failed`. A failed session keeps returning the handshake
//! error until it is retired; a closed session is replaced by the next call.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value, json};
use tokio::sync::{OnceCell, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use toolflow_types::config::{ClientConfig, ServerConfig};
use toolflow_types::protocol::{
    ErrorCode, ErrorObject, Implementation, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, RequestId, Tool, methods,
};
use tracing::{debug, info, warn};

use super::codec::{self, Incoming};
use super::error::{InvokeError, ProtocolError};
use super::transport::{Connection, Connector, ToolInvoker};

/// Upper bound on the `initialize` exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

/// A request waiting for its response.
struct Outstanding {
    deadline: Instant,
    reply: oneshot::Sender<JsonRpcResponse>,
}

/// State shared between a session and its reader task.
struct Shared {
    server_id: String,
    state: Mutex<SessionState>,
    outstanding: DashMap<RequestId, Outstanding>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Mark the transport gone. A failed handshake stays failed.
    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Failed {
            *state = SessionState::Closed;
        }
    }
}

/// Aborts the reader task when the owning link goes away.
struct ReaderGuard(JoinHandle<()>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// An established, initialized connection.
struct Link {
    outbound: mpsc::Sender<String>,
    next_id: AtomicU64,
    info: InitializeResult,
    _reader: ReaderGuard,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session {
    shared: Arc<Shared>,
    config: ServerConfig,
    link: OnceCell<Result<Link, InvokeError>>,
}

impl Session {
    fn new(server_id: &str, config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                server_id: server_id.to_string(),
                state: Mutex::new(SessionState::Uninitialized),
                outstanding: DashMap::new(),
            }),
            config,
            link: OnceCell::new(),
        }
    }

    fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// The initialized link, establishing it on first use.
    async fn link<C: Connector>(
        &self,
        connector: &C,
        client: &ClientConfig,
    ) -> Result<&Link, InvokeError> {
        let outcome = self
            .link
            .get_or_init(|| async {
                let result = self.establish(connector, client).await;
                if let Err(e) = &result {
                    self.shared.set_state(SessionState::Failed);
                    warn!(server = %self.shared.server_id, error = %e, "tool server handshake failed");
                }
                result
            })
            .await;
        outcome.as_ref().map_err(Clone::clone)
    }

    async fn establish<C: Connector>(
        &self,
        connector: &C,
        client: &ClientConfig,
    ) -> Result<Link, InvokeError> {
        let server = self.shared.server_id.clone();
        self.shared.set_state(SessionState::Handshaking);
        debug!(server = %server, transport = self.config.transport_name(), "opening tool server session");

        let Connection { outbound, inbound } = connector.connect(&server, &self.config).await?;
        let reader = ReaderGuard(tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            inbound,
            outbound.clone(),
        )));

        let next_id = AtomicU64::new(1);
        let params = InitializeParams {
            protocol_version: client.protocol_version.clone(),
            capabilities: json!({}),
            client_info: Implementation {
                name: client.name.clone(),
                version: client.version.clone(),
            },
        };
        let handshake_error = |reason: String| InvokeError::Handshake {
            server: server.clone(),
            reason,
        };

        let result = exchange(
            &self.shared,
            &outbound,
            RequestId::from(next_id.fetch_add(1, Ordering::SeqCst)),
            |id| codec::initialize_request(id, &params),
            Instant::now() + HANDSHAKE_TIMEOUT,
            HANDSHAKE_TIMEOUT,
            None,
        )
        .await
        .map_err(|e| handshake_error(e.to_string()))?;

        let info: InitializeResult =
            serde_json::from_value(result).map_err(|e| handshake_error(e.to_string()))?;

        let line = codec::encode(&codec::initialized_notification())?;
        outbound
            .send(line)
            .await
            .map_err(|_| handshake_error("connection closed during handshake".to_string()))?;

        if info.protocol_version != client.protocol_version {
            debug!(
                server = %server,
                requested = %client.protocol_version,
                negotiated = %info.protocol_version,
                "server negotiated a different protocol version"
            );
        }
        self.shared.set_state(SessionState::Ready);
        info!(
            server = %server,
            server_name = %info.server_info.name,
            server_version = %info.server_info.version,
            protocol_version = %info.protocol_version,
            "tool server session ready"
        );

        Ok(Link {
            outbound,
            next_id,
            info,
            _reader: reader,
        })
    }

    /// The link, unless the caller's deadline or cancellation comes first.
    ///
    /// Giving up drops this caller's handshake attempt; the next caller
    /// starts a fresh one.
    async fn link_within<C: Connector>(
        &self,
        connector: &C,
        client: &ClientConfig,
        deadline: Instant,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<&Link, InvokeError> {
        tokio::select! {
            link = self.link(connector, client) => link,
            () = tokio::time::sleep_until(deadline) => {
                debug!(server = %self.shared.server_id, "call deadline passed during handshake");
                Err(timeout_error(&self.shared, timeout))
            }
            () = cancelled(cancel) => {
                debug!(server = %self.shared.server_id, "run cancelled during handshake");
                Err(InvokeError::Cancelled)
            }
        }
    }

    /// Send one request on this session and wait for its result. The
    /// timeout covers the handshake as well when the session is new.
    async fn request<C, F>(
        &self,
        connector: &C,
        client: &ClientConfig,
        build: F,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, InvokeError>
    where
        C: Connector,
        F: FnOnce(RequestId) -> JsonRpcRequest,
    {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(InvokeError::Cancelled);
        }
        let deadline = Instant::now() + timeout;
        let link = self
            .link_within(connector, client, deadline, timeout, cancel)
            .await?;
        if self.state() == SessionState::Closed {
            return Err(InvokeError::Closed(self.shared.server_id.clone()));
        }
        let id = RequestId::from(link.next_id.fetch_add(1, Ordering::SeqCst));
        exchange(&self.shared, &link.outbound, id, build, deadline, timeout, cancel).await
    }
}

// ---------------------------------------------------------------------------
// Request/response exchange
// ---------------------------------------------------------------------------

/// Register `id` as outstanding, send the request, and wait for the reply,
/// the deadline, or cancellation, whichever comes first. `timeout` is only
/// used to report a missed deadline.
async fn exchange<F>(
    shared: &Shared,
    outbound: &mpsc::Sender<String>,
    id: RequestId,
    build: F,
    deadline: Instant,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<Value, InvokeError>
where
    F: FnOnce(RequestId) -> JsonRpcRequest,
{
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        return Err(InvokeError::Cancelled);
    }

    let request = build(id.clone());
    let method = request.method.clone();
    let line = codec::encode(&request)?;

    let (reply_tx, reply_rx) = oneshot::channel();
    shared.outstanding.insert(
        id.clone(),
        Outstanding {
            deadline,
            reply: reply_tx,
        },
    );

    debug!(server = %shared.server_id, %id, method = %method, "sending request");
    if outbound.send(line).await.is_err() {
        shared.outstanding.remove(&id);
        return Err(InvokeError::Closed(shared.server_id.clone()));
    }

    tokio::select! {
        reply = reply_rx => match reply {
            Ok(response) => codec::into_result(response).map_err(|error| InvokeError::Rpc {
                server: shared.server_id.clone(),
                error,
            }),
            // The reader drops replies that arrive after their deadline.
            Err(_) if Instant::now() >= deadline => Err(timeout_error(shared, timeout)),
            Err(_) => Err(InvokeError::Closed(shared.server_id.clone())),
        },
        () = tokio::time::sleep_until(deadline) => {
            abandon(shared, outbound, &id, "timeout").await;
            Err(timeout_error(shared, timeout))
        }
        () = cancelled(cancel) => {
            abandon(shared, outbound, &id, "run cancelled").await;
            Err(InvokeError::Cancelled)
        }
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

fn timeout_error(shared: &Shared, timeout: Duration) -> InvokeError {
    InvokeError::Timeout {
        server: shared.server_id.clone(),
        secs: timeout.as_secs(),
    }
}

/// Forget an outstanding request and tell the server to stop working on it.
async fn abandon(shared: &Shared, outbound: &mpsc::Sender<String>, id: &RequestId, reason: &str) {
    if shared.outstanding.remove(id).is_none() {
        return;
    }
    debug!(server = %shared.server_id, %id, reason, "abandoning request");
    if let Ok(line) = codec::encode(&codec::cancelled_notification(id.clone(), reason)) {
        if outbound.send(line).await.is_err() {
            debug!(server = %shared.server_id, %id, "connection closed before cancel notification");
        }
    }
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

async fn read_loop(
    shared: Arc<Shared>,
    mut inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
) {
    while let Some(text) = inbound.recv().await {
        match codec::decode(&text) {
            Ok(Incoming::Response(response)) => route_response(&shared, response),
            Ok(Incoming::Request(request)) => {
                answer_server_request(&shared, &outbound, request).await;
            }
            Ok(Incoming::Notification(notification)) => {
                debug!(server = %shared.server_id, method = %notification.method, "server notification");
            }
            Err(e) => {
                warn!(server = %shared.server_id, error = %e, "discarding malformed message");
            }
        }
    }

    shared.close();
    let abandoned = shared.outstanding.len();
    // Dropping the reply senders fails every waiting caller.
    shared.outstanding.clear();
    info!(server = %shared.server_id, abandoned, "tool server connection closed");
}

fn route_response(shared: &Shared, response: JsonRpcResponse) {
    let Some(id) = response.id.clone() else {
        warn!(server = %shared.server_id, error = ?response.error, "response without id");
        return;
    };
    match shared.outstanding.remove(&id) {
        Some((_, pending)) if Instant::now() >= pending.deadline => {
            debug!(server = %shared.server_id, %id, "discarding response that arrived after its deadline");
        }
        Some((_, pending)) => {
            if pending.reply.send(response).is_err() {
                debug!(server = %shared.server_id, %id, "caller stopped waiting");
            }
        }
        None => {
            debug!(server = %shared.server_id, %id, "discarding response for unknown or abandoned request");
        }
    }
}

async fn answer_server_request(
    shared: &Shared,
    outbound: &mpsc::Sender<String>,
    request: JsonRpcRequest,
) {
    let response = if request.method == methods::PING {
        JsonRpcResponse::success(request.id, json!({}))
    } else {
        debug!(server = %shared.server_id, method = %request.method, "rejecting server request");
        JsonRpcResponse::failure(
            Some(request.id),
            ErrorObject::new(
                ErrorCode::MethodNotFound,
                format!("method not found: {}", request.method),
            ),
        )
    };
    match codec::encode(&response) {
        Ok(line) => {
            if outbound.send(line).await.is_err() {
                debug!(server = %shared.server_id, "connection closed before reply");
            }
        }
        Err(e) => warn!(server = %shared.server_id, error = %e, "failed to encode reply"),
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Registry of tool-server sessions, passed by reference to whoever needs
/// to call tools. Lives as long as its owner.
pub struct SessionManager<C: Connector> {
    connector: C,
    servers: BTreeMap<String, ServerConfig>,
    client: ClientConfig,
    sessions: DashMap<String, Arc<Session>>,
    retained: Mutex<HashMap<String, usize>>,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(
        connector: C,
        servers: BTreeMap<String, ServerConfig>,
        client: ClientConfig,
    ) -> Self {
        Self {
            connector,
            servers,
            client,
            sessions: DashMap::new(),
            retained: Mutex::new(HashMap::new()),
        }
    }

    /// Configured server ids.
    pub fn server_ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn has_server(&self, server_id: &str) -> bool {
        self.servers.contains_key(server_id)
    }

    /// Current state of a server's session, if one exists.
    pub fn state(&self, server_id: &str) -> Option<SessionState> {
        self.sessions.get(server_id).map(|s| s.state())
    }

    /// The live session for `server_id`, creating or replacing it as needed.
    fn session(&self, server_id: &str) -> Result<Arc<Session>, InvokeError> {
        let config = self
            .servers
            .get(server_id)
            .ok_or_else(|| InvokeError::UnknownServer(server_id.to_string()))?;

        let mut entry = self
            .sessions
            .entry(server_id.to_string())
            .or_insert_with(|| Arc::new(Session::new(server_id, config.clone())));
        if entry.state() == SessionState::Closed {
            debug!(server = server_id, "replacing closed session");
            *entry = Arc::new(Session::new(server_id, config.clone()));
        }
        Ok(Arc::clone(entry.value()))
    }

    /// Handshake with `server_id` (if not already done) and return what the
    /// server reported about itself.
    pub async fn handshake(&self, server_id: &str) -> Result<InitializeResult, InvokeError> {
        let session = self.session(server_id)?;
        let link = session.link(&self.connector, &self.client).await?;
        Ok(link.info.clone())
    }

    /// Every tool the server advertises, following pagination cursors.
    pub async fn list_tools(
        &self,
        server_id: &str,
        timeout: Duration,
    ) -> Result<Vec<Tool>, InvokeError> {
        let session = self.session(server_id)?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let result = session
                .request(
                    &self.connector,
                    &self.client,
                    |id| codec::list_tools_request(id, cursor.as_deref()),
                    timeout,
                    None,
                )
                .await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| ProtocolError::InvalidPayload {
                    method: methods::TOOLS_LIST.to_string(),
                    reason: e.to_string(),
                })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Drop a server's session. In-flight calls keep their connection until
    /// they finish; the next call opens a fresh session.
    pub fn retire(&self, server_id: &str) {
        if self.sessions.remove(server_id).is_some() {
            debug!(server = server_id, "session retired");
        }
    }

    /// Retire every session.
    pub fn close_all(&self) {
        let count = self.sessions.len();
        self.sessions.clear();
        if count > 0 {
            info!(sessions = count, "closed all tool server sessions");
        }
    }
}

impl<C: Connector> ToolInvoker for SessionManager<C> {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Value, InvokeError> {
        let session = self.session(server)?;
        let result = session
            .request(
                &self.connector,
                &self.client,
                |id| codec::call_tool_request(id, tool, arguments),
                timeout,
                Some(&cancel),
            )
            .await?;
        codec::tool_output(result).map_err(|message| InvokeError::Tool {
            tool: tool.to_string(),
            message,
        })
    }

    fn retain(&self, servers: &[String]) {
        let mut counts = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
        for server in servers {
            *counts.entry(server.clone()).or_insert(0) += 1;
        }
    }

    fn release(&self, servers: &[String]) {
        let mut counts = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
        for server in servers {
            let Some(count) = counts.get_mut(server) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(server);
                self.retire(server);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
