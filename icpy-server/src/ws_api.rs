//! WebSocket API (4.E): per-connection subscription state, replay-on-reconnect,
//! and JSON-RPC-over-WebSocket framing, layered on top of the Connection
//! Manager.
//!
//! Grounded on `original_source/backend/icpy/api/websocket_api.py`
//! (`WebSocketAPI.handle_websocket_message`/`_handle_*`/`_broadcast_to_subscribers`).
//! Topic matching is symmetric (subscription-matches-topic OR
//! topic-matches-subscription) the way `_matches_pattern` in the original
//! tries both directions, so a client subscribed to a concrete topic still
//! receives messages published under a wildcard matching it.

use crate::broker::{Message, MessageBroker, MessageType};
use crate::conn_manager::{ConnectionManager, ConnectionSink};
use crate::router::Router;
use crate::shell_glob;
use futures::future::BoxFuture;
use icpy_core::{JsonRpcRequest, JsonRpcResponse, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Broker topics the WS API forwards to subscribed clients as events.
const FORWARDED_TOPICS: &[&str] = &["fs.*", "terminal.*", "workspace.*", "agents.*", "hop.*", "scm.*", "ws.*"];

/// Default subscriptions applied on connect so clients that miss their
/// first `subscribe` frame still see filesystem and hop state changes.
const DEFAULT_SUBSCRIPTIONS: &[&str] = &["fs.*", "hop.*"];

/// Seam for `execute`/`execute_streaming`/`preview` frames: the spec treats
/// the execution/preview spawner as an external collaborator out of scope
/// here, so the WS API only defines the frame contract and forwards to
/// whatever sink the wiring container supplies.
pub trait ExecutionSink: Send + Sync {
    fn execute(&self, connection_id: u64, params: Value) -> BoxFuture<'_, Result<Value>>;
    fn execute_streaming(
        &self,
        connection_id: u64,
        params: Value,
        sink: Arc<dyn ConnectionSink>,
    ) -> BoxFuture<'_, Result<()>>;
    fn preview(&self, connection_id: u64, params: Value) -> BoxFuture<'_, Result<Value>>;
}

struct WsConnState {
    session_id: Option<String>,
    subscriptions: HashSet<String>,
    sink: Arc<dyn ConnectionSink>,
}

#[derive(Default)]
struct Stats {
    total_connections: u64,
    messages_sent: u64,
    messages_received: u64,
    authentication_attempts: u64,
    authentication_successes: u64,
}

pub struct WsApiConfig {
    pub max_history: usize,
    pub heartbeat_interval: Duration,
    /// Idle timeout applied to WebSocket connections. The Connection
    /// Manager's own reaper enforces this (see `Fabric::build`, which
    /// builds its `ConnectionManagerConfig` from this value) since WS is
    /// the only connection kind this fabric actually wires up; kept here
    /// rather than on `ConnectionManagerConfig` so WS-specific defaults
    /// don't leak into that type's generic 300s default.
    pub connection_timeout: Duration,
}

impl Default for WsApiConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(3600),
        }
    }
}

pub struct WsApi {
    connections: Mutex<HashMap<u64, WsConnState>>,
    history: Mutex<HashMap<String, VecDeque<Value>>>,
    stats: Mutex<Stats>,
    manager: Arc<ConnectionManager>,
    broker: MessageBroker,
    router: Router,
    execution: Option<Arc<dyn ExecutionSink>>,
    config: WsApiConfig,
}

/// Tries both directions: pattern matching topic, and topic matching
/// pattern, so a concrete subscription like `fs.file_created` still
/// receives events published under `fs.*`, and vice versa.
fn patterns_intersect(subscription: &str, topic: &str) -> bool {
    shell_glob::matches(subscription, topic) || shell_glob::matches(topic, subscription)
}

impl WsApi {
    pub fn new(
        manager: Arc<ConnectionManager>,
        broker: MessageBroker,
        router: Router,
        execution: Option<Arc<dyn ExecutionSink>>,
        config: WsApiConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            stats: Mutex::new(Stats::default()),
            manager,
            broker,
            router,
            execution,
            config,
        })
    }

    /// Subscribe to broker forwarding topics and start the idle-reaper and
    /// heartbeat background tasks. Call once after construction.
    pub async fn start(self: &Arc<Self>) {
        for topic in FORWARDED_TOPICS {
            let api = self.clone();
            let topic_owned = topic.to_string();
            self.broker
                .subscribe(
                    "ws_api",
                    *topic,
                    Arc::new(move |msg: Arc<Message>| {
                        let api = api.clone();
                        Box::pin(async move {
                            api.broadcast_to_subscribers(&msg).await;
                        })
                    }),
                    None,
                )
                .await;
            tracing::debug!(topic = %topic_owned, "ws api subscribed to broker topic");
        }

        // The Connection Manager owns the idle-reaper timer and emits
        // `connection.disconnected`; the WS API just needs to drop its own
        // per-connection subscription/history state when that fires.
        let cleanup = self.clone();
        self.broker
            .subscribe(
                "ws_api",
                "connection.disconnected",
                Arc::new(move |msg: Arc<Message>| {
                    let cleanup = cleanup.clone();
                    Box::pin(async move {
                        if let Some(id) = msg.payload.get("connection_id").and_then(Value::as_u64) {
                            cleanup.connections.lock().await.remove(&id);
                        }
                    })
                }),
                None,
            )
            .await;

        let heartbeat = self.clone();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                heartbeat.send_heartbeats().await;
            }
        });
    }

    async fn emit(&self, topic: &str, payload: Value) {
        let _ = self
            .broker
            .publish(topic.to_string(), payload, MessageType::Notification, None, None, None, None)
            .await;
    }

    /// Register a newly-accepted WebSocket connection: seed default
    /// subscriptions, send the `welcome` frame, and replay history if the
    /// session already has one.
    pub async fn connect(
        self: &Arc<Self>,
        sink: Arc<dyn ConnectionSink>,
        session_id: Option<String>,
        user_id: Option<String>,
    ) -> Result<u64> {
        let id = self
            .manager
            .connect_websocket(session_id.clone(), user_id.clone(), sink.clone())
            .await?;

        self.connections.lock().await.insert(
            id,
            WsConnState {
                session_id: session_id.clone(),
                subscriptions: DEFAULT_SUBSCRIPTIONS.iter().map(|s| s.to_string()).collect(),
                sink,
            },
        );
        self.stats.lock().await.total_connections += 1;

        self.send_frame(
            id,
            json!({
                "type": "welcome",
                "connection_id": id,
                "session_id": session_id,
                "user_id": user_id,
            }),
        )
        .await;

        if let Some(session_id) = session_id.as_deref() {
            self.replay(id, session_id).await;
        }

        self.emit(
            "websocket.connection_established",
            json!({"connection_id": id, "session_id": session_id, "user_id": user_id}),
        )
        .await;
        Ok(id)
    }

    pub async fn disconnect(&self, id: u64) {
        self.connections.lock().await.remove(&id);
        self.manager.disconnect(id, "client disconnected").await;
    }

    async fn send_frame(&self, id: u64, frame: Value) {
        let sink = {
            let state = self.connections.lock().await;
            state.get(&id).map(|s| s.sink.clone())
        };
        let Some(sink) = sink else { return };
        if sink.send(frame.clone()).await.is_err() {
            self.disconnect(id).await;
            return;
        }
        self.stats.lock().await.messages_sent += 1;

        let session_id = self.connections.lock().await.get(&id).and_then(|s| s.session_id.clone());
        if let Some(session_id) = session_id {
            let mut history = self.history.lock().await;
            let deque = history.entry(session_id).or_insert_with(VecDeque::new);
            deque.push_back(frame);
            if deque.len() > self.config.max_history {
                deque.pop_front();
            }
        }
    }

    async fn send_error(&self, id: u64, message: impl Into<String>) {
        self.send_frame(id, json!({"type": "error", "message": message.into()})).await;
    }

    async fn replay(&self, id: u64, session_id: &str) {
        let frames: Vec<Value> = {
            let history = self.history.lock().await;
            history.get(session_id).map(|d| d.iter().cloned().collect()).unwrap_or_default()
        };
        if frames.is_empty() {
            return;
        }
        let sink = {
            let state = self.connections.lock().await;
            state.get(&id).map(|s| s.sink.clone())
        };
        if let Some(sink) = sink {
            let _ = sink.send(json!({"type": "message_replay", "messages": frames})).await;
        }
    }

    /// Dispatch an inbound text frame. Invalid JSON and handler failures
    /// produce an `error` frame but keep the connection open; only a failed
    /// socket send closes it (handled inside `send_frame`).
    pub async fn handle_message(self: &Arc<Self>, id: u64, raw: &str) {
        self.manager.update_activity(id).await;
        self.stats.lock().await.messages_received += 1;

        let data: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => {
                self.send_error(id, "Invalid JSON format").await;
                return;
            }
        };

        let message_type = data.get("type").and_then(Value::as_str).unwrap_or("unknown");
        match message_type {
            "ping" => self.send_frame(id, json!({"type": "pong"})).await,
            "subscribe" => self.handle_subscribe(id, &data).await,
            "unsubscribe" => self.handle_unsubscribe(id, &data).await,
            "jsonrpc" | "json-rpc" => self.handle_jsonrpc(id, &data).await,
            "authenticate" => self.handle_authenticate(id, &data).await,
            "execute" => self.handle_execute(id, &data).await,
            "execute_streaming" => self.handle_execute_streaming(id, &data).await,
            "preview" => self.handle_preview(id, &data).await,
            _ => {
                self.send_frame(id, json!({"type": "unhandled", "received": data})).await;
            }
        }
    }

    fn extract_topics(data: &Value) -> Vec<String> {
        match data.get("topics") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
            _ => Vec::new(),
        }
    }

    async fn handle_subscribe(&self, id: u64, data: &Value) {
        let topics = Self::extract_topics(data);
        if let Some(state) = self.connections.lock().await.get_mut(&id) {
            for topic in &topics {
                state.subscriptions.insert(topic.clone());
            }
        }
        self.send_frame(id, json!({"type": "subscribed", "topics": topics})).await;
    }

    async fn handle_unsubscribe(&self, id: u64, data: &Value) {
        let topics = Self::extract_topics(data);
        if let Some(state) = self.connections.lock().await.get_mut(&id) {
            for topic in &topics {
                state.subscriptions.remove(topic);
            }
        }
        self.send_frame(id, json!({"type": "unsubscribed", "topics": topics})).await;
    }

    async fn handle_jsonrpc(&self, id: u64, data: &Value) {
        let issued_at = std::time::Instant::now();
        let request_value = data.get("request").or(data.get("payload")).cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(request_value) {
            Ok(r) => r,
            Err(e) => {
                self.send_error(id, format!("Invalid JSON-RPC message: {e}")).await;
                return;
            }
        };

        // A `timeout` past its deadline by the time we get around to routing
        // it (e.g. queued behind other frames) is answered with -32006
        // rather than dispatched to a handler that may no longer have a
        // caller waiting on it.
        if request.is_expired(issued_at) {
            let response = JsonRpcResponse::error(
                icpy_core::Error::Timeout.to_json_rpc_error_data(),
                request.id,
            );
            self.send_frame(id, json!({"type": "jsonrpc_response", "response": response})).await;
            return;
        }

        let response = match self.router.route_with_conn_id(&request.method, request.params, id).await {
            Ok(result) => JsonRpcResponse::success(result, request.id),
            Err(e) => JsonRpcResponse::error(e.to_json_rpc_error_data(), request.id.clone()),
        };

        self.send_frame(id, json!({"type": "jsonrpc_response", "response": response})).await;
    }

    async fn handle_authenticate(&self, id: u64, data: &Value) {
        self.stats.lock().await.authentication_attempts += 1;
        let user_id = data.get("user_id").and_then(Value::as_str).map(String::from);
        let session_id = data.get("session_id").and_then(Value::as_str).map(String::from);

        let (Some(user_id), Some(session_id)) = (user_id, session_id) else {
            self.send_error(id, "authenticate requires user_id and session_id").await;
            return;
        };

        if self.manager.authenticate(id, user_id.clone()).await.is_err() {
            self.send_error(id, "connection not found").await;
            return;
        }
        if let Some(state) = self.connections.lock().await.get_mut(&id) {
            state.session_id = Some(session_id.clone());
        }
        self.stats.lock().await.authentication_successes += 1;
        self.send_frame(id, json!({"type": "authenticated", "user_id": user_id, "session_id": session_id}))
            .await;
        self.replay(id, &session_id).await;
    }

    async fn handle_execute(&self, id: u64, data: &Value) {
        let Some(execution) = &self.execution else {
            self.send_error(id, "execution is not configured").await;
            return;
        };
        let params = data.get("params").cloned().unwrap_or(Value::Null);
        match execution.execute(id, params).await {
            Ok(result) => self.send_frame(id, json!({"type": "execution_update", "result": result})).await,
            Err(e) => self.send_error(id, e.to_string()).await,
        }
    }

    async fn handle_execute_streaming(&self, id: u64, data: &Value) {
        let Some(execution) = &self.execution else {
            self.send_error(id, "execution is not configured").await;
            return;
        };
        let sink = {
            let state = self.connections.lock().await;
            state.get(&id).map(|s| s.sink.clone())
        };
        let Some(sink) = sink else { return };
        let params = data.get("params").cloned().unwrap_or(Value::Null);
        if let Err(e) = execution.execute_streaming(id, params, sink).await {
            self.send_error(id, e.to_string()).await;
        }
    }

    async fn handle_preview(&self, id: u64, data: &Value) {
        let Some(execution) = &self.execution else {
            self.send_error(id, "execution is not configured").await;
            return;
        };
        let params = data.get("params").cloned().unwrap_or(Value::Null);
        match execution.preview(id, params).await {
            Ok(result) => self.send_frame(id, json!({"type": "preview", "result": result})).await,
            Err(e) => self.send_error(id, e.to_string()).await,
        }
    }

    async fn broadcast_to_subscribers(&self, message: &Message) {
        let targets: Vec<u64> = {
            let state = self.connections.lock().await;
            state
                .iter()
                .filter(|(_, s)| s.subscriptions.iter().any(|p| patterns_intersect(p, &message.topic)))
                .map(|(id, _)| *id)
                .collect()
        };
        let frame = json!({
            "type": "event",
            "event": message.topic,
            "data": message.payload,
            "timestamp": message.timestamp,
        });
        for id in targets {
            self.send_frame(id, frame.clone()).await;
        }
    }

    async fn send_heartbeats(&self) {
        let ids: Vec<u64> = self.connections.lock().await.keys().copied().collect();
        for id in ids {
            self.send_frame(id, json!({"type": "heartbeat"})).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::conn_manager::ConnectionManagerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSink {
        count: Arc<AtomicUsize>,
    }

    impl ConnectionSink for RecordingSink {
        fn send(&self, _payload: Value) -> BoxFuture<'_, Result<()>> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn build_api() -> Arc<WsApi> {
        let broker = MessageBroker::new(BrokerConfig::default());
        let manager = Arc::new(ConnectionManager::new(broker.clone(), ConnectionManagerConfig::default()));
        WsApi::new(manager, broker, Router::new(), None, WsApiConfig::default())
    }

    #[tokio::test]
    async fn connect_seeds_default_subscriptions_and_sends_welcome() {
        let api = build_api();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(RecordingSink { count: count.clone() });
        let id = api.connect(sink, Some("sess-1".into()), None).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let subs = api.connections.lock().await.get(&id).unwrap().subscriptions.clone();
        assert!(subs.contains("fs.*"));
        assert!(subs.contains("hop.*"));
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_update_interest_set() {
        let api = build_api();
        let sink = Arc::new(RecordingSink { count: Arc::new(AtomicUsize::new(0)) });
        let id = api.connect(sink, None, None).await.unwrap();

        api.handle_subscribe(id, &json!({"topics": "terminal.output"})).await;
        assert!(api.connections.lock().await.get(&id).unwrap().subscriptions.contains("terminal.output"));

        api.handle_unsubscribe(id, &json!({"topics": ["terminal.output"]})).await;
        assert!(!api.connections.lock().await.get(&id).unwrap().subscriptions.contains("terminal.output"));
    }

    #[test]
    fn patterns_intersect_is_symmetric() {
        assert!(patterns_intersect("fs.*", "fs.file_created"));
        assert!(patterns_intersect("fs.file_created", "fs.*"));
        assert!(!patterns_intersect("fs.*", "terminal.output"));
    }
}
