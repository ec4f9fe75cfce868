//! Connection Manager (4.B): tracks WebSocket/HTTP/CLI connections with
//! kind/session/user secondary indices, a per-session connection cap, an
//! idle reaper and a liveness probe.
//!
//! Grounded on `original_source/backend/icpy/core/connection_manager.py`
//! (`ConnectionPool`/`ConnectionManager`).

use crate::broker::{MessageBroker, MessageType};
use futures::future::BoxFuture;
use icpy_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    WebSocket,
    Http,
    Cli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Authenticated,
    Disconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    fn accepts_sends(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Authenticated)
    }
}

/// Abstraction over "send this payload to the peer", implemented by the
/// WebSocket API for real sockets and by a no-op/in-memory sink in tests.
pub trait ConnectionSink: Send + Sync {
    fn send(&self, payload: Value) -> BoxFuture<'_, Result<()>>;
}

struct ConnectionEntry {
    id: u64,
    kind: ConnectionKind,
    state: ConnectionState,
    session_id: Option<String>,
    user_id: Option<String>,
    created_at: Instant,
    last_activity: Instant,
    sink: Option<Arc<dyn ConnectionSink>>,
    ping_failures: u32,
}

#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    pub max_connections_per_user: usize,
    pub connection_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: 50,
            connection_timeout: Duration::from_secs(300),
            ping_interval: Duration::from_secs(30),
        }
    }
}

struct Indices {
    by_kind: HashMap<ConnectionKind, HashSet<u64>>,
    by_session: HashMap<String, HashSet<u64>>,
    by_user: HashMap<String, HashSet<u64>>,
}

impl Indices {
    fn new() -> Self {
        Self {
            by_kind: HashMap::new(),
            by_session: HashMap::new(),
            by_user: HashMap::new(),
        }
    }

    fn insert(&mut self, e: &ConnectionEntry) {
        self.by_kind.entry(e.kind).or_default().insert(e.id);
        if let Some(s) = &e.session_id {
            self.by_session.entry(s.clone()).or_default().insert(e.id);
        }
        if let Some(u) = &e.user_id {
            self.by_user.entry(u.clone()).or_default().insert(e.id);
        }
    }

    fn remove(&mut self, e: &ConnectionEntry) {
        if let Some(set) = self.by_kind.get_mut(&e.kind) {
            set.remove(&e.id);
        }
        if let Some(s) = &e.session_id {
            if let Some(set) = self.by_session.get_mut(s) {
                set.remove(&e.id);
            }
        }
        if let Some(u) = &e.user_id {
            if let Some(set) = self.by_user.get_mut(u) {
                set.remove(&e.id);
            }
        }
    }
}

struct Inner {
    connections: HashMap<u64, ConnectionEntry>,
    indices: Indices,
}

pub struct ConnectionManager {
    inner: Arc<Mutex<Inner>>,
    broker: MessageBroker,
    config: ConnectionManagerConfig,
    next_id: Arc<AtomicU64>,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ConnectionManager {
    pub fn new(broker: MessageBroker, config: ConnectionManagerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                connections: HashMap::new(),
                indices: Indices::new(),
            })),
            broker,
            config,
            next_id: Arc::new(AtomicU64::new(1)),
            background: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn emit(&self, topic: &str, payload: Value) {
        let _ = self
            .broker
            .publish(topic.to_string(), payload, MessageType::Notification, None, None, None, None)
            .await;
    }

    async fn register(
        &self,
        kind: ConnectionKind,
        session_id: Option<String>,
        user_id: Option<String>,
        sink: Option<Arc<dyn ConnectionSink>>,
    ) -> Result<u64> {
        if let Some(user_id) = &user_id {
            let state = self.inner.lock().await;
            let count = state
                .indices
                .by_user
                .get(user_id)
                .map(|s| s.len())
                .unwrap_or(0);
            if count >= self.config.max_connections_per_user {
                return Err(Error::ConnectionLimitExceeded(format!(
                    "user {} already has {} connections",
                    user_id, count
                )));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let entry = ConnectionEntry {
            id,
            kind,
            state: ConnectionState::Connected,
            session_id,
            user_id,
            created_at: now,
            last_activity: now,
            sink,
            ping_failures: 0,
        };
        {
            let mut state = self.inner.lock().await;
            state.indices.insert(&entry);
            state.connections.insert(id, entry);
        }
        self.emit(
            "connection.established",
            json!({"connection_id": id, "kind": format!("{:?}", kind).to_lowercase()}),
        )
        .await;
        Ok(id)
    }

    pub async fn connect_websocket(
        &self,
        session_id: Option<String>,
        user_id: Option<String>,
        sink: Arc<dyn ConnectionSink>,
    ) -> Result<u64> {
        self.register(ConnectionKind::WebSocket, session_id, user_id, Some(sink))
            .await
    }

    pub async fn connect_http(
        &self,
        session_id: Option<String>,
        user_id: Option<String>,
    ) -> Result<u64> {
        self.register(ConnectionKind::Http, session_id, user_id, None).await
    }

    pub async fn connect_cli(&self, user_id: Option<String>) -> Result<u64> {
        self.register(ConnectionKind::Cli, None, user_id, None).await
    }

    pub async fn authenticate(&self, id: u64, user_id: impl Into<String>) -> Result<()> {
        let user_id = user_id.into();
        let mut state = self.inner.lock().await;
        let entry = state
            .connections
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
        state.indices.remove(entry);
        entry.user_id = Some(user_id);
        entry.state = ConnectionState::Authenticated;
        entry.last_activity = Instant::now();
        state.indices.insert(entry);
        drop(state);
        self.emit("connection.authenticated", json!({"connection_id": id}))
            .await;
        Ok(())
    }

    pub async fn update_activity(&self, id: u64) {
        if let Some(entry) = self.inner.lock().await.connections.get_mut(&id) {
            entry.last_activity = Instant::now();
        }
    }

    pub async fn send_message(&self, id: u64, payload: Value) -> Result<()> {
        let sink = {
            let state = self.inner.lock().await;
            let entry = state
                .connections
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
            if !entry.state.accepts_sends() {
                return Err(Error::InvalidRequest("connection not accepting sends".into()));
            }
            entry.sink.clone()
        };
        match sink {
            Some(sink) => sink.send(payload).await,
            None => Ok(()),
        }
    }

    pub async fn broadcast(&self, payload: Value, filter: impl Fn(&ConnectionSnapshot) -> bool) {
        let targets: Vec<(u64, Arc<dyn ConnectionSink>)> = {
            let state = self.inner.lock().await;
            state
                .connections
                .values()
                .filter(|e| e.state.accepts_sends())
                .filter(|e| filter(&ConnectionSnapshot::from(*e)))
                .filter_map(|e| e.sink.clone().map(|s| (e.id, s)))
                .collect()
        };
        for (_, sink) in targets {
            let _ = sink.send(payload.clone()).await;
        }
    }

    pub async fn disconnect(&self, id: u64, reason: &str) {
        let entry = {
            let mut state = self.inner.lock().await;
            if let Some(entry) = state.connections.get_mut(&id) {
                entry.state = ConnectionState::Disconnecting;
            }
            state.connections.remove(&id).map(|e| {
                state.indices.remove(&e);
                e
            })
        };
        if entry.is_some() {
            self.emit(
                "connection.disconnecting",
                json!({"connection_id": id, "reason": reason}),
            )
            .await;
            self.emit("connection.disconnected", json!({"connection_id": id}))
                .await;
        }
    }

    pub async fn get_connection(&self, id: u64) -> Option<ConnectionSnapshot> {
        self.inner
            .lock()
            .await
            .connections
            .get(&id)
            .map(ConnectionSnapshot::from)
    }

    pub async fn get_connections_by_session(&self, session_id: &str) -> Vec<u64> {
        let state = self.inner.lock().await;
        state
            .indices
            .by_session
            .get(session_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn get_stats(&self) -> HashMap<String, Value> {
        let state = self.inner.lock().await;
        let mut stats = HashMap::new();
        stats.insert("total".into(), Value::from(state.connections.len()));
        for (kind, set) in &state.indices.by_kind {
            stats.insert(format!("{:?}", kind).to_lowercase(), Value::from(set.len()));
        }
        stats
    }

    /// invariant check: every connection id appears in exactly the expected indices.
    #[cfg(test)]
    async fn assert_index_integrity(&self) {
        let state = self.inner.lock().await;
        for (id, entry) in &state.connections {
            assert!(state.indices.by_kind.get(&entry.kind).unwrap().contains(id));
            if let Some(s) = &entry.session_id {
                assert!(state.indices.by_session.get(s).unwrap().contains(id));
            }
            if let Some(u) = &entry.user_id {
                assert!(state.indices.by_user.get(u).unwrap().contains(id));
            }
        }
    }

    /// Start the idle reaper and liveness probe background loops. Idempotent
    /// across repeated calls within the same manager instance is not
    /// guaranteed; call once at wiring time.
    pub fn start(self: &Arc<Self>) {
        let reaper_mgr = self.clone();
        let reaper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                reaper_mgr.reap_idle().await;
            }
        });

        let probe_mgr = self.clone();
        let interval = self.config.ping_interval;
        let prober = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                probe_mgr.probe_liveness().await;
            }
        });

        // background handles are fire-and-forget for the manager's lifetime;
        // stored so the manager could cancel them on an explicit shutdown.
        let background = self.background.clone();
        tokio::spawn(async move {
            background.lock().await.extend([reaper, prober]);
        });
    }

    async fn reap_idle(&self) {
        let timeout = self.config.connection_timeout;
        let stale: Vec<u64> = {
            let state = self.inner.lock().await;
            state
                .connections
                .values()
                .filter(|e| e.last_activity.elapsed() > timeout)
                .map(|e| e.id)
                .collect()
        };
        for id in stale {
            self.disconnect(id, "Connection timeout").await;
        }
    }

    async fn probe_liveness(&self) {
        let targets: Vec<(u64, Arc<dyn ConnectionSink>)> = {
            let state = self.inner.lock().await;
            state
                .connections
                .values()
                .filter(|e| e.kind == ConnectionKind::WebSocket)
                .filter_map(|e| e.sink.clone().map(|s| (e.id, s)))
                .collect()
        };
        for (id, sink) in targets {
            if sink.send(json!({"type": "ping"})).await.is_err() {
                self.disconnect(id, "Ping failed").await;
            }
        }
    }
}

/// Read-only snapshot of a connection, safe to hand out without holding the lock.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: u64,
    pub kind: ConnectionKind,
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl From<&ConnectionEntry> for ConnectionSnapshot {
    fn from(e: &ConnectionEntry) -> Self {
        Self {
            id: e.id,
            kind: e.kind,
            state: e.state,
            session_id: e.session_id.clone(),
            user_id: e.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;

    struct NullSink;
    impl ConnectionSink for NullSink {
        fn send(&self, _payload: Value) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn index_integrity_after_connect_auth_disconnect() {
        let broker = MessageBroker::new(BrokerConfig::default());
        let mgr = ConnectionManager::new(broker, ConnectionManagerConfig::default());
        let id = mgr
            .connect_websocket(Some("sess1".into()), None, Arc::new(NullSink))
            .await
            .unwrap();
        mgr.authenticate(id, "alice").await.unwrap();
        mgr.assert_index_integrity().await;
        mgr.disconnect(id, "done").await;
        assert!(mgr.get_connection(id).await.is_none());
    }

    #[tokio::test]
    async fn per_user_connection_cap() {
        let broker = MessageBroker::new(BrokerConfig::default());
        let mut cfg = ConnectionManagerConfig::default();
        cfg.max_connections_per_user = 1;
        let mgr = ConnectionManager::new(broker, cfg);
        mgr.connect_http(None, Some("bob".into())).await.unwrap();
        let second = mgr.connect_http(None, Some("bob".into())).await;
        assert!(matches!(second, Err(Error::ConnectionLimitExceeded(_))));
    }
}
