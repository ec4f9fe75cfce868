//! Event Broadcaster (4.C): client interest registration, priority-queued
//! delivery, and bounded history with per-client replay cursors.
//!
//! Grounded on `original_source/backend/icpy/core/event_broadcaster.py`.
//! Topic interests use the same shell-glob matching as the Message Broker
//! (see `shell_glob.rs` and DESIGN.md).

use crate::conn_manager::ConnectionSink;
use crate::shell_glob;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

const PRIORITIES: [Priority; 4] = [Priority::Low, Priority::Normal, Priority::High, Priority::Urgent];

/// Composed match rule for `DeliveryMode::Filtered`. Exclusions beat
/// inclusions; a non-empty inclusion set is restrictive; the kind and
/// permission checks are intersective (any shared membership passes);
/// `topic_patterns` is a disjunction; `predicate` is the final gate run
/// after every other check passes.
#[derive(Clone, Default)]
pub struct FilterConfig {
    pub include_client_kinds: HashSet<String>,
    pub exclude_client_kinds: HashSet<String>,
    pub include_permissions: HashSet<String>,
    pub exclude_permissions: HashSet<String>,
    pub topic_patterns: Vec<String>,
    pub predicate: Option<Arc<dyn Fn(&ClientInterest, &Value) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for FilterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterConfig")
            .field("include_client_kinds", &self.include_client_kinds)
            .field("exclude_client_kinds", &self.exclude_client_kinds)
            .field("include_permissions", &self.include_permissions)
            .field("exclude_permissions", &self.exclude_permissions)
            .field("topic_patterns", &self.topic_patterns)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

fn filter_matches(filter: &FilterConfig, interest: &ClientInterest, topic: &str, payload: &Value) -> bool {
    if filter.exclude_client_kinds.contains(&interest.kind) {
        return false;
    }
    if !filter.exclude_permissions.is_disjoint(&interest.permissions) {
        return false;
    }
    if !filter.include_client_kinds.is_empty() && !filter.include_client_kinds.contains(&interest.kind) {
        return false;
    }
    if !filter.include_permissions.is_empty() && filter.include_permissions.is_disjoint(&interest.permissions) {
        return false;
    }
    if !filter.topic_patterns.is_empty() && !filter.topic_patterns.iter().any(|p| shell_glob::matches(p, topic)) {
        return false;
    }
    if let Some(predicate) = &filter.predicate {
        if !predicate(interest, payload) {
            return false;
        }
    }
    true
}

#[derive(Debug, Clone)]
pub enum DeliveryMode {
    /// Deliver to every client whose interest patterns match the topic.
    Broadcast,
    /// Deliver only to the listed client ids, regardless of their interests.
    Targeted(Vec<String>),
    /// Deliver to exactly one client id, regardless of its interests.
    Unicast(String),
    /// Clients whose interests match the topic AND whose kind/permissions
    /// pass `FilterConfig`.
    Filtered(FilterConfig),
}

#[derive(Debug, Clone)]
pub struct ClientInterest {
    pub client_id: String,
    pub patterns: HashSet<String>,
    pub kind: String,
    pub permissions: HashSet<String>,
    pub registered_at: Instant,
    pub last_touched: Instant,
}

#[derive(Clone)]
struct Event {
    seq: u64,
    topic: String,
    payload: Value,
}

struct QueuedEvent {
    seq: u64,
    topic: String,
    payload: Value,
    mode: DeliveryMode,
}

#[derive(Default)]
struct Counters {
    events_published: u64,
    events_delivered: u64,
    events_failed: u64,
}

struct Inner {
    interests: HashMap<String, ClientInterest>,
    sinks: HashMap<String, Arc<dyn ConnectionSink>>,
    history: VecDeque<Event>,
    cursors: HashMap<String, u64>,
    next_seq: u64,
    counters: Counters,
}

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub max_history: usize,
    pub interest_ttl: Duration,
    pub cleanup_interval: Duration,
    /// Per-client delivery bound; a client that doesn't ack within this
    /// window counts as a failed delivery rather than stalling the worker.
    pub delivery_timeout: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            interest_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot returned by [`EventBroadcaster::get_stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcasterStats {
    pub clients: usize,
    pub interests: usize,
    pub history_size: usize,
    pub events_published: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
}

/// Fan-out engine sitting between the Message Broker and per-connection
/// sinks, adding priority ordering, interest filtering, and replay.
pub struct EventBroadcaster {
    inner: Arc<Mutex<Inner>>,
    config: BroadcasterConfig,
    senders: HashMap<Priority, mpsc::Sender<QueuedEvent>>,
}

impl EventBroadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            interests: HashMap::new(),
            sinks: HashMap::new(),
            history: VecDeque::new(),
            cursors: HashMap::new(),
            next_seq: 1,
            counters: Counters::default(),
        }));

        let mut senders = HashMap::new();
        for priority in PRIORITIES {
            let (tx, mut rx) = mpsc::channel::<QueuedEvent>(1024);
            let worker_inner = inner.clone();
            let delivery_timeout = config.delivery_timeout;
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    deliver(&worker_inner, event, delivery_timeout).await;
                }
            });
            senders.insert(priority, tx);
        }

        Self { inner, config, senders }
    }

    pub async fn register_client(&self, client_id: impl Into<String>, sink: Arc<dyn ConnectionSink>) {
        let client_id = client_id.into();
        let mut state = self.inner.lock().await;
        let now = Instant::now();
        state.interests.insert(
            client_id.clone(),
            ClientInterest {
                client_id: client_id.clone(),
                patterns: HashSet::new(),
                kind: String::new(),
                permissions: HashSet::new(),
                registered_at: now,
                last_touched: now,
            },
        );
        let seq = state.next_seq;
        state.cursors.insert(client_id.clone(), seq.saturating_sub(1));
        state.sinks.insert(client_id, sink);
    }

    pub async fn deregister_client(&self, client_id: &str) {
        let mut state = self.inner.lock().await;
        state.interests.remove(client_id);
        state.sinks.remove(client_id);
        state.cursors.remove(client_id);
    }

    pub async fn add_interest(&self, client_id: &str, pattern: impl Into<String>) {
        let mut state = self.inner.lock().await;
        if let Some(interest) = state.interests.get_mut(client_id) {
            interest.patterns.insert(pattern.into());
            interest.last_touched = Instant::now();
        }
    }

    pub async fn remove_interest(&self, client_id: &str, pattern: &str) {
        let mut state = self.inner.lock().await;
        if let Some(interest) = state.interests.get_mut(client_id) {
            interest.patterns.remove(pattern);
            interest.last_touched = Instant::now();
        }
    }

    /// Registers (or augments) a client's interest: topic patterns plus the
    /// optional kind/permission metadata `DeliveryMode::Filtered` matches
    /// against. A no-op if the client hasn't called `register_client` yet.
    pub async fn register_client_interest(
        &self,
        client_id: &str,
        topic_patterns: Vec<String>,
        kind: Option<String>,
        permissions: HashSet<String>,
    ) {
        let mut state = self.inner.lock().await;
        if let Some(interest) = state.interests.get_mut(client_id) {
            interest.patterns.extend(topic_patterns);
            if let Some(kind) = kind {
                interest.kind = kind;
            }
            interest.permissions.extend(permissions);
            interest.last_touched = Instant::now();
        }
    }

    pub async fn unregister_client_interest(&self, client_id: &str, topic_patterns: &[String]) {
        let mut state = self.inner.lock().await;
        if let Some(interest) = state.interests.get_mut(client_id) {
            for pattern in topic_patterns {
                interest.patterns.remove(pattern);
            }
            interest.last_touched = Instant::now();
        }
    }

    /// Publish an event at the given priority and delivery mode. Returns
    /// the event's sequence number; actual delivery happens asynchronously
    /// on the priority's worker task.
    pub async fn broadcast_event(
        &self,
        topic: impl Into<String>,
        payload: Value,
        priority: Priority,
        mode: DeliveryMode,
    ) -> u64 {
        let topic = topic.into();
        let seq = {
            let mut state = self.inner.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.counters.events_published += 1;
            state.history.push_back(Event {
                seq,
                topic: topic.clone(),
                payload: payload.clone(),
            });
            if state.history.len() > self.config.max_history {
                state.history.pop_front();
            }
            seq
        };
        let tx = self.senders.get(&priority).expect("all priorities registered");
        let _ = tx.send(QueuedEvent { seq, topic, payload, mode }).await;
        seq
    }

    /// Events a client missed since its last delivered sequence number.
    pub async fn replay_missed(&self, client_id: &str) -> Vec<(String, Value)> {
        let state = self.inner.lock().await;
        let cursor = state.cursors.get(client_id).copied().unwrap_or(0);
        let interest = state.interests.get(client_id);
        state
            .history
            .iter()
            .filter(|e| e.seq > cursor)
            .filter(|e| {
                interest
                    .map(|i| i.patterns.iter().any(|p| shell_glob::matches(p, &e.topic)))
                    .unwrap_or(false)
            })
            .map(|e| (e.topic.clone(), e.payload.clone()))
            .collect()
    }

    /// Replays up to `max` events after `from_cursor` (or the client's
    /// current cursor) that still match the client's live interests,
    /// advancing its cursor. Returns the number of events replayed.
    pub async fn replay_events(&self, client_id: &str, from_cursor: Option<u64>, max: usize) -> usize {
        let mut state = self.inner.lock().await;
        let cursor = from_cursor.unwrap_or_else(|| state.cursors.get(client_id).copied().unwrap_or(0));
        let Some(sink) = state.sinks.get(client_id).cloned() else {
            return 0;
        };
        let interest = state.interests.get(client_id).cloned();
        let matching: Vec<Event> = state
            .history
            .iter()
            .filter(|e| e.seq > cursor)
            .filter(|e| {
                interest
                    .as_ref()
                    .map(|i| i.patterns.iter().any(|p| shell_glob::matches(p, &e.topic)))
                    .unwrap_or(false)
            })
            .take(max)
            .cloned()
            .collect();

        let mut delivered = 0;
        let mut last_seq = cursor;
        for event in &matching {
            let payload = serde_json::json!({"topic": event.topic, "data": event.payload});
            if sink.send(payload).await.is_ok() {
                delivered += 1;
                last_seq = event.seq;
            }
        }
        if let Some(c) = state.cursors.get_mut(client_id) {
            *c = last_seq;
        }
        delivered
    }

    pub async fn advance_cursor(&self, client_id: &str) {
        let mut state = self.inner.lock().await;
        let latest = state.next_seq.saturating_sub(1);
        if let Some(cursor) = state.cursors.get_mut(client_id) {
            *cursor = latest;
        }
    }

    pub async fn get_client_interests(&self, client_id: &str) -> Option<ClientInterest> {
        self.inner.lock().await.interests.get(client_id).cloned()
    }

    pub async fn get_event_history(&self, limit: Option<usize>) -> Vec<(String, Value)> {
        let state = self.inner.lock().await;
        let events = state.history.iter().map(|e| (e.topic.clone(), e.payload.clone()));
        match limit {
            Some(limit) if limit < state.history.len() => events.skip(state.history.len() - limit).collect(),
            _ => events.collect(),
        }
    }

    pub async fn get_stats(&self) -> BroadcasterStats {
        let state = self.inner.lock().await;
        BroadcasterStats {
            clients: state.sinks.len(),
            interests: state.interests.len(),
            history_size: state.history.len(),
            events_published: state.counters.events_published,
            events_delivered: state.counters.events_delivered,
            events_failed: state.counters.events_failed,
        }
    }

    pub fn start(self: &Arc<Self>) {
        let inner = self.inner.clone();
        let interval = self.config.cleanup_interval;
        let ttl = self.config.interest_ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut state = inner.lock().await;
                let stale: Vec<String> = state
                    .interests
                    .values()
                    .filter(|i| i.last_touched.elapsed() > ttl && !state.sinks.contains_key(&i.client_id))
                    .map(|i| i.client_id.clone())
                    .collect();
                for id in stale {
                    state.interests.remove(&id);
                    state.cursors.remove(&id);
                }
            }
        });
    }
}

/// Delivers one event to every matching client in parallel, each send
/// bounded by `delivery_timeout` so one slow or wedged client can't hold
/// up the rest of the batch.
async fn deliver(inner: &Arc<Mutex<Inner>>, event: QueuedEvent, delivery_timeout: Duration) {
    let targets: Vec<(String, Arc<dyn ConnectionSink>)> = {
        let state = inner.lock().await;
        match &event.mode {
            DeliveryMode::Unicast(id) => state
                .sinks
                .get(id)
                .map(|sink| vec![(id.clone(), sink.clone())])
                .unwrap_or_default(),
            DeliveryMode::Targeted(ids) => ids
                .iter()
                .filter_map(|id| state.sinks.get(id).map(|sink| (id.clone(), sink.clone())))
                .collect(),
            DeliveryMode::Broadcast => state
                .interests
                .values()
                .filter(|i| i.patterns.iter().any(|p| shell_glob::matches(p, &event.topic)))
                .filter_map(|i| state.sinks.get(&i.client_id).map(|sink| (i.client_id.clone(), sink.clone())))
                .collect(),
            DeliveryMode::Filtered(filter) => state
                .interests
                .values()
                .filter(|i| i.patterns.iter().any(|p| shell_glob::matches(p, &event.topic)))
                .filter(|i| filter_matches(filter, i, &event.topic, &event.payload))
                .filter_map(|i| state.sinks.get(&i.client_id).map(|sink| (i.client_id.clone(), sink.clone())))
                .collect(),
        }
    };

    let payload = serde_json::json!({"topic": event.topic, "data": event.payload});
    let sends = targets.into_iter().map(|(client_id, sink)| {
        let payload = payload.clone();
        async move {
            let ok = tokio::time::timeout(delivery_timeout, sink.send(payload)).await.is_ok_and(|r| r.is_ok());
            (client_id, ok)
        }
    });
    let results = futures::future::join_all(sends).await;

    let delivered_to: Vec<String> = results.iter().filter(|(_, ok)| *ok).map(|(id, _)| id.clone()).collect();
    let failed_clients: Vec<String> = results.iter().filter(|(_, ok)| !*ok).map(|(id, _)| id.clone()).collect();

    let mut state = inner.lock().await;
    state.counters.events_delivered += delivered_to.len() as u64;
    state.counters.events_failed += failed_clients.len() as u64;
    for client_id in &delivered_to {
        if let Some(cursor) = state.cursors.get_mut(client_id) {
            *cursor = event.seq;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use icpy_core::Result;
    use tokio::sync::mpsc as tmpsc;

    struct CollectingSink(tmpsc::UnboundedSender<Value>);
    impl ConnectionSink for CollectingSink {
        fn send(&self, payload: Value) -> BoxFuture<'_, Result<()>> {
            let _ = self.0.send(payload);
            Box::pin(async { Ok(()) })
        }
    }

    struct FailingSink;
    impl ConnectionSink for FailingSink {
        fn send(&self, _payload: Value) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Err(icpy_core::Error::Internal("sink closed".into())) })
        }
    }

    #[tokio::test]
    async fn broadcast_respects_interest_patterns() {
        let b = EventBroadcaster::new(BroadcasterConfig::default());
        let (tx, mut rx) = tmpsc::unbounded_channel();
        b.register_client("c1", Arc::new(CollectingSink(tx))).await;
        b.add_interest("c1", "fs.*").await;

        b.broadcast_event("fs.file_created", serde_json::json!({"path": "a"}), Priority::Normal, DeliveryMode::Broadcast)
            .await;
        b.broadcast_event("terminal.output", serde_json::json!({}), Priority::Normal, DeliveryMode::Broadcast)
            .await;

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received["topic"], "fs.file_created");
        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unicast_ignores_interests() {
        let b = EventBroadcaster::new(BroadcasterConfig::default());
        let (tx, mut rx) = tmpsc::unbounded_channel();
        b.register_client("c1", Arc::new(CollectingSink(tx))).await;

        b.broadcast_event(
            "direct.message",
            serde_json::json!({"hi": true}),
            Priority::Urgent,
            DeliveryMode::Unicast("c1".into()),
        )
        .await;

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received["topic"], "direct.message");
    }

    #[tokio::test]
    async fn replay_missed_filters_by_cursor_and_interest() {
        let b = EventBroadcaster::new(BroadcasterConfig::default());
        let (tx, _rx) = tmpsc::unbounded_channel();
        // register after some history exists so cursor starts past it
        b.broadcast_event("fs.a", serde_json::json!(1), Priority::Low, DeliveryMode::Broadcast)
            .await;
        b.register_client("late", Arc::new(CollectingSink(tx))).await;
        b.add_interest("late", "fs.*").await;
        b.broadcast_event("fs.b", serde_json::json!(2), Priority::Low, DeliveryMode::Broadcast)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let missed = b.replay_missed("late").await;
        assert!(missed.iter().any(|(t, _)| t == "fs.b"));
        assert!(!missed.iter().any(|(t, _)| t == "fs.a"));
    }

    #[tokio::test]
    async fn filtered_mode_applies_kind_and_permission_rules() {
        let b = EventBroadcaster::new(BroadcasterConfig::default());
        let (admin_tx, mut admin_rx) = tmpsc::unbounded_channel();
        let (guest_tx, mut guest_rx) = tmpsc::unbounded_channel();
        b.register_client("admin", Arc::new(CollectingSink(admin_tx))).await;
        b.register_client("guest", Arc::new(CollectingSink(guest_tx))).await;
        b.register_client_interest("admin", vec!["fs.*".into()], Some("admin".into()), HashSet::new())
            .await;
        b.register_client_interest("guest", vec!["fs.*".into()], Some("guest".into()), HashSet::new())
            .await;

        let filter = FilterConfig {
            include_client_kinds: ["admin".to_string()].into_iter().collect(),
            ..Default::default()
        };
        b.broadcast_event("fs.file_created", serde_json::json!({}), Priority::Normal, DeliveryMode::Filtered(filter))
            .await;

        let received = tokio::time::timeout(Duration::from_millis(200), admin_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received["topic"], "fs.file_created");
        assert!(tokio::time::timeout(Duration::from_millis(100), guest_rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn exclude_beats_include_in_filter_config() {
        let b = EventBroadcaster::new(BroadcasterConfig::default());
        let (tx, mut rx) = tmpsc::unbounded_channel();
        b.register_client("c1", Arc::new(CollectingSink(tx))).await;
        b.register_client_interest("c1", vec!["fs.*".into()], Some("admin".into()), HashSet::new())
            .await;

        let filter = FilterConfig {
            include_client_kinds: ["admin".to_string()].into_iter().collect(),
            exclude_client_kinds: ["admin".to_string()].into_iter().collect(),
            ..Default::default()
        };
        b.broadcast_event("fs.file_created", serde_json::json!({}), Priority::Normal, DeliveryMode::Filtered(filter))
            .await;

        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delivery_counts_failures_and_leaves_cursor_unmoved() {
        let b = EventBroadcaster::new(BroadcasterConfig::default());
        b.register_client("dead", Arc::new(FailingSink)).await;
        b.add_interest("dead", "fs.*").await;

        b.broadcast_event("fs.a", serde_json::json!(1), Priority::Low, DeliveryMode::Broadcast)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = b.get_stats().await;
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.events_failed, 1);
        assert_eq!(stats.events_delivered, 0);
    }

    #[tokio::test]
    async fn get_event_history_respects_limit() {
        let b = EventBroadcaster::new(BroadcasterConfig::default());
        b.broadcast_event("fs.a", serde_json::json!(1), Priority::Low, DeliveryMode::Broadcast)
            .await;
        b.broadcast_event("fs.b", serde_json::json!(2), Priority::Low, DeliveryMode::Broadcast)
            .await;
        b.broadcast_event("fs.c", serde_json::json!(3), Priority::Low, DeliveryMode::Broadcast)
            .await;

        let all = b.get_event_history(None).await;
        assert_eq!(all.len(), 3);
        let last_two = b.get_event_history(Some(2)).await;
        assert_eq!(last_two.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(), vec!["fs.b", "fs.c"]);
    }

    #[tokio::test]
    async fn get_client_interests_reports_registered_metadata() {
        let b = EventBroadcaster::new(BroadcasterConfig::default());
        let (tx, _rx) = tmpsc::unbounded_channel();
        b.register_client("c1", Arc::new(CollectingSink(tx))).await;
        b.register_client_interest(
            "c1",
            vec!["fs.*".into()],
            Some("admin".into()),
            ["write".to_string()].into_iter().collect(),
        )
        .await;

        let interest = b.get_client_interests("c1").await.unwrap();
        assert_eq!(interest.kind, "admin");
        assert!(interest.patterns.contains("fs.*"));
        assert!(interest.permissions.contains("write"));
        assert!(b.get_client_interests("missing").await.is_none());
    }
}
