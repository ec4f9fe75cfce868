//! Message Broker (4.A): in-process topic pub/sub with request/response,
//! TTL, and bounded history replay.
//!
//! Grounded on `original_source/backend/icpy/core/message_broker.py`. Topic
//! matching uses [`crate::shell_glob`], not the NATS-token matcher the rest
//! of this crate's transport layer uses — see DESIGN.md.

use crate::shell_glob;
use futures::future::BoxFuture;
use icpy_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Broker message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Notification,
    Request,
    Response,
    Error,
}

/// A single unit flowing through the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub topic: String,
    pub payload: Value,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f64>,
}

impl Message {
    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// True if `ttl` has elapsed since `timestamp`.
    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age_ms = Self::now_millis().saturating_sub(self.timestamp);
                (age_ms as f64 / 1000.0) > ttl
            }
            None => false,
        }
    }
}

type Callback = Arc<dyn Fn(Arc<Message>) -> BoxFuture<'static, ()> + Send + Sync>;
type Filter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

struct Subscription {
    subscriber_id: String,
    topic_pattern: String,
    callback: Callback,
    filter: Option<Filter>,
}

#[derive(Default)]
struct Stats {
    messages_published: u64,
}

struct Inner {
    subscriptions: Vec<Subscription>,
    history: Vec<Message>,
    stats: Stats,
    running: bool,
}

/// Configuration for the bounded history and eviction cadence.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub max_history: usize,
    pub expiry_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            expiry_interval: Duration::from_secs(60),
        }
    }
}

/// In-memory topic broker. Cheap to clone (shares state via `Arc`).
#[derive(Clone)]
pub struct MessageBroker {
    inner: Arc<Mutex<Inner>>,
    config: BrokerConfig,
    next_id: Arc<AtomicU64>,
    expiry_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MessageBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscriptions: Vec::new(),
                history: Vec::new(),
                stats: Stats::default(),
                running: true,
            })),
            config,
            next_id: Arc::new(AtomicU64::new(1)),
            expiry_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the background TTL-eviction loop. Idempotent.
    pub async fn start(&self) {
        let mut guard = self.expiry_task.lock().await;
        if guard.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let interval = self.config.expiry_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut state = inner.lock().await;
                let before = state.history.len();
                state.history.retain(|m| !m.is_expired());
                let evicted = before - state.history.len();
                if evicted > 0 {
                    tracing::debug!(evicted, "broker history TTL eviction");
                }
            }
        }));
        guard.as_mut().map(|_| ());
        drop(guard);
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.expiry_task.lock().await.take() {
            handle.abort();
        }
        self.inner.lock().await.running = false;
    }

    fn next_message_id(&self) -> String {
        format!("msg-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Publish a message; delivers to all matching subscriptions as
    /// independent tasks so one failing/slow callback never blocks another.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: Value,
        message_type: MessageType,
        sender: Option<String>,
        ttl: Option<f64>,
        correlation_id: Option<String>,
        reply_to: Option<String>,
    ) -> Result<String> {
        let topic = topic.into();
        let message = {
            let mut state = self.inner.lock().await;
            if !state.running {
                return Err(Error::NotRunning);
            }
            let message = Message {
                id: self.next_message_id(),
                message_type,
                topic: topic.clone(),
                payload,
                timestamp: Message::now_millis(),
                sender,
                correlation_id,
                reply_to,
                ttl,
            };
            state.stats.messages_published += 1;
            state.history.push(message.clone());
            if state.history.len() > self.config.max_history {
                let overflow = state.history.len() - self.config.max_history;
                state.history.drain(0..overflow);
            }
            message
        };

        if message.is_expired() {
            return Ok(message.id);
        }

        let matching: Vec<Callback> = {
            let state = self.inner.lock().await;
            state
                .subscriptions
                .iter()
                .filter(|s| shell_glob::matches(&s.topic_pattern, &message.topic))
                .filter(|s| s.filter.as_ref().map(|f| f(&message)).unwrap_or(true))
                .map(|s| s.callback.clone())
                .collect()
        };

        let arc_msg = Arc::new(message.clone());
        for cb in matching {
            let msg = arc_msg.clone();
            tokio::spawn(async move {
                cb(msg).await;
            });
        }

        Ok(message.id)
    }

    /// Subscribe to a topic glob. Returns a subscription id usable with `unsubscribe`.
    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        topic_pattern: impl Into<String>,
        callback: Callback,
        filter: Option<Filter>,
    ) -> String {
        let subscriber_id = subscriber_id.into();
        let topic_pattern = topic_pattern.into();
        let sub_id = format!("{}::{}", subscriber_id, topic_pattern);
        let mut state = self.inner.lock().await;
        state.subscriptions.push(Subscription {
            subscriber_id,
            topic_pattern,
            callback,
            filter,
        });
        sub_id
    }

    /// Remove all subscriptions for `subscriber_id`, optionally scoped to one pattern.
    /// A no-op (not an error) if nothing matches.
    pub async fn unsubscribe(&self, subscriber_id: &str, pattern: Option<&str>) {
        let mut state = self.inner.lock().await;
        state.subscriptions.retain(|s| {
            if s.subscriber_id != subscriber_id {
                return true;
            }
            match pattern {
                Some(p) => s.topic_pattern != p,
                None => false,
            }
        });
    }

    /// Request/response: publish a REQUEST on `topic`, await the RESPONSE
    /// delivered to a private reply subtopic, with a timeout.
    pub async fn request(
        &self,
        topic: impl Into<String>,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let correlation_id = format!("corr-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let reply_topic = format!("_reply.{}", correlation_id);
        let subscriber_id = format!("_requester.{}", correlation_id);

        let (tx, rx) = oneshot::channel::<(MessageType, Value)>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let cb: Callback = Arc::new(move |msg: Arc<Message>| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(sender) = tx.lock().await.take() {
                    let _ = sender.send((msg.message_type, msg.payload.clone()));
                }
            })
        });

        self.subscribe(subscriber_id.clone(), reply_topic.clone(), cb, None)
            .await;

        let result = self
            .publish(
                topic,
                payload,
                MessageType::Request,
                None,
                None,
                Some(correlation_id),
                Some(reply_topic),
            )
            .await;

        let outcome = if result.is_err() {
            Err(result.unwrap_err())
        } else {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok((MessageType::Error, payload))) => Err(Error::Internal(
                    payload
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("request failed")
                        .to_string(),
                )),
                Ok(Ok((_, payload))) => Ok(payload),
                Ok(Err(_)) => Err(Error::Internal("responder channel closed".into())),
                Err(_) => Err(Error::Timeout),
            }
        };

        self.unsubscribe(&subscriber_id, None).await;
        outcome
    }

    /// Respond to a previously received request message.
    pub async fn respond(&self, request: &Message, payload: Value, is_error: bool) -> Result<()> {
        let reply_to = request
            .reply_to
            .clone()
            .ok_or_else(|| Error::InvalidRequest("message has no reply_to".into()))?;
        let message_type = if is_error {
            MessageType::Error
        } else {
            MessageType::Response
        };
        self.publish(
            reply_to,
            payload,
            message_type,
            None,
            None,
            request.correlation_id.clone(),
            None,
        )
        .await?;
        Ok(())
    }

    /// Return history entries matching `pattern`, optionally since a timestamp, limited.
    pub async fn replay(
        &self,
        pattern: &str,
        since_timestamp: Option<u64>,
        limit: Option<usize>,
    ) -> Vec<Message> {
        let state = self.inner.lock().await;
        let mut out: Vec<Message> = state
            .history
            .iter()
            .filter(|m| shell_glob::matches(pattern, &m.topic))
            .filter(|m| since_timestamp.map(|t| m.timestamp >= t).unwrap_or(true))
            .filter(|m| !m.is_expired())
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if out.len() > limit {
                out = out.split_off(out.len() - limit);
            }
        }
        out
    }

    pub async fn get_stats(&self) -> HashMap<String, Value> {
        let state = self.inner.lock().await;
        let mut stats = HashMap::new();
        stats.insert(
            "messages_published".into(),
            Value::from(state.stats.messages_published),
        );
        stats.insert(
            "active_subscriptions".into(),
            Value::from(state.subscriptions.len()),
        );
        stats.insert("history_size".into(), Value::from(state.history.len()));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn recording_callback() -> (Callback, mpsc::UnboundedReceiver<Arc<Message>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cb: Callback = Arc::new(move |msg| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(msg);
            })
        });
        (cb, rx)
    }

    #[tokio::test]
    async fn s1_pubsub_fanout() {
        let broker = MessageBroker::new(BrokerConfig::default());
        broker.start().await;

        let (cb_a, mut rx_a) = recording_callback();
        let (cb_b, mut rx_b) = recording_callback();
        let (cb_c, mut rx_c) = recording_callback();

        broker.subscribe("A", "fs.*", cb_a, None).await;
        broker
            .subscribe("B", "fs.file_created", cb_b, None)
            .await;
        broker.subscribe("C", "terminal.*", cb_c, None).await;

        broker
            .publish(
                "fs.file_created",
                serde_json::json!({"path": "/a"}),
                MessageType::Notification,
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let a = tokio::time::timeout(Duration::from_millis(200), rx_a.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.payload["path"], "/a");
        let b = tokio::time::timeout(Duration::from_millis(200), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.payload["path"], "/a");
        assert!(tokio::time::timeout(Duration::from_millis(50), rx_c.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn s2_request_response() {
        let broker = MessageBroker::new(BrokerConfig::default());
        broker.start().await;
        let responder = broker.clone();
        let (cb, mut rx) = recording_callback();
        broker.subscribe("echo", "svc.echo", cb, None).await;
        tokio::spawn(async move {
            if let Some(msg) = rx.recv().await {
                responder.respond(&msg, msg.payload.clone(), false).await.unwrap();
            }
        });

        let result = broker
            .request("svc.echo", serde_json::json!({"x": 1}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result["x"], 1);
    }

    #[tokio::test]
    async fn s2_request_timeout_no_responder() {
        let broker = MessageBroker::new(BrokerConfig::default());
        broker.start().await;
        let result = broker
            .request("svc.nobody", serde_json::json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(broker.inner.lock().await.subscriptions.len(), 0);
    }

    #[tokio::test]
    async fn ttl_gating() {
        let broker = MessageBroker::new(BrokerConfig::default());
        broker.start().await;
        let (cb, mut rx) = recording_callback();
        broker.subscribe("x", "ttl.*", cb, None).await;
        broker
            .publish(
                "ttl.expired",
                serde_json::json!({}),
                MessageType::Notification,
                None,
                Some(0.0),
                None,
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn idempotent_unsubscribe() {
        let broker = MessageBroker::new(BrokerConfig::default());
        broker.unsubscribe("unknown", None).await;
        assert_eq!(broker.get_stats().await["active_subscriptions"], 0);
    }

    #[tokio::test]
    async fn replay_determinism() {
        let broker = MessageBroker::new(BrokerConfig::default());
        broker.start().await;
        let counter = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            counter.fetch_add(1, Ordering::SeqCst);
            broker
                .publish(
                    "fs.file_created",
                    serde_json::json!({"i": i}),
                    MessageType::Notification,
                    None,
                    None,
                    None,
                    None,
                )
                .await
                .unwrap();
        }
        let replayed = broker.replay("fs.*", None, None).await;
        assert_eq!(replayed.len(), 5);
        for (i, m) in replayed.iter().enumerate() {
            assert_eq!(m.payload["i"], i as i64);
        }
    }
}
