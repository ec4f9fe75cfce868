//! Persistent subscription management
//!
//! This module manages the lifecycle of persistent (durable) subscriptions.
//! Unlike regular subscriptions, persistent subscriptions:
//! - Survive client disconnects
//! - Track which messages have been acknowledged
//! - Replay unacknowledged messages on reconnect
//!
//! # Subscription Lifecycle
//!
//! 1. **Register**: Client creates subscription with unique ID
//! 2. **Deliver**: Messages matching the pattern are delivered
//! 3. **Acknowledge**: Client acks each message after processing
//! 4. **Disconnect**: Subscription state persisted to storage
//! 5. **Reconnect**: Resume from last acknowledged position
//!
//! # Exclusivity
//!
//! Subscriptions are exclusive - only one connection can be active for
//! a subscription ID at a time. This prevents duplicate delivery.
//!
//! # Inactivity Timeout
//!
//! Optionally, subscriptions can expire after a period of inactivity.
//! This prevents abandoned subscriptions from accumulating.
//!
//! # Examples
//!
//! ```rust,no_run
//! use icpy_server::{PersistentSubscriptionManager, PersistentStorage};
//! use std::sync::Arc;
//!
//! # async fn example() -> icpy_core::Result<()> {
//! let storage = Arc::new(PersistentStorage::new("./data")?);
//! let manager = PersistentSubscriptionManager::new(storage, None);
//!
//! // Register a subscription
//! let state = manager.register_subscription(
//!     "user-123-orders".to_string(),
//!     "orders.*".to_string(),
//!     1
//! ).await?;
//!
//! // After processing a message, acknowledge it
//! manager.acknowledge_message("user-123-orders", 42, 1).await?;
//! # Ok(())
//! # }
//! ```

use crate::persistent_storage::{PersistentStorage, SubscriptionState};
use crate::NatsPattern;
use icpy_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Information about an active persistent subscription
#[derive(Debug, Clone)]
struct SubscriptionInfo {
    subscription_id: String,
    pattern: NatsPattern,
    connection_id: u64,
}

/// Manages persistent subscriptions and their active connections
#[derive(Clone)]
pub struct PersistentSubscriptionManager {
    /// Map of subscription_id -> SubscriptionInfo for active subscriptions
    active_subscriptions: Arc<RwLock<HashMap<String, SubscriptionInfo>>>,
    /// Map of connection_id -> set of subscription_ids
    connection_subscriptions: Arc<RwLock<HashMap<u64, Vec<String>>>>,
    /// Storage backend
    storage: Arc<PersistentStorage>,
    /// Optional timeout for inactive subscriptions (None = no timeout)
    inactivity_timeout: Option<Duration>,
}

impl PersistentSubscriptionManager {
    /// Create a new persistent subscription manager
    pub fn new(storage: Arc<PersistentStorage>, inactivity_timeout: Option<Duration>) -> Self {
        Self {
            active_subscriptions: Arc::new(RwLock::new(HashMap::new())),
            connection_subscriptions: Arc::new(RwLock::new(HashMap::new())),
            storage,
            inactivity_timeout,
        }
    }

    /// Register a persistent subscription (enforce exclusivity)
    /// The topic parameter can be an exact topic or a NATS-style pattern
    pub async fn register_subscription(
        &self,
        subscription_id: String,
        topic: String,
        connection_id: u64,
    ) -> Result<SubscriptionState> {
        // Parse the pattern
        let pattern = NatsPattern::new(&topic)
            .map_err(|e| Error::InvalidParams(format!("Invalid topic pattern: {}", e)))?;
        
        let mut active = self.active_subscriptions.write().await;
        
        // Check if subscription is already active on another connection
        if let Some(existing_info) = active.get(&subscription_id) {
            if existing_info.connection_id != connection_id {
                return Err(Error::InvalidRequest(format!(
                    "Subscription '{}' is already active on another connection",
                    subscription_id
                )));
            }
        }
        
        // Get or create subscription state in storage
        let mut state = self.storage.create_subscription(&subscription_id, &topic).await?;
        
        // Update state with pattern info
        state.topic_pattern = Some(topic.clone());
        
        // Mark as active with pattern info
        active.insert(subscription_id.clone(), SubscriptionInfo {
            subscription_id: subscription_id.clone(),
            pattern,
            connection_id,
        });
        
        // Track for this connection
        let mut conn_subs = self.connection_subscriptions.write().await;
        conn_subs
            .entry(connection_id)
            .or_insert_with(Vec::new)
            .push(subscription_id);
        
        Ok(state)
    }

    /// Acknowledge a message (update last ack position)
    pub async fn acknowledge_message(
        &self,
        subscription_id: &str,
        sequence_id: u64,
        connection_id: u64,
    ) -> Result<()> {
        // Verify subscription is active on this connection
        let active = self.active_subscriptions.read().await;
        match active.get(subscription_id) {
            Some(info) if info.connection_id == connection_id => {
                // Update storage
                self.storage
                    .update_subscription_position(subscription_id, sequence_id)
                    .await
            }
            Some(_) => Err(Error::InvalidRequest(format!(
                "Subscription '{}' is not active on this connection",
                subscription_id
            ))),
            None => Err(Error::InvalidRequest(format!(
                "Subscription '{}' is not active",
                subscription_id
            ))),
        }
    }

    /// Unsubscribe (remove from active, but keep state in storage for resume)
    pub async fn unsubscribe(&self, subscription_id: &str, connection_id: u64) -> Result<bool> {
        let mut active = self.active_subscriptions.write().await;
        
        // Check if subscription exists and belongs to this connection
        match active.get(subscription_id) {
            Some(info) if info.connection_id == connection_id => {
                active.remove(subscription_id);
                
                // Remove from connection tracking
                let mut conn_subs = self.connection_subscriptions.write().await;
                if let Some(subs) = conn_subs.get_mut(&connection_id) {
                    subs.retain(|s| s != subscription_id);
                    if subs.is_empty() {
                        conn_subs.remove(&connection_id);
                    }
                }
                
                Ok(true)
            }
            Some(_) => Err(Error::InvalidRequest(format!(
                "Subscription '{}' belongs to another connection",
                subscription_id
            ))),
            None => Ok(false),
        }
    }

    /// Remove all subscriptions for a connection (cleanup on disconnect)
    pub async fn remove_connection(&self, connection_id: u64) {
        let mut conn_subs = self.connection_subscriptions.write().await;
        
        if let Some(subscription_ids) = conn_subs.remove(&connection_id) {
            let mut active = self.active_subscriptions.write().await;
            for sub_id in subscription_ids {
                active.remove(&sub_id);
            }
        }
    }

    /// Check if a subscription is active
    pub async fn is_active(&self, subscription_id: &str) -> bool {
        let active = self.active_subscriptions.read().await;
        active.contains_key(subscription_id)
    }

    /// Get the connection ID for an active subscription
    pub async fn get_connection_id(&self, subscription_id: &str) -> Option<u64> {
        let active = self.active_subscriptions.read().await;
        active.get(subscription_id).map(|info| info.connection_id)
    }

    /// Get all subscriptions whose patterns match a given topic
    /// Returns a vector of (subscription_id, connection_id) pairs
    pub async fn get_matching_subscriptions(&self, topic: &str) -> Vec<(String, u64)> {
        let active = self.active_subscriptions.read().await;
        active
            .values()
            .filter(|info| info.pattern.matches(topic))
            .map(|info| (info.subscription_id.clone(), info.connection_id))
            .collect()
    }

    /// Get all subscriptions for a connection
    pub async fn get_connection_subscriptions(&self, connection_id: u64) -> Vec<String> {
        let conn_subs = self.connection_subscriptions.read().await;
        conn_subs
            .get(&connection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Clean up inactive subscriptions based on timeout
    pub async fn cleanup_inactive_subscriptions(&self) -> Result<Vec<String>> {
        let timeout = match self.inactivity_timeout {
            Some(t) => t,
            None => return Ok(Vec::new()), // No timeout configured
        };
        
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        
        let timeout_secs = timeout.as_secs();
        let mut deleted = Vec::new();
        
        // Get all subscriptions from storage
        let all_subs = self.storage.get_all_subscriptions().await?;
        let active = self.active_subscriptions.read().await;
        
        for sub in all_subs {
            // Skip active subscriptions
            if active.contains_key(&sub.subscription_id) {
                continue;
            }
            
            // Check if inactive for too long
            let inactive_duration = now.saturating_sub(sub.last_activity);
            if inactive_duration > timeout_secs {
                tracing::info!(
                    subscription_id = %sub.subscription_id,
                    inactive_secs = inactive_duration,
                    "Cleaning up inactive subscription"
                );
                
                if self.storage.delete_subscription(&sub.subscription_id).await? {
                    deleted.push(sub.subscription_id);
                }
            }
        }
        
        Ok(deleted)
    }

    /// Get count of active subscriptions
    pub async fn active_count(&self) -> usize {
        let active = self.active_subscriptions.read().await;
        active.len()
    }

    /// Get storage reference
    pub fn storage(&self) -> &Arc<PersistentStorage> {
        &self.storage
    }
}
