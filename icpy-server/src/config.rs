//! Fabric-wide configuration, read from environment variables per the
//! external interface spec (workspace root, hop timeouts/backoff, debug mode).

use std::path::PathBuf;
use std::time::Duration;

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Process-wide configuration assembled once at startup and shared via
/// [`crate::fabric::Fabric`].
#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub workspace_root: PathBuf,
    pub hop_connection_timeout: Duration,
    pub hop_operation_timeout: Duration,
    pub hop_reconnect_max_retries: u32,
    /// Backoff base for `base^attempt` seconds, capped at 30s.
    pub hop_reconnect_backoff_base: f64,
    pub hop_debug_mode: bool,
    pub remote_shell: String,
}

impl FabricConfig {
    /// Build configuration from environment variables, falling back to the
    /// defaults named in the external interfaces section.
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("WORKSPACE_ROOT")
            .or_else(|_| std::env::var("ICOTES_WORKSPACE_PATH"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".icotes")
                    .join("workspace")
            });

        Self {
            workspace_root,
            hop_connection_timeout: env_duration_secs("HOP_CONNECTION_TIMEOUT", 15),
            hop_operation_timeout: env_duration_secs("HOP_OPERATION_TIMEOUT", 30),
            hop_reconnect_max_retries: env_u32("HOP_RECONNECT_MAX_RETRIES", 3),
            hop_reconnect_backoff_base: env_f64("HOP_RECONNECT_BACKOFF_BASE", 2.0),
            hop_debug_mode: env_bool("HOP_DEBUG_MODE", false),
            remote_shell: std::env::var("REMOTE_SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
        }
    }

    /// Directory holding hop credential/session config (`<workspace>/.icotes/hop`).
    pub fn hop_dir(&self) -> PathBuf {
        self.workspace_root.join(".icotes").join("hop")
    }

    pub fn hop_config_path(&self) -> PathBuf {
        self.hop_dir().join("config")
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
