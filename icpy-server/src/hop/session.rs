//! `HopSession`: per-context connection state, mirroring
//! `original_source/backend/icpy/services/hop_service.py::HopSession`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopSessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Unknown,
    Good,
    Degraded,
    Poor,
}

/// Local context id, always present even with no remote connections.
pub const LOCAL_CONTEXT_ID: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopSession {
    pub context_id: String,
    pub credential_id: Option<String>,
    pub credential_name: Option<String>,
    pub status: HopSessionState,
    pub cwd: String,
    pub last_error: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub reconnect_attempt: u32,
    pub last_connected_at: Option<String>,
    pub connection_quality: ConnectionQuality,
}

impl HopSession {
    pub fn local() -> Self {
        Self {
            context_id: LOCAL_CONTEXT_ID.to_string(),
            credential_id: None,
            credential_name: None,
            status: HopSessionState::Connected,
            cwd: "/".to_string(),
            last_error: None,
            host: None,
            port: None,
            username: None,
            reconnect_attempt: 0,
            last_connected_at: None,
            connection_quality: ConnectionQuality::Unknown,
        }
    }

    pub fn connecting(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            credential_id: None,
            credential_name: None,
            status: HopSessionState::Connecting,
            cwd: "/".to_string(),
            last_error: None,
            host: None,
            port: None,
            username: None,
            reconnect_attempt: 0,
            last_connected_at: None,
            connection_quality: ConnectionQuality::Unknown,
        }
    }

    pub fn is_local(&self) -> bool {
        self.context_id == LOCAL_CONTEXT_ID
    }
}
